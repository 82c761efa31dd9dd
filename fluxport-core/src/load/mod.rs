//! Batched loading of decoded records into a target store
//!
//! The [`BatchLoader`] owns batching, throttling, precision conversion and
//! the retry loop. A [`BatchSink`] turns one batch into one write request
//! and reports what happened as a [`WriteOutcome`].

mod column;
mod influx;
mod loader;

pub use column::ColumnSink;
pub use influx::LineProtocolSink;
pub use loader::{BatchLoader, EntityLoad};

use crate::{Record, Result};
use async_trait::async_trait;

/// Result of a single write attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Target accepted the batch
    Written,
    /// Target dropped the points for falling outside its retention window.
    /// Counted as success.
    RetentionSkipped,
    /// Batch intentionally not written (e.g. destination table missing)
    Skipped(String),
    /// Worth retrying: network failure, 5xx, throttling
    Transient(String),
    /// Target refused the batch; retrying would not help
    Rejected(String),
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            WriteOutcome::Written | WriteOutcome::RetentionSkipped | WriteOutcome::Skipped(_)
        )
    }
}

/// Destination of record batches
#[async_trait]
pub trait BatchSink: Send {
    /// Called with the first record of each entity before any batch is written
    async fn begin_entity(&mut self, _entity: &str, _first: &Record) -> Result<()> {
        Ok(())
    }

    /// Write one batch. `Err` aborts the run without retrying; transient
    /// failures must be reported as [`WriteOutcome::Transient`].
    async fn write_batch(&mut self, entity: &str, batch: &[Record]) -> Result<WriteOutcome>;
}
