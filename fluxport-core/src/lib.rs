//! FluxPort Core - InfluxDB Backup, Restore and Migration Engine
//!
//! Moves time-series data between an InfluxDB 1.x server, line-protocol
//! backup files and ClickHouse tables, keeping memory bounded by one page
//! (dump) or one batch (restore and migrate) at a time.
//!
//! # Architecture
//!
//! - **Codec / Line Protocol**: identifier escaping and the text form of a [`Record`]
//! - **Source**: `/query` and `/write` client, paged extraction into records
//! - **Transport**: one plain or gzipped backup file per measurement
//! - **Load**: batching, throttling, precision conversion and retries over a
//!   pluggable sink (InfluxDB or ClickHouse)
//! - **Schema**: ClickHouse column model, table creation and default fill
//! - **Aggregate**: continuous-query downsampling rules
//!
//! Dump runs enumerate → extract → encode → file; restore and migrate run
//! file → decode → reconcile → load.

pub mod aggregate;
pub mod clickhouse;
pub mod codec;
pub mod config;
pub mod dump;
pub mod enumerate;
pub mod line_protocol;
pub mod load;
pub mod restore;
pub mod schema;
pub mod source;
pub mod transport;

mod error;
mod record;

pub use error::{PortError, Result};
pub use record::*;

/// FluxPort version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
