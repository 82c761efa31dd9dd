//! Restore sink: line protocol writes back into the source store

use super::{BatchSink, WriteOutcome};
use crate::line_protocol::write_line;
use crate::source::InfluxClient;
use crate::{Precision, Record, Result};
use async_trait::async_trait;

/// Writes each batch as one `/write` request
pub struct LineProtocolSink {
    client: InfluxClient,
    database: String,
    retention_policy: Option<String>,
    precision: Precision,
}

impl LineProtocolSink {
    pub fn new(
        client: InfluxClient,
        database: impl Into<String>,
        retention_policy: Option<String>,
        precision: Precision,
    ) -> Self {
        Self {
            client,
            database: database.into(),
            retention_policy,
            precision,
        }
    }
}

#[async_trait]
impl BatchSink for LineProtocolSink {
    async fn write_batch(&mut self, _entity: &str, batch: &[Record]) -> Result<WriteOutcome> {
        let mut body = String::with_capacity(batch.iter().map(|r| r.size() + 32).sum());
        for record in batch {
            write_line(&mut body, record);
        }

        Ok(self
            .client
            .write(
                &self.database,
                self.retention_policy.as_deref(),
                self.precision,
                body,
            )
            .await)
    }
}
