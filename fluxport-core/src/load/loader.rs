//! Batch accumulation, throttling and retries

use super::{BatchSink, WriteOutcome};
use crate::config::LoadOptions;
use crate::line_protocol::decode_line;
use crate::{PortError, Record, Result};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Counters for one loaded entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityLoad {
    pub entity: String,
    /// Non-blank lines read
    pub lines: u64,
    /// Records handed to the sink
    pub records: u64,
    /// Write requests issued (excluding retries)
    pub batches: u64,
    /// Lines that failed to parse and were skipped
    pub invalid: u64,
    /// Batches the target dropped or the sink skipped
    pub dropped_batches: u64,
}

/// Groups records into fixed-size batches and writes them through a sink
pub struct BatchLoader<S> {
    sink: S,
    options: LoadOptions,
}

impl<S: BatchSink> BatchLoader<S> {
    pub fn new(sink: S, options: LoadOptions) -> Self {
        Self { sink, options }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Decode `lines` and write them in batches of `batch_size`
    ///
    /// Unparseable lines are logged and skipped. Read errors and exhausted
    /// retries end the load.
    pub async fn load_entity<I>(&mut self, entity: &str, lines: I) -> Result<EntityLoad>
    where
        I: IntoIterator<Item = Result<String>>,
    {
        let mut stats = EntityLoad {
            entity: entity.to_string(),
            ..Default::default()
        };
        let batch_size = self.options.batch_size;
        let mut batch: Vec<Record> = Vec::with_capacity(batch_size.min(10_000));
        let mut line_no = 0usize;
        let mut begun = false;

        for line in lines {
            line_no += 1;
            let line = match line {
                Ok(line) => line,
                Err(e @ PortError::InvalidLine { .. }) => {
                    warn!(entity, line = line_no, error = %e, "skipping unreadable line");
                    stats.lines += 1;
                    stats.invalid += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if line.trim().is_empty() {
                continue;
            }
            stats.lines += 1;

            let mut record = match decode_line(&line) {
                Ok(record) => record,
                Err(reason) => {
                    warn!(entity, line = line_no, %reason, "skipping unparseable line");
                    stats.invalid += 1;
                    continue;
                }
            };

            if !begun {
                begun = true;
                self.check_precision(entity, &record);
                self.sink.begin_entity(entity, &record).await?;
            }
            record.timestamp = self
                .options
                .input_precision
                .convert(record.timestamp, self.options.target_precision);

            batch.push(record);
            if batch.len() == batch_size {
                self.flush(entity, &mut batch, &mut stats).await?;
            }
        }

        if !batch.is_empty() {
            self.flush(entity, &mut batch, &mut stats).await?;
        }
        Ok(stats)
    }

    /// Warn when the first timestamp's digit count does not fit the
    /// configured input precision; returns whether it warned
    fn check_precision(&self, entity: &str, first: &Record) -> bool {
        let expected = self.options.input_precision;
        let mismatch = !expected.matches(first.timestamp);
        if mismatch {
            warn!(
                entity,
                timestamp = first.timestamp,
                expected_digits = expected.digits(),
                precision = %expected,
                "first timestamp does not look like the configured precision"
            );
        }
        mismatch
    }

    async fn flush(
        &mut self,
        entity: &str,
        batch: &mut Vec<Record>,
        stats: &mut EntityLoad,
    ) -> Result<()> {
        if let Some(delay) = self.options.chunk_delay {
            sleep(delay).await;
        }

        let outcome = self.write_with_retry(entity, batch).await?;
        if outcome != WriteOutcome::Written {
            stats.dropped_batches += 1;
        }
        stats.batches += 1;
        stats.records += batch.len() as u64;
        debug!(entity, records = stats.records, ?outcome, "batch flushed");

        batch.clear();
        Ok(())
    }

    /// Write one batch, retrying transient failures with a fixed delay
    pub async fn write_with_retry(&mut self, entity: &str, batch: &[Record]) -> Result<WriteOutcome> {
        let policy = self.options.retry;
        let mut last_error = String::new();

        for attempt in 1..=policy.max_attempts {
            match self.sink.write_batch(entity, batch).await? {
                WriteOutcome::Transient(error) => {
                    warn!(
                        entity,
                        attempt,
                        max_attempts = policy.max_attempts,
                        %error,
                        "write failed"
                    );
                    last_error = error;
                    if attempt < policy.max_attempts {
                        sleep(policy.delay).await;
                    }
                }
                WriteOutcome::Rejected(reason) => {
                    return Err(PortError::Rejected {
                        entity: entity.to_string(),
                        reason,
                    });
                }
                WriteOutcome::RetentionSkipped => {
                    warn!(entity, "points beyond retention policy were dropped by the target");
                    return Ok(WriteOutcome::RetentionSkipped);
                }
                outcome => return Ok(outcome),
            }
        }

        Err(PortError::RetriesExhausted {
            entity: entity.to_string(),
            attempts: policy.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::Precision;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Records batch sizes; replays scripted outcomes before succeeding
    #[derive(Default)]
    struct ScriptedSink {
        script: VecDeque<WriteOutcome>,
        batches: Vec<Vec<Record>>,
        attempts: usize,
        begun: Vec<String>,
    }

    #[async_trait]
    impl BatchSink for ScriptedSink {
        async fn begin_entity(&mut self, entity: &str, _first: &Record) -> Result<()> {
            self.begun.push(entity.to_string());
            Ok(())
        }

        async fn write_batch(&mut self, _entity: &str, batch: &[Record]) -> Result<WriteOutcome> {
            self.attempts += 1;
            let outcome = self.script.pop_front().unwrap_or(WriteOutcome::Written);
            if outcome.is_success() {
                self.batches.push(batch.to_vec());
            }
            Ok(outcome)
        }
    }

    fn lines(n: usize) -> Vec<Result<String>> {
        (1..=n)
            .map(|i| Ok(format!("cpu,host=a load={}.5 {}", i, 1_700_000_000_000_000_000i64 + i as i64)))
            .collect()
    }

    fn options(batch_size: usize) -> LoadOptions {
        LoadOptions {
            batch_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_batch_boundaries() {
        for (n, b, expected) in [
            (12, 5, vec![5, 5, 2]),
            (10, 5, vec![5, 5]),
            (3, 5, vec![3]),
            (0, 5, vec![]),
        ] {
            let mut loader = BatchLoader::new(ScriptedSink::default(), options(b));
            let stats = loader.load_entity("cpu", lines(n)).await.unwrap();
            let sizes: Vec<usize> = loader.sink().batches.iter().map(Vec::len).collect();
            assert_eq!(sizes, expected, "n={} b={}", n, b);
            assert_eq!(stats.batches as usize, expected.len());
            assert_eq!(stats.records as usize, n);
        }
    }

    #[tokio::test]
    async fn test_invalid_lines_are_skipped() {
        let input = vec![
            Ok("cpu load=1 100".to_string()),
            Ok("garbage".to_string()),
            Ok(String::new()),
            Ok("cpu load=2 200".to_string()),
        ];
        let mut loader = BatchLoader::new(ScriptedSink::default(), options(10));
        let stats = loader.load_entity("cpu", input).await.unwrap();
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.records, 2);
        assert_eq!(loader.sink().begun, vec!["cpu"]);
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_skipped() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut content = b"cpu load=1 100\n".to_vec();
        content.extend_from_slice(b"cpu,host=\xff\xfe load=2 200\n");
        content.extend_from_slice(b"cpu load=3 300\n");
        std::fs::write(temp_dir.path().join("cpu"), content).unwrap();
        let backup = crate::transport::BackupDir::new(temp_dir.path(), false);

        let mut loader = BatchLoader::new(ScriptedSink::default(), options(10));
        let stats = loader
            .load_entity("cpu", backup.open("cpu").unwrap())
            .await
            .unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.lines, 3);
        let timestamps: Vec<i64> = loader.sink().batches[0].iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![100, 300]);
    }

    #[test]
    fn test_check_precision() {
        let loader = BatchLoader::new(ScriptedSink::default(), options(10));
        let ns = Record::new("cpu", 1_700_000_000_000_000_000).with_field("load", 1.0);
        let secs = Record::new("cpu", 1_700_000_000).with_field("load", 1.0);
        assert!(!loader.check_precision("cpu", &ns));
        assert!(loader.check_precision("cpu", &secs));

        let loader = BatchLoader::new(
            ScriptedSink::default(),
            LoadOptions {
                input_precision: Precision::Seconds,
                ..options(10)
            },
        );
        assert!(!loader.check_precision("cpu", &secs));
        assert!(loader.check_precision("cpu", &ns));
    }

    #[tokio::test]
    async fn test_read_error_aborts() {
        let input = vec![
            Ok("cpu load=1 100".to_string()),
            Err(PortError::Io(std::io::Error::other("disk gone"))),
        ];
        let mut loader = BatchLoader::new(ScriptedSink::default(), options(10));
        assert!(loader.load_entity("cpu", input).await.is_err());
        assert!(loader.sink().batches.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let sink = ScriptedSink {
            script: VecDeque::from(vec![
                WriteOutcome::Transient("503 HTTP error".into()),
                WriteOutcome::Transient("connection reset".into()),
            ]),
            ..Default::default()
        };
        let mut loader = BatchLoader::new(sink, options(10));

        let start = Instant::now();
        let stats = loader.load_entity("cpu", lines(4)).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
        assert_eq!(loader.sink().attempts, 3);
        assert_eq!(stats.batches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_stops_the_load() {
        let sink = ScriptedSink {
            script: (0..10)
                .map(|i| WriteOutcome::Transient(format!("attempt {}", i + 1)))
                .collect(),
            ..Default::default()
        };
        let mut loader = BatchLoader::new(sink, options(2));

        let err = loader.load_entity("cpu", lines(4)).await.unwrap_err();
        match err {
            PortError::RetriesExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 10);
                assert_eq!(last_error, "attempt 10");
            }
            other => panic!("unexpected error: {}", other),
        }
        // The second batch was never attempted
        assert_eq!(loader.sink().attempts, 10);
        assert!(loader.sink().batches.is_empty());
    }

    #[tokio::test]
    async fn test_retention_skip_is_success() {
        let sink = ScriptedSink {
            script: VecDeque::from(vec![WriteOutcome::RetentionSkipped]),
            ..Default::default()
        };
        let mut loader = BatchLoader::new(sink, options(2));
        let stats = loader.load_entity("cpu", lines(4)).await.unwrap();
        assert_eq!(loader.sink().attempts, 2);
        assert_eq!(stats.dropped_batches, 1);
        assert_eq!(stats.batches, 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let sink = ScriptedSink {
            script: VecDeque::from(vec![WriteOutcome::Rejected("400 unable to parse".into())]),
            ..Default::default()
        };
        let mut loader = BatchLoader::new(sink, options(2));
        let err = loader.load_entity("cpu", lines(4)).await.unwrap_err();
        assert!(matches!(err, PortError::Rejected { .. }));
        assert_eq!(loader.sink().attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_delay_and_precision() {
        let options = LoadOptions {
            batch_size: 2,
            chunk_delay: Some(Duration::from_millis(500)),
            retry: RetryPolicy::default(),
            input_precision: Precision::Nanoseconds,
            target_precision: Precision::Seconds,
            ..Default::default()
        };
        let mut loader = BatchLoader::new(ScriptedSink::default(), options);

        let start = Instant::now();
        loader.load_entity("cpu", lines(3)).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
        assert_eq!(loader.sink().batches[0][0].timestamp, 1_700_000_000);
    }
}
