//! Ingestion status tracker (§4.6): polls a status-table row until it reaches a
//! terminal state, backing off on poll failures on top of the base poll interval.

use crate::retry::{cancellable_sleep, ExponentialBackoff, Retry};
use kusto_core::error::{KustoError, Operation, Result};
use kusto_core::transport::TableClient;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Status {
    Pending,
    Succeeded,
    Failed,
    PartiallySucceeded,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed | Status::PartiallySucceeded)
    }
}

/// The status-table row as the service writes it back, kept intentionally loose
/// (`details` carries whatever diagnostic payload the row holds).
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionStatusRecord {
    #[serde(rename = "Status")]
    pub status: Status,
    #[serde(rename = "Details", default)]
    pub details: Option<String>,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct StatusTrackerOptions {
    pub poll_interval: Duration,
    pub failure_backoff: ExponentialBackoffParams,
}

impl Default for StatusTrackerOptions {
    fn default() -> Self {
        StatusTrackerOptions { poll_interval: Duration::from_secs(10), failure_backoff: ExponentialBackoffParams::default() }
    }
}

/// Parameters for the poll-failure backoff (§4.6 defaults): min 1s, max 30s,
/// multiplier 1.5, full jitter.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoffParams {
    pub min: Duration,
    pub max: Duration,
    pub factor: u32,
    pub max_retries: u32,
}

impl Default for ExponentialBackoffParams {
    fn default() -> Self {
        ExponentialBackoffParams { min: Duration::from_secs(1), max: Duration::from_secs(30), factor: 2, max_retries: u32::MAX }
    }
}

/// Polls `table_client` at `table_url`/`row_key` until a terminal `Status`, caller
/// cancellation, or an unrecoverable poll failure (§4.6). `None` rows (not written
/// yet) are treated as "still pending", not an error.
pub struct StatusTracker {
    table_client: Arc<dyn TableClient>,
    table_url: String,
    row_key: String,
    opts: StatusTrackerOptions,
}

impl StatusTracker {
    pub fn new(table_client: Arc<dyn TableClient>, table_url: String, row_key: String, opts: StatusTrackerOptions) -> Self {
        StatusTracker { table_client, table_url, row_key, opts }
    }

    /// Blocks until a terminal record is observed or an error occurs; cancellation
    /// surfaces as `KustoError::Cancelled`.
    pub async fn wait(&self, cancel: CancellationToken) -> Result<IngestionStatusRecord> {
        let mut backoff = ExponentialBackoff::new(self.opts.failure_backoff.max_retries)
            .with_min(self.opts.failure_backoff.min)
            .with_max(self.opts.failure_backoff.max)
            .with_factor(self.opts.failure_backoff.factor)
            .with_jitter(1.0);

        loop {
            if cancel.is_cancelled() {
                return Err(KustoError::cancelled(Operation::StatusPoll));
            }

            match self.table_client.read(&self.table_url, &self.row_key, cancel.clone()).await {
                Ok(Some(raw)) => {
                    let record: IngestionStatusRecord = serde_json::from_value(raw)
                        .map_err(|e| KustoError::decode(Operation::StatusPoll, format!("malformed status row: {e}")))?;
                    if record.status.is_terminal() {
                        return Ok(record);
                    }
                    backoff.reset();
                    cancellable_sleep(self.opts.poll_interval, &cancel, Operation::StatusPoll).await?;
                }
                Ok(None) => {
                    backoff.reset();
                    cancellable_sleep(self.opts.poll_interval, &cancel, Operation::StatusPoll).await?;
                }
                Err(e) => match backoff.next_backoff(&e) {
                    Some(delay) => cancellable_sleep(delay, &cancel, Operation::StatusPoll).await?,
                    None => return Err(e),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Scripted {
        Row(Option<serde_json::Value>),
        Fail,
    }

    struct ScriptedTableClient {
        responses: Vec<Scripted>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TableClient for ScriptedTableClient {
        async fn read(&self, _table_url: &str, _row_key: &str, _cancel: CancellationToken) -> Result<Option<serde_json::Value>> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.responses[i.min(self.responses.len() - 1)] {
                Scripted::Row(v) => Ok(v.clone()),
                Scripted::Fail => Err(KustoError::HttpError { op: Operation::StatusPoll, message: "poll failed".to_string(), source: None }),
            }
        }
    }

    fn fast_opts() -> StatusTrackerOptions {
        StatusTrackerOptions {
            poll_interval: Duration::from_millis(1),
            failure_backoff: ExponentialBackoffParams { min: Duration::from_millis(1), max: Duration::from_millis(5), factor: 1, max_retries: 5 },
        }
    }

    #[tokio::test]
    async fn polls_until_terminal_status() {
        let client = Arc::new(ScriptedTableClient {
            responses: vec![
                Scripted::Row(None),
                Scripted::Row(Some(serde_json::json!({"Status": "Pending"}))),
                Scripted::Row(Some(serde_json::json!({"Status": "Succeeded"}))),
            ],
            calls: AtomicUsize::new(0),
        });
        let tracker = StatusTracker::new(client, "https://t".to_string(), "row".to_string(), fast_opts());
        let record = tracker.wait(CancellationToken::new()).await.unwrap();
        assert_eq!(record.status, Status::Succeeded);
    }

    #[tokio::test]
    async fn recovers_from_transient_poll_failure() {
        let client = Arc::new(ScriptedTableClient {
            responses: vec![Scripted::Fail, Scripted::Row(Some(serde_json::json!({"Status": "Failed", "ErrorCode": "BadRequest"})))],
            calls: AtomicUsize::new(0),
        });
        let tracker = StatusTracker::new(client, "https://t".to_string(), "row".to_string(), fast_opts());
        let record = tracker.wait(CancellationToken::new()).await.unwrap();
        assert_eq!(record.status, Status::Failed);
        assert_eq!(record.error_code.as_deref(), Some("BadRequest"));
    }
}
