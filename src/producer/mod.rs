mod delivery;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::broker::MessagePublisher;
use crate::codec;
use crate::source::{RecordSource, SourceError};
use crate::types::TransactionId;

use delivery::DeliveryTracker;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error(transparent)]
    Source(#[from] SourceError)
}

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    /// Pause between consecutive sends.
    pub pacing: Duration,
    /// Upper bound on waiting for outstanding acknowledgements.
    pub flush_timeout: Duration
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(500),
            flush_timeout: Duration::from_secs(10)
        }
    }
}

/// Result of one `publish_batch` run.
///
/// `failed_ids` and `unacknowledged_ids` are what a caller-side retry policy
/// would republish; nothing is retried here.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct BatchReport {
    pub fetched: usize,
    pub submitted: usize,
    pub delivered: usize,
    pub failed_ids: Vec<TransactionId>,
    pub unacknowledged_ids: Vec<TransactionId>
}

/// Publishes source records to the broker, keyed by `transaction_id`.
pub struct TransactionProducer<S: RecordSource, P: MessagePublisher> {
    source: Arc<S>,
    publisher: Arc<P>,
    settings: ProducerSettings
}

impl<S: RecordSource, P: MessagePublisher> TransactionProducer<S, P> {
    pub fn new(source: Arc<S>, publisher: Arc<P>, settings: ProducerSettings) -> Self {
        Self {
            source,
            publisher,
            settings
        }
    }

    /// Fetches up to `limit` records and publishes each one.
    ///
    /// Per-message failures never abort the batch. The call returns once every
    /// message is acknowledged or the flush timeout elapses, whichever is first.
    ///
    /// # Errors
    /// Returns `ProducerError::Source` when the record source cannot be read.
    pub async fn publish_batch(&self, limit: usize) -> Result<BatchReport, ProducerError> {
        let transactions = self.source.fetch(limit).await?;
        let tracker = DeliveryTracker::new();
        let mut submitted = 0;

        info!(fetched = transactions.len(), limit, "Publishing batch");

        for (index, transaction) in transactions.iter().enumerate() {
            if index > 0 && !self.settings.pacing.is_zero() {
                sleep(self.settings.pacing).await;
            }

            let transaction_id = transaction.transaction_id.clone();

            let payload = match codec::serialize(transaction) {
                Ok(payload) => payload,
                Err(error) => {
                    tracker.record_failure(transaction_id, error.to_string());
                    continue;
                }
            };

            match self.publisher.publish(&transaction_id, &payload) {
                Ok(pending) => {
                    tracker.track(transaction_id, pending);
                    submitted += 1;
                }
                Err(error) => tracker.record_failure(transaction_id, error.to_string())
            }
        }

        let summary = tracker.drain(self.settings.flush_timeout).await;

        if !summary.unacknowledged_ids.is_empty() {
            warn!(
                unacknowledged = summary.unacknowledged_ids.len(),
                "Flush timeout elapsed before every message was acknowledged"
            );
        }

        let report = BatchReport {
            fetched: transactions.len(),
            submitted,
            delivered: summary.delivered,
            failed_ids: summary.failed_ids,
            unacknowledged_ids: summary.unacknowledged_ids
        };

        info!(
            fetched = report.fetched,
            submitted = report.submitted,
            delivered = report.delivered,
            failed = report.failed_ids.len(),
            unacknowledged = report.unacknowledged_ids.len(),
            "Batch complete"
        );

        Ok(report)
    }
}
