use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::broker::PendingDelivery;
use crate::types::TransactionId;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed
}

/// Outcome of every message handed to a [`DeliveryTracker`], taken when it drained.
#[derive(Debug, Default)]
pub struct DeliverySummary {
    pub delivered: usize,
    pub failed_ids: Vec<TransactionId>,
    pub unacknowledged_ids: Vec<TransactionId>
}

/// Counts in-flight deliveries and lets the caller wait for all of them.
///
/// Each tracked delivery runs in its own task holding a clone of the guard
/// sender. Once every task finishes and the tracker drops its own sender, the
/// guard channel closes, which is the completion barrier `drain` waits on.
///
/// Outcomes are kept per submission, so an id handed over twice counts twice.
pub struct DeliveryTracker {
    outcomes: Arc<DashMap<usize, (TransactionId, DeliveryStatus)>>,
    next_slot: AtomicUsize,
    guard_sender: Option<mpsc::Sender<()>>,
    guard_receiver: mpsc::Receiver<()>
}

impl DeliveryTracker {
    pub fn new() -> Self {
        let (guard_sender, guard_receiver) = mpsc::channel(1);

        Self {
            outcomes: Arc::new(DashMap::new()),
            next_slot: AtomicUsize::new(0),
            guard_sender: Some(guard_sender),
            guard_receiver
        }
    }

    /// Registers the delivery callback for one submitted message; never blocks.
    pub fn track(&self, transaction_id: TransactionId, pending: PendingDelivery) {
        let guard_sender = self.guard_sender.clone();
        let outcomes = self.outcomes.clone();
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);

        outcomes.insert(slot, (transaction_id.clone(), DeliveryStatus::Pending));

        spawn(async move {
            match pending.await {
                Ok(receipt) => {
                    info!(
                        key = %transaction_id,
                        transaction_id = %transaction_id,
                        partition = receipt.partition,
                        offset = receipt.offset,
                        outcome = "published",
                        "Message delivered"
                    );
                    outcomes.insert(slot, (transaction_id, DeliveryStatus::Delivered));
                }
                Err(error) => {
                    warn!(transaction_id = %transaction_id, outcome = "delivery_failed", "{error}");
                    outcomes.insert(slot, (transaction_id, DeliveryStatus::Failed));
                }
            }

            drop(guard_sender);
        });
    }

    /// Records a message that failed before it could be handed to the broker.
    pub fn record_failure(&self, transaction_id: TransactionId, reason: String) {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);

        warn!(transaction_id = %transaction_id, outcome = "delivery_failed", "{reason}");
        self.outcomes.insert(slot, (transaction_id, DeliveryStatus::Failed));
    }

    /// Status of every submission of `transaction_id`, in submission order.
    #[cfg(test)]
    pub fn statuses(&self, transaction_id: &str) -> Vec<DeliveryStatus> {
        let mut matching: Vec<(usize, DeliveryStatus)> = self.outcomes.iter()
            .filter(|entry| entry.value().0 == transaction_id)
            .map(|entry| (*entry.key(), entry.value().1))
            .collect();

        matching.sort_by_key(|(slot, _)| *slot);
        matching.into_iter().map(|(_, status)| status).collect()
    }

    /// Waits until every tracked delivery settles or `limit` elapses.
    ///
    /// Deliveries still outstanding at the deadline are reported as unacknowledged.
    pub async fn drain(mut self, limit: Duration) -> DeliverySummary {
        drop(self.guard_sender.take());

        if timeout(limit, self.guard_receiver.recv()).await.is_err() {
            warn!(timeout = ?limit, "Delivery drain timed out");
        }

        let mut summary = DeliverySummary::default();

        for entry in self.outcomes.iter() {
            let (transaction_id, status) = entry.value();

            match status {
                DeliveryStatus::Delivered => summary.delivered += 1,
                DeliveryStatus::Failed => summary.failed_ids.push(transaction_id.clone()),
                DeliveryStatus::Pending => summary.unacknowledged_ids.push(transaction_id.clone())
            }
        }

        summary.failed_ids.sort();
        summary.unacknowledged_ids.sort();

        summary
    }
}
