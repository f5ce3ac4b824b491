use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::debug;

use crate::broker::{BrokerError, BrokerMessage, DeliveryReceipt, MessagePublisher, MessageSubscriber, PendingDelivery};

/// An in-process, partitioned, single-topic log.
///
/// Mirrors the broker contract the pipeline relies on: key-based partition
/// routing with per-partition order, per-group committed offsets, fresh groups
/// starting from the earliest offset, and at-least-once redelivery of anything
/// not committed. Faults can be injected to exercise the error paths.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>
}

struct BrokerState {
    topic: String,
    log: Mutex<TopicLog>,
    faults: Mutex<Faults>,
    published: Notify
}

struct TopicLog {
    partitions: Vec<Vec<StoredRecord>>,
    committed: HashMap<(String, i32), i64>
}

struct StoredRecord {
    key: String,
    payload: Vec<u8>
}

#[derive(Default)]
struct Faults {
    offline: bool,
    failed_deliveries: usize,
    acknowledgement_delay: Option<Duration>,
    failed_polls: usize,
    failed_commits: usize
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBroker {
    pub fn new(topic: &str, partition_count: usize) -> Self {
        let partition_count = partition_count.max(1);

        Self {
            state: Arc::new(BrokerState {
                topic: topic.to_string(),
                log: Mutex::new(TopicLog {
                    partitions: (0..partition_count).map(|_| Vec::new()).collect(),
                    committed: HashMap::new()
                }),
                faults: Mutex::new(Faults::default()),
                published: Notify::new()
            })
        }
    }

    /// Returns a publishing handle, failing when the broker is offline.
    pub fn publisher(&self) -> Result<MemoryBroker, BrokerError> {
        self.ensure_online()?;

        Ok(self.clone())
    }

    /// Joins `group`, resuming from its committed offsets or the earliest offset.
    pub fn subscriber(&self, group: &str) -> Result<MemorySubscriber, BrokerError> {
        self.ensure_online()?;

        let log = lock(&self.state.log);
        let positions = (0..log.partitions.len() as i32)
            .map(|partition| {
                let offset = log.committed.get(&(group.to_string(), partition)).copied().unwrap_or(0);
                (partition, offset)
            })
            .collect();

        debug!(group, topic = %self.state.topic, "Subscriber joined group");

        Ok(MemorySubscriber {
            state: self.state.clone(),
            group: group.to_string(),
            positions: Mutex::new(positions),
            next_partition: AtomicUsize::new(0)
        })
    }

    pub fn topic(&self) -> &str {
        &self.state.topic
    }

    pub fn partition_for(&self, key: &str) -> i32 {
        let partition_count = lock(&self.state.log).partitions.len() as u64;
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);

        (hasher.finish() % partition_count) as i32
    }

    /// Total number of messages stored across all partitions.
    #[cfg(test)]
    pub fn message_count(&self) -> usize {
        lock(&self.state.log).partitions.iter().map(Vec::len).sum()
    }

    #[cfg(test)]
    pub fn committed_offset(&self, group: &str, partition: i32) -> Option<i64> {
        lock(&self.state.log).committed.get(&(group.to_string(), partition)).copied()
    }

    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        lock(&self.state.faults).offline = offline;
    }

    /// The next `count` published messages are rejected by the broker.
    #[cfg(test)]
    pub fn fail_next_deliveries(&self, count: usize) {
        lock(&self.state.faults).failed_deliveries = count;
    }

    /// Acknowledgements arrive `delay` after the message is stored.
    #[cfg(test)]
    pub fn delay_acknowledgements(&self, delay: Duration) {
        lock(&self.state.faults).acknowledgement_delay = Some(delay);
    }

    /// The next `count` polls, from any subscriber, report a consume error.
    #[cfg(test)]
    pub fn fail_next_polls(&self, count: usize) {
        lock(&self.state.faults).failed_polls = count;
    }

    /// The next `count` commits, from any subscriber, fail.
    #[cfg(test)]
    pub fn fail_next_commits(&self, count: usize) {
        lock(&self.state.faults).failed_commits = count;
    }

    fn ensure_online(&self) -> Result<(), BrokerError> {
        if lock(&self.state.faults).offline {
            return Err(BrokerError::Unavailable(format!("in-memory broker for topic [{}] is offline", self.state.topic)));
        }

        Ok(())
    }
}

fn take_fault(counter: &mut usize) -> bool {
    if *counter == 0 {
        return false;
    }

    *counter -= 1;
    true
}

impl MessagePublisher for MemoryBroker {
    fn publish(&self, key: &str, payload: &[u8]) -> Result<PendingDelivery, BrokerError> {
        let (rejected, delay) = {
            let mut faults = lock(&self.state.faults);

            if faults.offline {
                return Err(BrokerError::Produce("broker is offline".to_string()));
            }

            (take_fault(&mut faults.failed_deliveries), faults.acknowledgement_delay)
        };

        if rejected {
            let key = key.to_string();
            return Ok(Box::pin(async move {
                Err(BrokerError::Delivery(format!("broker rejected message with key [{key}]")))
            }));
        }

        let partition = self.partition_for(key);
        let offset = {
            let mut log = lock(&self.state.log);
            let records = &mut log.partitions[partition as usize];
            records.push(StoredRecord { key: key.to_string(), payload: payload.to_vec() });
            (records.len() - 1) as i64
        };

        self.state.published.notify_waiters();

        Ok(Box::pin(async move {
            if let Some(delay) = delay {
                sleep(delay).await;
            }

            Ok(DeliveryReceipt { partition, offset })
        }))
    }
}

/// A member of one consumer group reading a [`MemoryBroker`] topic.
pub struct MemorySubscriber {
    state: Arc<BrokerState>,
    group: String,
    positions: Mutex<HashMap<i32, i64>>,
    next_partition: AtomicUsize
}

impl MemorySubscriber {
    /// Takes the next unread message, visiting partitions round-robin.
    fn next_message(&self) -> Option<BrokerMessage> {
        let mut positions = lock(&self.positions);
        let log = lock(&self.state.log);
        let partition_count = log.partitions.len();
        let start = self.next_partition.load(Ordering::Relaxed);

        for step in 0..partition_count {
            let partition = (start + step) % partition_count;
            let position = positions.entry(partition as i32).or_insert(0);

            if let Some(record) = log.partitions[partition].get(*position as usize) {
                let message = BrokerMessage {
                    topic: self.state.topic.clone(),
                    partition: partition as i32,
                    offset: *position,
                    key: Some(record.key.clone()),
                    payload: Some(record.payload.clone())
                };

                *position += 1;
                self.next_partition.store(partition + 1, Ordering::Relaxed);

                return Some(message);
            }
        }

        None
    }
}

#[async_trait]
impl MessageSubscriber for MemorySubscriber {
    async fn poll(&self, timeout: Duration) -> Option<Result<BrokerMessage, BrokerError>> {
        let deadline = Instant::now() + timeout;

        loop {
            let published = self.state.published.notified();

            if take_fault(&mut lock(&self.state.faults).failed_polls) {
                return Some(Err(BrokerError::Consume("transient fetch failure".to_string())));
            }

            if let Some(message) = self.next_message() {
                return Some(Ok(message));
            }

            if timeout_at(deadline, published).await.is_err() {
                return None;
            }
        }
    }

    async fn commit(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        if take_fault(&mut lock(&self.state.faults).failed_commits) {
            return Err(BrokerError::Commit(format!(
                "commit of partition [{}] offset [{}] rejected", message.partition, message.offset
            )));
        }

        lock(&self.state.log).committed.insert((self.group.clone(), message.partition), message.offset + 1);

        Ok(())
    }

    async fn rewind(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        lock(&self.positions).insert(message.partition, message.offset);

        Ok(())
    }
}
