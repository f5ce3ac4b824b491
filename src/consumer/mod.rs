#[cfg(test)]
mod tests;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerMessage, MessageSubscriber};
use crate::codec;
use crate::sink::{ApplyOutcome, Sink, SinkError};
use crate::types::TransactionId;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Halting on non-retryable sink failure for transaction [{transaction_id}]: {source}")]
    SinkFatal {
        transaction_id: TransactionId,
        source: SinkError
    }
}

/// What to do when the sink rejects a message with a non-retryable error.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum FatalSinkPolicy {
    /// Log the incident, commit the offset and move on. The message is not redelivered.
    #[default]
    CommitAndSkip,
    /// Stop consuming without committing, leaving the message for redelivery.
    Halt
}

impl FromStr for FatalSinkPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "skip" => Ok(FatalSinkPolicy::CommitAndSkip),
            "halt" => Ok(FatalSinkPolicy::Halt),
            _ => Err(format!("expected 'skip' or 'halt', got '{value}'"))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Longest a single poll waits for a message.
    pub poll_interval: Duration,
    /// Pause before re-polling after a retryable sink failure.
    pub retry_backoff: Duration,
    pub on_fatal_sink_error: FatalSinkPolicy
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(1),
            on_fatal_sink_error: FatalSinkPolicy::default()
        }
    }
}

/// How one pass through the poll/process/commit cycle ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MessageOutcome {
    /// The poll interval elapsed without a message.
    Idle,
    /// The broker reported an error instead of a message.
    BrokerError,
    Applied(ApplyOutcome),
    SkippedMalformed,
    SkippedFatal,
    /// The sink failed transiently; the message was left uncommitted for redelivery.
    RetryScheduled
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ConsumerStats {
    pub polled: usize,
    pub applied: usize,
    pub already_present: usize,
    pub skipped_malformed: usize,
    pub skipped_fatal: usize,
    pub broker_errors: usize,
    pub retried: usize
}

impl ConsumerStats {
    pub fn record(&mut self, outcome: MessageOutcome) {
        if outcome != MessageOutcome::Idle {
            self.polled += 1;
        }

        match outcome {
            MessageOutcome::Idle => {},
            MessageOutcome::BrokerError => self.broker_errors += 1,
            MessageOutcome::Applied(ApplyOutcome::Inserted) => self.applied += 1,
            MessageOutcome::Applied(ApplyOutcome::AlreadyPresent) => self.already_present += 1,
            MessageOutcome::SkippedMalformed => self.skipped_malformed += 1,
            MessageOutcome::SkippedFatal => self.skipped_fatal += 1,
            MessageOutcome::RetryScheduled => self.retried += 1
        }
    }

    pub fn merge(&mut self, other: &ConsumerStats) {
        self.polled += other.polled;
        self.applied += other.applied;
        self.already_present += other.already_present;
        self.skipped_malformed += other.skipped_malformed;
        self.skipped_fatal += other.skipped_fatal;
        self.broker_errors += other.broker_errors;
        self.retried += other.retried;
    }
}

enum Disposition {
    Commit(MessageOutcome),
    Discard(MessageOutcome)
}

enum ConsumerState {
    Polling,
    Processing(BrokerMessage),
    Committing(BrokerMessage, MessageOutcome)
}

/// Applies broker messages to the sink, committing offsets only after the write.
///
/// Messages are handled strictly one at a time, so the sink sees each partition
/// in offset order.
pub struct TransactionConsumer<B: MessageSubscriber, K: Sink> {
    subscriber: B,
    sink: Arc<K>,
    settings: ConsumerSettings
}

impl<B: MessageSubscriber, K: Sink> TransactionConsumer<B, K> {
    pub fn new(subscriber: B, sink: Arc<K>, settings: ConsumerSettings) -> Self {
        Self {
            subscriber,
            sink,
            settings
        }
    }

    /// Consumes until `shutdown` is cancelled, then returns the tallies.
    ///
    /// Cancellation is only observed while waiting for a message or sitting out
    /// a retry backoff, so a sink write in progress always completes first.
    ///
    /// # Errors
    /// Returns `ConsumerError::SinkFatal` when the policy is `Halt` and the sink
    /// rejects a message permanently.
    #[cfg(any(test, feature = "kafka"))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<ConsumerStats, ConsumerError> {
        let mut stats = ConsumerStats::default();

        info!(policy = ?self.settings.on_fatal_sink_error, "Consumer started");

        while !shutdown.is_cancelled() {
            let outcome = self.process_next(&shutdown).await?;
            stats.record(outcome);
        }

        info!(?stats, "Consumer stopped");

        Ok(stats)
    }

    /// Runs one full POLLING → PROCESSING → COMMITTING cycle.
    pub async fn process_next(&self, shutdown: &CancellationToken) -> Result<MessageOutcome, ConsumerError> {
        let mut state = ConsumerState::Polling;

        loop {
            state = match state {
                ConsumerState::Polling => {
                    let polled = select! {
                        _ = shutdown.cancelled() => return Ok(MessageOutcome::Idle),
                        polled = self.subscriber.poll(self.settings.poll_interval) => polled
                    };

                    match polled {
                        None => return Ok(MessageOutcome::Idle),
                        Some(Err(error)) => {
                            warn!(outcome = "broker_error", "{error}");
                            return Ok(MessageOutcome::BrokerError);
                        }
                        Some(Ok(message)) => ConsumerState::Processing(message)
                    }
                }
                ConsumerState::Processing(message) => match self.process(&message, shutdown).await? {
                    Disposition::Commit(outcome) => ConsumerState::Committing(message, outcome),
                    Disposition::Discard(outcome) => return Ok(outcome)
                },
                ConsumerState::Committing(message, outcome) => {
                    self.commit(&message).await;
                    return Ok(outcome);
                }
            };
        }
    }

    /// Decodes and applies one message, deciding whether its offset is committed.
    async fn process(&self, message: &BrokerMessage, shutdown: &CancellationToken) -> Result<Disposition, ConsumerError> {
        let decoded = match message.payload.as_deref() {
            Some(payload) => codec::deserialize(payload),
            None => Err(codec::CodecError::MalformedPayload("message has no payload".to_string()))
        };

        let transaction = match decoded {
            Ok(transaction) => transaction,
            Err(error) => {
                warn!(
                    key = ?message.key,
                    partition = message.partition,
                    offset = message.offset,
                    outcome = "skipped_malformed",
                    "{error}"
                );
                return Ok(Disposition::Discard(MessageOutcome::SkippedMalformed));
            }
        };

        info!(
            transaction_id = %transaction.transaction_id,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            outcome = "consumed",
            "Message consumed"
        );

        match self.sink.apply(&transaction).await {
            Ok(applied) => {
                let outcome = match applied {
                    ApplyOutcome::Inserted => "applied",
                    ApplyOutcome::AlreadyPresent => "already_present"
                };

                info!(
                    transaction_id = %transaction.transaction_id,
                    partition = message.partition,
                    offset = message.offset,
                    outcome,
                    "Message applied"
                );
                Ok(Disposition::Commit(MessageOutcome::Applied(applied)))
            }
            Err(error) if error.is_retryable() => {
                warn!(
                    transaction_id = %transaction.transaction_id,
                    partition = message.partition,
                    offset = message.offset,
                    outcome = "retry_scheduled",
                    "{error}"
                );

                if let Err(rewind_error) = self.subscriber.rewind(message).await {
                    warn!(transaction_id = %transaction.transaction_id, "Could not rewind for redelivery: {rewind_error}");
                }

                select! {
                    _ = shutdown.cancelled() => {},
                    _ = sleep(self.settings.retry_backoff) => {}
                }

                Ok(Disposition::Discard(MessageOutcome::RetryScheduled))
            }
            Err(error) => match self.settings.on_fatal_sink_error {
                FatalSinkPolicy::CommitAndSkip => {
                    error!(
                        transaction_id = %transaction.transaction_id,
                        partition = message.partition,
                        offset = message.offset,
                        outcome = "skipped_fatal",
                        "{error}"
                    );
                    Ok(Disposition::Commit(MessageOutcome::SkippedFatal))
                }
                FatalSinkPolicy::Halt => Err(ConsumerError::SinkFatal {
                    transaction_id: transaction.transaction_id,
                    source: error
                })
            }
        }
    }

    async fn commit(&self, message: &BrokerMessage) {
        match self.subscriber.commit(message).await {
            Ok(()) => debug!(partition = message.partition, offset = message.offset, "Offset committed"),
            //NOTE: The message will be redelivered after a restart; the sink turns that into a no-op
            Err(error) => warn!(partition = message.partition, offset = message.offset, "{error}")
        }
    }
}
