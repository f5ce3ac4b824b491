use super::{ConsumerError, ConsumerSettings, FatalSinkPolicy, MessageOutcome, TransactionConsumer};
use crate::broker::{MemoryBroker, MemorySubscriber, MessagePublisher};
use crate::codec;
use crate::models::{fixtures, Transaction};
use crate::sink::{ApplyOutcome, MemorySink, Sink, SinkError};

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tokio_util::sync::CancellationToken;

const GROUP: &str = "transaction-consumer";

fn settings(policy: FatalSinkPolicy) -> ConsumerSettings {
    ConsumerSettings {
        poll_interval: Duration::from_millis(20),
        retry_backoff: Duration::from_millis(5),
        on_fatal_sink_error: policy
    }
}

async fn publish(broker: &MemoryBroker, transaction: &Transaction) -> Result<()> {
    broker.publish(&transaction.transaction_id, &codec::serialize(transaction)?)?.await?;

    Ok(())
}

async fn ready_sink() -> Result<Arc<MemorySink>> {
    let sink = Arc::new(MemorySink::new());
    sink.ensure_schema().await?;

    Ok(sink)
}

fn consumer(broker: &MemoryBroker, sink: &Arc<MemorySink>, policy: FatalSinkPolicy) -> Result<TransactionConsumer<MemorySubscriber, MemorySink>> {
    Ok(TransactionConsumer::new(broker.subscriber(GROUP)?, sink.clone(), settings(policy)))
}

/// Drives the consumer until a poll comes back empty.
async fn drain(consumer: &TransactionConsumer<MemorySubscriber, MemorySink>) -> Result<Vec<MessageOutcome>> {
    let shutdown = CancellationToken::new();
    let mut outcomes = Vec::new();

    loop {
        match consumer.process_next(&shutdown).await? {
            MessageOutcome::Idle => return Ok(outcomes),
            outcome => outcomes.push(outcome)
        }
    }
}

#[tokio::test]
async fn test_messages_are_applied_and_committed() -> Result<()> {
    let broker = MemoryBroker::new("transactions", 1);
    let sink = ready_sink().await?;

    publish(&broker, &fixtures::transaction("tx-1")).await?;
    publish(&broker, &fixtures::transaction("tx-2")).await?;

    let outcomes = drain(&consumer(&broker, &sink, FatalSinkPolicy::CommitAndSkip)?).await?;

    assert_eq!(outcomes, vec![MessageOutcome::Applied(ApplyOutcome::Inserted); 2]);
    assert_eq!(sink.len(), 2);
    assert_eq!(broker.committed_offset(GROUP, 0), Some(2));

    Ok(())
}

#[tokio::test]
async fn test_malformed_payload_is_skipped_and_the_loop_continues() -> Result<()> {
    let broker = MemoryBroker::new("transactions", 1);
    let sink = ready_sink().await?;

    broker.publish("garbage", b"{\"transaction_id\": 42")?.await?;
    publish(&broker, &fixtures::transaction("tx-1")).await?;

    let outcomes = drain(&consumer(&broker, &sink, FatalSinkPolicy::CommitAndSkip)?).await?;

    assert_eq!(outcomes, vec![MessageOutcome::SkippedMalformed, MessageOutcome::Applied(ApplyOutcome::Inserted)]);
    assert!(sink.get("tx-1").is_some());

    Ok(())
}

#[tokio::test]
async fn test_broker_errors_are_discarded_without_stopping() -> Result<()> {
    let broker = MemoryBroker::new("transactions", 1);
    let sink = ready_sink().await?;

    publish(&broker, &fixtures::transaction("tx-1")).await?;
    broker.fail_next_polls(2);

    let outcomes = drain(&consumer(&broker, &sink, FatalSinkPolicy::CommitAndSkip)?).await?;

    assert_eq!(outcomes, vec![
        MessageOutcome::BrokerError,
        MessageOutcome::BrokerError,
        MessageOutcome::Applied(ApplyOutcome::Inserted),
    ]);

    Ok(())
}

#[tokio::test]
async fn test_retryable_sink_failure_leaves_offset_uncommitted_until_redelivery_succeeds() -> Result<()> {
    let broker = MemoryBroker::new("transactions", 1);
    let sink = ready_sink().await?;
    let consumer = consumer(&broker, &sink, FatalSinkPolicy::CommitAndSkip)?;
    let shutdown = CancellationToken::new();

    publish(&broker, &fixtures::transaction("tx-1")).await?;
    sink.fail_next(SinkError::Retryable("connection reset".to_string()));

    assert_eq!(consumer.process_next(&shutdown).await?, MessageOutcome::RetryScheduled);
    assert_eq!(broker.committed_offset(GROUP, 0), None);
    assert!(sink.is_empty());

    assert_eq!(consumer.process_next(&shutdown).await?, MessageOutcome::Applied(ApplyOutcome::Inserted));
    assert_eq!(broker.committed_offset(GROUP, 0), Some(1));

    Ok(())
}

#[tokio::test]
async fn test_fatal_sink_failure_is_committed_and_skipped_by_default() -> Result<()> {
    let broker = MemoryBroker::new("transactions", 1);
    let sink = ready_sink().await?;

    publish(&broker, &fixtures::transaction("tx-poison")).await?;
    publish(&broker, &fixtures::transaction("tx-2")).await?;
    sink.fail_next(SinkError::Fatal("value too long for type character varying(255)".to_string()));

    let outcomes = drain(&consumer(&broker, &sink, FatalSinkPolicy::default())?).await?;

    assert_eq!(outcomes, vec![MessageOutcome::SkippedFatal, MessageOutcome::Applied(ApplyOutcome::Inserted)]);
    assert!(sink.get("tx-poison").is_none());
    assert_eq!(broker.committed_offset(GROUP, 0), Some(2));

    Ok(())
}

#[tokio::test]
async fn test_halt_policy_stops_without_committing() -> Result<()> {
    let broker = MemoryBroker::new("transactions", 1);
    let sink = ready_sink().await?;

    publish(&broker, &fixtures::transaction("tx-poison")).await?;
    sink.fail_next(SinkError::Fatal("permission denied for table transactions_sink".to_string()));

    let result = consumer(&broker, &sink, FatalSinkPolicy::Halt)?.run(CancellationToken::new()).await;

    match result {
        Err(ConsumerError::SinkFatal { transaction_id, .. }) => assert_eq!(transaction_id, "tx-poison"),
        other => return Err(anyhow!("expected SinkFatal, got {other:?}"))
    }

    assert_eq!(broker.committed_offset(GROUP, 0), None);

    Ok(())
}

#[tokio::test]
async fn test_restart_after_missed_commit_reprocesses_without_error() -> Result<()> {
    let broker = MemoryBroker::new("transactions", 1);
    let sink = ready_sink().await?;
    let shutdown = CancellationToken::new();

    publish(&broker, &fixtures::transaction("tx-1")).await?;

    // The sink write lands but the commit does not, as if the process died in between.
    broker.fail_next_commits(1);
    let crashed = consumer(&broker, &sink, FatalSinkPolicy::CommitAndSkip)?;
    assert_eq!(crashed.process_next(&shutdown).await?, MessageOutcome::Applied(ApplyOutcome::Inserted));
    drop(crashed);

    assert_eq!(broker.committed_offset(GROUP, 0), None);

    let restarted = consumer(&broker, &sink, FatalSinkPolicy::CommitAndSkip)?;
    assert_eq!(restarted.process_next(&shutdown).await?, MessageOutcome::Applied(ApplyOutcome::AlreadyPresent));
    assert_eq!(broker.committed_offset(GROUP, 0), Some(1));
    assert_eq!(sink.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_redelivered_versions_of_an_id_keep_the_first_application() -> Result<()> {
    let broker = MemoryBroker::new("transactions", 4);
    let sink = ready_sink().await?;
    let original = fixtures::transaction("tx-1");

    publish(&broker, &original).await?;
    publish(&broker, &fixtures::conflicting_version("tx-1")).await?;

    let outcomes = drain(&consumer(&broker, &sink, FatalSinkPolicy::CommitAndSkip)?).await?;

    assert_eq!(outcomes, vec![
        MessageOutcome::Applied(ApplyOutcome::Inserted),
        MessageOutcome::Applied(ApplyOutcome::AlreadyPresent),
    ]);
    assert_eq!(sink.get("tx-1").ok_or_else(|| anyhow!("row missing"))?, original);

    Ok(())
}

#[tokio::test]
async fn test_run_stops_promptly_when_cancelled() -> Result<()> {
    let broker = MemoryBroker::new("transactions", 1);
    let sink = ready_sink().await?;
    let consumer = TransactionConsumer::new(broker.subscriber(GROUP)?, sink.clone(), ConsumerSettings {
        poll_interval: Duration::from_secs(30),
        ..settings(FatalSinkPolicy::CommitAndSkip)
    });

    publish(&broker, &fixtures::transaction("tx-1")).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let stats = consumer.run(shutdown).await?;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.polled, 1);

    Ok(())
}

#[tokio::test]
async fn test_cancellation_cuts_the_retry_backoff_short() -> Result<()> {
    let broker = MemoryBroker::new("transactions", 1);
    let sink = ready_sink().await?;
    let consumer = TransactionConsumer::new(broker.subscriber(GROUP)?, sink.clone(), ConsumerSettings {
        retry_backoff: Duration::from_secs(30),
        ..settings(FatalSinkPolicy::CommitAndSkip)
    });

    publish(&broker, &fixtures::transaction("tx-1")).await?;
    sink.fail_next(SinkError::Retryable("could not serialize access".to_string()));

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let stats = consumer.run(shutdown).await?;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.applied, 0);
    assert_eq!(broker.committed_offset(GROUP, 0), None);
    assert!(sink.is_empty());

    Ok(())
}

#[test]
fn test_fatal_policy_parses_configuration_values() -> Result<()> {
    assert_eq!(FatalSinkPolicy::from_str("skip").map_err(|e| anyhow!(e))?, FatalSinkPolicy::CommitAndSkip);
    assert_eq!(FatalSinkPolicy::from_str("HALT").map_err(|e| anyhow!(e))?, FatalSinkPolicy::Halt);
    assert!(FatalSinkPolicy::from_str("retry").is_err());

    Ok(())
}
