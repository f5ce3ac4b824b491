use super::{ApplyOutcome, MemorySink, Sink, SinkError};
use crate::models::fixtures;

use std::borrow::Cow;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use sqlx::error::{DatabaseError, ErrorKind};
use thiserror::Error;

/// A server-side error carrying a chosen SQLSTATE.
#[derive(Debug, Error)]
#[error("{message}")]
struct ServerError {
    code: &'static str,
    message: String
}

impl DatabaseError for ServerError {
    fn message(&self) -> &str {
        &self.message
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.code))
    }

    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

fn server_error(code: &'static str) -> SinkError {
    SinkError::from(sqlx::Error::Database(Box::new(ServerError {
        code,
        message: format!("server reported SQLSTATE {code}")
    })))
}

#[tokio::test]
async fn test_applying_the_same_transaction_twice_yields_one_row() -> Result<()> {
    let sink = MemorySink::new();
    sink.ensure_schema().await?;

    let transaction = fixtures::transaction("tx-1");

    assert_eq!(sink.apply(&transaction).await?, ApplyOutcome::Inserted);
    assert_eq!(sink.apply(&transaction).await?, ApplyOutcome::AlreadyPresent);
    assert_eq!(sink.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_later_version_of_an_id_never_overwrites_the_first() -> Result<()> {
    let sink = MemorySink::new();
    sink.ensure_schema().await?;

    let original = fixtures::transaction("tx-1");
    let conflicting = fixtures::conflicting_version("tx-1");

    sink.apply(&original).await?;

    assert_eq!(sink.apply(&conflicting).await?, ApplyOutcome::AlreadyPresent);
    assert_eq!(sink.get("tx-1").ok_or_else(|| anyhow!("row missing"))?, original);

    Ok(())
}

#[tokio::test]
async fn test_ensure_schema_is_idempotent() -> Result<()> {
    let sink = MemorySink::new();

    assert!(matches!(sink.apply(&fixtures::transaction("tx-1")).await, Err(SinkError::Fatal(_))));

    sink.ensure_schema().await?;
    sink.ensure_schema().await?;

    assert_eq!(sink.apply(&fixtures::transaction("tx-1")).await?, ApplyOutcome::Inserted);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_writers_of_one_id_insert_exactly_once() -> Result<()> {
    let sink = Arc::new(MemorySink::new());
    sink.ensure_schema().await?;

    let mut handles = Vec::new();

    for _ in 0..16 {
        let sink = sink.clone();
        handles.push(tokio::spawn(async move { sink.apply(&fixtures::transaction("tx-race")).await }));
    }

    let mut inserted = 0;

    for handle in handles {
        if handle.await?? == ApplyOutcome::Inserted {
            inserted += 1;
        }
    }

    assert_eq!(inserted, 1);
    assert_eq!(sink.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_injected_failure_leaves_the_table_untouched() -> Result<()> {
    let sink = MemorySink::new();
    sink.ensure_schema().await?;

    sink.fail_next(SinkError::Retryable("connection reset".to_string()));

    assert!(matches!(sink.apply(&fixtures::transaction("tx-1")).await, Err(SinkError::Retryable(_))));
    assert!(sink.is_empty());
    assert_eq!(sink.apply(&fixtures::transaction("tx-1")).await?, ApplyOutcome::Inserted);

    Ok(())
}

#[test]
fn test_connection_level_database_errors_are_retryable() {
    let io_error = sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));

    assert!(SinkError::from(io_error).is_retryable());
    assert!(SinkError::from(sqlx::Error::PoolTimedOut).is_retryable());
    assert!(SinkError::from(sqlx::Error::PoolClosed).is_retryable());
    assert!(SinkError::from(sqlx::Error::Protocol("unexpected message".to_string())).is_retryable());
    assert!(SinkError::from(sqlx::Error::WorkerCrashed).is_retryable());
}

#[test]
fn test_sqlstate_class_decides_whether_a_server_error_is_retried() {
    // connection failure, serialization failure, too many connections, admin shutdown
    for code in ["08006", "40001", "53300", "57P01"] {
        assert!(server_error(code).is_retryable(), "{code} should be retryable");
    }

    // unique violation, numeric out of range, undefined table
    for code in ["23505", "22003", "42P01"] {
        assert!(!server_error(code).is_retryable(), "{code} should be fatal");
    }
}

#[test]
fn test_query_level_database_errors_are_fatal() {
    assert!(!SinkError::from(sqlx::Error::RowNotFound).is_retryable());
    assert!(!SinkError::from(sqlx::Error::ColumnNotFound("amount".to_string())).is_retryable());
}
