mod memory;
mod postgres;
#[cfg(test)]
mod tests;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Transaction;

pub use memory::MemorySink;
pub use postgres::PgSink;

/// SQLSTATE classes worth retrying: connection exception, transaction rollback,
/// insufficient resources and operator intervention.
const RETRYABLE_SQLSTATE_CLASSES: [&str; 4] = ["08", "40", "53", "57"];

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ApplyOutcome {
    Inserted,
    AlreadyPresent
}

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("Sink write failed (retryable): {0}")]
    Retryable(String),
    #[error("Sink write failed (fatal): {0}")]
    Fatal(String)
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Retryable(_))
    }
}

impl From<sqlx::Error> for SinkError {
    fn from(error: sqlx::Error) -> Self {
        let retryable = match &error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(database_error) => database_error.code()
                .is_some_and(|code| RETRYABLE_SQLSTATE_CLASSES.iter().any(|class| code.starts_with(class))),
            _ => false
        };

        if retryable {
            SinkError::Retryable(error.to_string())
        } else {
            SinkError::Fatal(error.to_string())
        }
    }
}

/// Destination table for consumed transactions.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Creates the destination table if it is absent; safe to call repeatedly.
    async fn ensure_schema(&self) -> Result<(), SinkError>;

    /// Inserts the transaction unless a row with its id already exists.
    ///
    /// An existing row is never overwritten, which makes redelivery a no-op.
    async fn apply(&self, transaction: &Transaction) -> Result<ApplyOutcome, SinkError>;
}
