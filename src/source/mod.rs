mod csv_source;
mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Transaction;

pub use csv_source::CsvRecordSource;
pub use memory::MemoryRecordSource;
pub use postgres::PgRecordSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Record source unavailable: {0}")]
    Unavailable(String),
    #[error("Record source query failed: {0}")]
    Query(String)
}

impl From<sqlx::Error> for SourceError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                SourceError::Unavailable(error.to_string())
            }
            other => SourceError::Query(other.to_string())
        }
    }
}

/// Yields transactions from durable storage.
#[async_trait]
pub trait RecordSource: Send + Sync + 'static {
    /// Returns at most `limit` records, in an order chosen by the implementation.
    ///
    /// Records that cannot be decoded are logged and left out of the result.
    async fn fetch(&self, limit: usize) -> Result<Vec<Transaction>, SourceError>;
}
