use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use async_trait::async_trait;
use csv::{ReaderBuilder, Trim};
use tokio::task::spawn_blocking;
use tracing::error;

use crate::models::Transaction;
use crate::source::{RecordSource, SourceError};

/// Reads transactions from a headed CSV file whose columns are the field names.
pub struct CsvRecordSource {
    path: PathBuf
}

impl CsvRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RecordSource for CsvRecordSource {
    async fn fetch(&self, limit: usize) -> Result<Vec<Transaction>, SourceError> {
        let path = self.path.clone();

        spawn_blocking(move || {
            let file = File::open(&path).map_err(|error| {
                SourceError::Unavailable(format!("Error opening CSV at path: {} | {error}", path.display()))
            })?;

            let mut reader = ReaderBuilder::new()
                .trim(Trim::All)
                .from_reader(BufReader::new(file));

            let mut transactions = Vec::new();

            for result in reader.deserialize::<Transaction>() {
                if transactions.len() >= limit {
                    break;
                }

                match result.map_err(|error| error.to_string()).and_then(|transaction| {
                    transaction.validate().map(|_| transaction).map_err(|error| error.to_string())
                }) {
                    Ok(transaction) => transactions.push(transaction),
                    Err(error) => error!("CSV deserialization error: {error}")
                }
            }

            Ok(transactions)
        })
        .await
        .map_err(|error| SourceError::Query(format!("CSV reader task failed: {error}")))?
    }
}
