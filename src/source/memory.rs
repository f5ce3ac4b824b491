use async_trait::async_trait;

use crate::models::Transaction;
use crate::source::{RecordSource, SourceError};

/// A fixed list of records held in memory.
pub struct MemoryRecordSource {
    records: Vec<Transaction>,
    available: bool
}

impl MemoryRecordSource {
    pub fn new(records: Vec<Transaction>) -> Self {
        Self {
            records,
            available: true
        }
    }

    /// A source whose every fetch fails as if the store could not be reached.
    #[cfg(test)]
    pub fn unavailable() -> Self {
        Self {
            records: Vec::new(),
            available: false
        }
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn fetch(&self, limit: usize) -> Result<Vec<Transaction>, SourceError> {
        if !self.available {
            return Err(SourceError::Unavailable("in-memory source is offline".to_string()));
        }

        Ok(self.records.iter().take(limit).cloned().collect())
    }
}
