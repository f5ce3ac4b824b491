use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::models::Transaction;
use crate::sink::{ApplyOutcome, Sink, SinkError};
use crate::types::TransactionId;

/// A sink table held in memory.
///
/// The map's entry API holds the shard lock for the whole check-then-insert,
/// so concurrent writers of the same id cannot both insert.
pub struct MemorySink {
    rows: DashMap<TransactionId, Transaction>,
    schema_ready: AtomicBool,
    injected_failures: Mutex<VecDeque<SinkError>>
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            schema_ready: AtomicBool::new(false),
            injected_failures: Mutex::new(VecDeque::new())
        }
    }

    /// Makes the next `apply` call fail with `error` instead of writing.
    #[cfg(test)]
    pub fn fail_next(&self, error: SinkError) {
        self.injected_failures.lock().unwrap_or_else(PoisonError::into_inner).push_back(error);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, transaction_id: &str) -> Option<Transaction> {
        self.rows.get(transaction_id).map(|row| row.value().clone())
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn ensure_schema(&self) -> Result<(), SinkError> {
        self.schema_ready.store(true, Ordering::Release);

        Ok(())
    }

    async fn apply(&self, transaction: &Transaction) -> Result<ApplyOutcome, SinkError> {
        if let Some(error) = self.injected_failures.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            return Err(error);
        }

        if !self.schema_ready.load(Ordering::Acquire) {
            return Err(SinkError::Fatal("relation \"transactions_sink\" does not exist".to_string()));
        }

        match self.rows.entry(transaction.transaction_id.clone()) {
            Entry::Occupied(_) => Ok(ApplyOutcome::AlreadyPresent),
            Entry::Vacant(entry) => {
                entry.insert(transaction.clone());
                Ok(ApplyOutcome::Inserted)
            }
        }
    }
}
