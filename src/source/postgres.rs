use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::db::{create_table_sql, insert_if_absent, select_batch, TableName};
use crate::models::Transaction;
use crate::source::{RecordSource, SourceError};

/// Reads transactions from a Postgres table.
pub struct PgRecordSource {
    pool: PgPool,
    table: TableName
}

impl PgRecordSource {
    pub fn new(pool: PgPool, table: TableName) -> Self {
        Self { pool, table }
    }

    /// Creates the source table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), SourceError> {
        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.pool)
            .await?;

        info!(table = %self.table, "Source schema ready");

        Ok(())
    }

    /// Stores a record, leaving any existing row with the same id untouched.
    pub async fn insert(&self, transaction: &Transaction) -> Result<bool, SourceError> {
        let inserted = insert_if_absent(&self.pool, &self.table, transaction).await?;

        debug!(transaction_id = %transaction.transaction_id, inserted, "Source row written");

        Ok(inserted)
    }
}

#[async_trait]
impl RecordSource for PgRecordSource {
    async fn fetch(&self, limit: usize) -> Result<Vec<Transaction>, SourceError> {
        let rows = select_batch(&self.pool, &self.table, limit).await?;
        let mut transactions = Vec::with_capacity(rows.len());

        for row in rows {
            let transaction_id = row.transaction_id.clone();

            match Transaction::try_from(row) {
                Ok(transaction) => transactions.push(transaction),
                Err(error) => warn!(transaction_id = %transaction_id, "Skipping undecodable source row: {error}")
            }
        }

        debug!(table = %self.table, limit, fetched = transactions.len(), "Fetched source batch");

        Ok(transactions)
    }
}
