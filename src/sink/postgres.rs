use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::db::{create_table_sql, insert_if_absent, TableName};
use crate::models::Transaction;
use crate::sink::{ApplyOutcome, Sink, SinkError};

/// Writes transactions into a Postgres table with `ON CONFLICT DO NOTHING`.
pub struct PgSink {
    pool: PgPool,
    table: TableName
}

impl PgSink {
    pub fn new(pool: PgPool, table: TableName) -> Self {
        Self { pool, table }
    }

    /// Number of rows currently in the sink table.
    pub async fn row_count(&self) -> Result<i64, SinkError> {
        let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }
}

#[async_trait]
impl Sink for PgSink {
    async fn ensure_schema(&self) -> Result<(), SinkError> {
        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.pool)
            .await?;

        info!(table = %self.table, "Sink schema ready");

        Ok(())
    }

    async fn apply(&self, transaction: &Transaction) -> Result<ApplyOutcome, SinkError> {
        let inserted = insert_if_absent(&self.pool, &self.table, transaction).await?;

        debug!(table = %self.table, transaction_id = %transaction.transaction_id, inserted, "Sink row applied");

        Ok(if inserted { ApplyOutcome::Inserted } else { ApplyOutcome::AlreadyPresent })
    }
}
