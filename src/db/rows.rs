use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgExecutor, PgQueryResult};
use sqlx::FromRow;

use crate::db::TableName;
use crate::models::{ModelError, Transaction};
use crate::types::Amount;

const COLUMNS: &str = "transaction_id, user_id, timestamp, amount, currency, city, country, \
    merchant_name, payment_method, ip_address, voucher_code, affiliate_id";

/// Raw column values of a transaction row, before domain validation.
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub transaction_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub amount: Decimal,
    pub currency: String,
    pub city: String,
    pub country: String,
    pub merchant_name: String,
    pub payment_method: String,
    pub ip_address: String,
    pub voucher_code: String,
    pub affiliate_id: String
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = ModelError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let ip_address = row.ip_address.parse()
            .map_err(|_| ModelError::InvalidIpAddress(row.ip_address.clone()))?;

        let transaction = Transaction {
            transaction_id: row.transaction_id,
            user_id: row.user_id,
            timestamp: row.timestamp,
            amount: Amount::new(row.amount)?,
            currency: FromStr::from_str(&row.currency)?,
            city: row.city,
            country: row.country,
            merchant_name: row.merchant_name,
            payment_method: FromStr::from_str(&row.payment_method)?,
            ip_address,
            voucher_code: row.voucher_code,
            affiliate_id: row.affiliate_id
        };

        transaction.validate()?;

        Ok(transaction)
    }
}

/// DDL for a transaction table; both the source and the sink share this layout.
pub fn create_table_sql(table: &TableName) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            transaction_id VARCHAR(255) PRIMARY KEY,
            user_id VARCHAR(255) NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL,
            amount NUMERIC(12, 2) NOT NULL CHECK (amount > 0),
            currency VARCHAR(10) NOT NULL,
            city VARCHAR(255) NOT NULL,
            country VARCHAR(255) NOT NULL,
            merchant_name VARCHAR(255) NOT NULL,
            payment_method VARCHAR(255) NOT NULL,
            ip_address VARCHAR(255) NOT NULL,
            voucher_code VARCHAR(255) NOT NULL DEFAULT '',
            affiliate_id VARCHAR(255) NOT NULL
        )"
    )
}

pub(crate) fn insert_sql(table: &TableName) -> String {
    format!(
        "INSERT INTO {table} ({COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         ON CONFLICT (transaction_id) DO NOTHING"
    )
}

/// Tables created elsewhere may use `TIMESTAMP` and a nullable voucher column;
/// both are normalized here so either layout decodes into a `TransactionRow`.
const SELECT_COLUMNS: &str = "transaction_id, user_id, timestamp::timestamptz AS timestamp, amount, currency, \
    city, country, merchant_name, payment_method, ip_address, COALESCE(voucher_code, '') AS voucher_code, affiliate_id";

pub(crate) fn select_sql(table: &TableName) -> String {
    format!("SELECT {SELECT_COLUMNS} FROM {table} ORDER BY timestamp, transaction_id LIMIT $1")
}

/// Inserts the row unless one with the same `transaction_id` already exists.
///
/// Returns `true` when a row was written. The conflict check and the write are
/// a single statement, so concurrent writers cannot both insert the same id.
pub async fn insert_if_absent<'e, E: PgExecutor<'e>>(executor: E, table: &TableName, transaction: &Transaction) -> Result<bool, sqlx::Error> {
    let result: PgQueryResult = sqlx::query(&insert_sql(table))
        .bind(&transaction.transaction_id)
        .bind(&transaction.user_id)
        .bind(transaction.timestamp)
        .bind(transaction.amount.as_decimal())
        .bind(transaction.currency.as_str())
        .bind(&transaction.city)
        .bind(&transaction.country)
        .bind(&transaction.merchant_name)
        .bind(transaction.payment_method.as_str())
        .bind(transaction.ip_address.to_string())
        .bind(&transaction.voucher_code)
        .bind(&transaction.affiliate_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn select_batch<'e, E: PgExecutor<'e>>(executor: E, table: &TableName, limit: usize) -> Result<Vec<TransactionRow>, sqlx::Error> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    sqlx::query_as::<_, TransactionRow>(&select_sql(table))
        .bind(limit)
        .fetch_all(executor)
        .await
}
