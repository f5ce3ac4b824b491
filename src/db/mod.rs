mod rows;

use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::info;

pub use rows::{create_table_sql, insert_if_absent, select_batch};
#[cfg(test)]
pub use rows::TransactionRow;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
#[error("Invalid table name [{0}]: expected letters, digits and underscores, not starting with a digit")]
pub struct InvalidTableName(String);

/// A table name that is safe to splice into SQL text.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TableName(String);

impl TableName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TableName {
    type Err = InvalidTableName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut characters = value.chars();

        let valid_start = characters.next()
            .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');

        if !valid_start || !characters.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(InvalidTableName(value.to_string()));
        }

        Ok(TableName(value.to_string()))
    }
}

impl Display for TableName {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Opens a connection pool and verifies the database is reachable.
///
/// Sessions run in UTC so zone-less `TIMESTAMP` columns read and write as UTC.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(url)?.options([("timezone", "UTC")]);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await?;

    info!(max_connections, "Database pool connected");

    Ok(pool)
}
