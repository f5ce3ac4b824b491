
use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::consumer::{ConsumerSettings, FatalSinkPolicy};
use crate::db::TableName;
use crate::producer::ProducerSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value [{value}] for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String
    }
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub client_id: String,
    pub group_id: String
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub source_url: String,
    pub sink_url: String,
    pub source_table: TableName,
    pub sink_table: TableName,
    pub max_connections: u32
}

/// Everything the pipeline needs from its environment.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub kafka: KafkaConfig,
    pub database: DatabaseConfig,
    pub batch_limit: usize,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
    pub log_level: LevelFilter
}

impl PipelineConfig {
    /// Reads the process environment, after loading `.env` when one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(PipelineConfig {
            kafka: KafkaConfig {
                brokers: text("KAFKA_BROKERS", "localhost:9092"),
                topic: text("KAFKA_TOPIC", "transactions"),
                client_id: text("KAFKA_CLIENT_ID", "transaction-producer"),
                group_id: text("KAFKA_GROUP_ID", "transaction-consumer")
            },
            database: DatabaseConfig {
                source_url: text("SOURCE_DATABASE_URL", "postgres://postgres@localhost:5432/financialDB"),
                sink_url: text("SINK_DATABASE_URL", "postgres://postgres@localhost:5432/destinationdb"),
                source_table: parse(&lookup, "SOURCE_TABLE", "transactions")?,
                sink_table: parse(&lookup, "SINK_TABLE", "transactions_sink")?,
                max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", "5")?
            },
            batch_limit: parse(&lookup, "BATCH_LIMIT", "50")?,
            producer: ProducerSettings {
                pacing: Duration::from_millis(parse(&lookup, "PUBLISH_PACING_MS", "500")?),
                flush_timeout: Duration::from_secs(parse(&lookup, "FLUSH_TIMEOUT_SECS", "10")?)
            },
            consumer: ConsumerSettings {
                poll_interval: Duration::from_millis(parse(&lookup, "POLL_INTERVAL_MS", "1000")?),
                retry_backoff: Duration::from_millis(parse(&lookup, "RETRY_BACKOFF_MS", "1000")?),
                on_fatal_sink_error: parse::<FatalSinkPolicy, _>(&lookup, "ON_FATAL_SINK_ERROR", "skip")?
            },
            log_level: parse_log_level(&text("LOG_LEVEL", "info"))
        })
    }
}

fn parse<T, F>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).unwrap_or_else(|| default.to_string());

    value.trim().parse().map_err(|error: T::Err| ConfigError::Invalid {
        key,
        reason: error.to_string(),
        value
    })
}

pub fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to 'info'", level);
            LevelFilter::INFO
        }
    }
}
