
#[cfg(feature = "kafka")]
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing::info;

#[cfg(feature = "kafka")]
use crate::broker::{KafkaPublisher, KafkaSubscriber};
use crate::broker::BrokerError;
use crate::config::PipelineConfig;
use crate::db;
use crate::sink::{PgSink, SinkError};
use crate::source::{PgRecordSource, SourceError};

#[cfg(feature = "kafka")]
const BROKER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the configuration and the connections built from it.
///
/// Pools are opened on first use and shared by every handle handed out
/// afterwards; `close` releases them at shutdown.
pub struct PipelineContext {
    config: PipelineConfig,
    source_pool: OnceCell<PgPool>,
    sink_pool: OnceCell<PgPool>
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            source_pool: OnceCell::new(),
            sink_pool: OnceCell::new()
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn source(&self) -> Result<PgRecordSource, SourceError> {
        let database = &self.config.database;

        let pool = self.source_pool
            .get_or_try_init(|| db::connect(&database.source_url, database.max_connections))
            .await
            .map_err(|error| SourceError::Unavailable(error.to_string()))?;

        Ok(PgRecordSource::new(pool.clone(), database.source_table.clone()))
    }

    pub async fn sink(&self) -> Result<PgSink, SinkError> {
        let database = &self.config.database;

        let pool = self.sink_pool
            .get_or_try_init(|| db::connect(&database.sink_url, database.max_connections))
            .await?;

        Ok(PgSink::new(pool.clone(), database.sink_table.clone()))
    }

    #[cfg(feature = "kafka")]
    pub async fn publisher(&self) -> Result<KafkaPublisher, BrokerError> {
        let kafka = self.config.kafka.clone();

        tokio::task::spawn_blocking(move || {
            KafkaPublisher::connect(&kafka.brokers, &kafka.client_id, &kafka.topic, BROKER_CONNECT_TIMEOUT)
        })
        .await
        .map_err(|error| BrokerError::Unavailable(error.to_string()))?
    }

    #[cfg(feature = "kafka")]
    pub async fn subscriber(&self) -> Result<KafkaSubscriber, BrokerError> {
        let kafka = self.config.kafka.clone();

        tokio::task::spawn_blocking(move || {
            KafkaSubscriber::connect(&kafka.brokers, &kafka.group_id, &kafka.topic, BROKER_CONNECT_TIMEOUT)
        })
        .await
        .map_err(|error| BrokerError::Unavailable(error.to_string()))?
    }

    /// The error `produce` and `consume` report when Kafka support is compiled out.
    #[cfg(not(feature = "kafka"))]
    pub fn kafka_disabled(&self) -> BrokerError {
        let kafka = &self.config.kafka;

        BrokerError::Unavailable(format!(
            "client [{}] cannot reach {} for topic [{}] as group [{}]: built without the `kafka` feature",
            kafka.client_id, kafka.brokers, kafka.topic, kafka.group_id
        ))
    }

    pub async fn close(&self) {
        if let Some(pool) = self.source_pool.get() {
            pool.close().await;
        }

        if let Some(pool) = self.sink_pool.get() {
            pool.close().await;
        }

        info!("Pipeline connections closed");
    }
}
