use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::info;

use crate::broker::{BrokerError, BrokerMessage, DeliveryReceipt, MessagePublisher, MessageSubscriber, PendingDelivery};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka publisher built on `FutureProducer`.
///
/// Acknowledgements require all in-sync replicas and idempotent production is
/// enabled, so client-side retries never duplicate a message within a session.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String
}

impl KafkaPublisher {
    /// Creates the producer and verifies the cluster answers a metadata request.
    ///
    /// This blocks for up to `timeout`; call it from a blocking context.
    pub fn connect(brokers: &str, client_id: &str, topic: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .set("message.timeout.ms", "30000")
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .map_err(|error| BrokerError::Unavailable(error.to_string()))?;

        producer.client()
            .fetch_metadata(Some(topic), timeout)
            .map_err(|error| BrokerError::Unavailable(format!("{brokers}: {error}")))?;

        info!(brokers, client_id, topic, "Kafka publisher connected");

        Ok(Self {
            producer,
            topic: topic.to_string()
        })
    }
}

impl MessagePublisher for KafkaPublisher {
    fn publish(&self, key: &str, payload: &[u8]) -> Result<PendingDelivery, BrokerError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        let delivery = self.producer.send_result(record)
            .map_err(|(error, _)| BrokerError::Produce(error.to_string()))?;

        Ok(Box::pin(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => Ok(DeliveryReceipt { partition, offset }),
                Ok(Err((error, _))) => Err(BrokerError::Delivery(error.to_string())),
                Err(_) => Err(BrokerError::Delivery("producer dropped before acknowledgement".to_string()))
            }
        }))
    }
}

/// Kafka consumer-group member built on `StreamConsumer` with manual commits.
pub struct KafkaSubscriber {
    consumer: StreamConsumer
}

impl KafkaSubscriber {
    /// Creates the consumer, verifies the cluster is reachable and subscribes to `topic`.
    ///
    /// This blocks for up to `timeout`; call it from a blocking context.
    pub fn connect(brokers: &str, group_id: &str, topic: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "30000")
            .create()
            .map_err(|error| BrokerError::Unavailable(error.to_string()))?;

        consumer.fetch_metadata(Some(topic), timeout)
            .map_err(|error| BrokerError::Unavailable(format!("{brokers}: {error}")))?;

        consumer.subscribe(&[topic])
            .map_err(|error| BrokerError::Unavailable(error.to_string()))?;

        info!(brokers, group_id, topic, "Kafka subscriber connected");

        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageSubscriber for KafkaSubscriber {
    async fn poll(&self, timeout: Duration) -> Option<Result<BrokerMessage, BrokerError>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => None,
            Ok(Err(error)) => Some(Err(BrokerError::Consume(error.to_string()))),
            Ok(Ok(message)) => Some(Ok(BrokerMessage {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(|key| String::from_utf8_lossy(key).into_owned()),
                payload: message.payload().map(<[u8]>::to_vec)
            }))
        }
    }

    async fn commit(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();

        offsets.add_partition_offset(&message.topic, message.partition, Offset::Offset(message.offset + 1))
            .map_err(|error| BrokerError::Commit(error.to_string()))?;

        self.consumer.commit(&offsets, CommitMode::Sync)
            .map_err(|error| BrokerError::Commit(error.to_string()))
    }

    async fn rewind(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        self.consumer.seek(&message.topic, message.partition, Offset::Offset(message.offset), SEEK_TIMEOUT)
            .map_err(|error| BrokerError::Consume(error.to_string()))
    }
}
