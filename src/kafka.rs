use std::time::Duration;
use log::{info, error, warn, debug};
use serde::{Serialize, Deserialize};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::consumer::{StreamConsumer, Consumer, CommitMode};
use rdkafka::Message;
use rdkafka::error::KafkaError;
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;

// Kafka configuration
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub client_id: String,
    pub group_id: String,
}

impl KafkaConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let bootstrap_servers = std::env::var("KAFKA_BOOTSTRAP_SERVERS")
            .unwrap_or_else(|_| "localhost:9092".to_string());

        let client_id = std::env::var("KAFKA_CLIENT_ID")
            .unwrap_or_else(|_| "roomrent-service".to_string());

        let group_id = std::env::var("KAFKA_GROUP_ID")
            .unwrap_or_else(|_| "roomrent-consumers".to_string());

        Self {
            bootstrap_servers,
            client_id,
            group_id,
        }
    }

    fn consumer_config(&self, client_suffix: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", &self.group_id)
            .set("client.id", format!("{}-{}", self.client_id, client_suffix))
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000");
        config
    }
}

// Define an enum that can represent all our Kafka producer types
#[derive(Clone)]
pub enum KafkaProducer {
    Real(RdKafkaProducer),
    Dummy(DummyKafkaProducer),
}

impl KafkaProducer {
    pub async fn send<T: Serialize>(&self, topic: &str, key: Option<&str>, payload: &T) -> Result<(), String> {
        match self {
            KafkaProducer::Real(producer) => producer.send(topic, key, payload).await,
            KafkaProducer::Dummy(producer) => producer.send(topic, key, payload).await,
        }
    }
}

// Concrete implementation
#[derive(Clone)]
pub struct RdKafkaProducer {
    producer: FutureProducer,
}

impl RdKafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", "5000")
            .set("compression.type", "snappy")
            .set("acks", "all")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn send<T: Serialize>(&self, topic: &str, key: Option<&str>, payload: &T) -> Result<(), String> {
        let json_payload = serde_json::to_string(payload).map_err(|e| format!("Serialization error: {}", e))?;

        let record = match key {
            Some(k) => FutureRecord::to(topic).key(k).payload(&json_payload),
            None => FutureRecord::to(topic).payload(&json_payload),
        };

        debug!("Sending message to topic {}: {}", topic, json_payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(5))).await {
            Ok((partition, offset)) => {
                debug!("Message sent to topic {}, partition {}, offset {}", topic, partition, offset);
                Ok(())
            },
            Err((err, _)) => {
                error!("Failed to send message to Kafka: {}", err);
                Err(format!("Failed to send message: {}", err))
            }
        }
    }
}

// Create a Kafka producer, falling back to the dummy one when the client cannot be built
pub fn create_producer(config: &KafkaConfig) -> KafkaProducer {
    match RdKafkaProducer::new(config) {
        Ok(producer) => {
            info!("Kafka producer initialized for {}", config.bootstrap_servers);
            KafkaProducer::Real(producer)
        },
        Err(e) => {
            error!("Failed to create RdKafkaProducer: {}", e);
            warn!("Will use dummy producer that logs but doesn't send messages");
            KafkaProducer::Dummy(DummyKafkaProducer::new())
        }
    }
}

// Dummy producer for fallback when Kafka is unavailable
#[derive(Clone, Default)]
pub struct DummyKafkaProducer {}

impl DummyKafkaProducer {
    pub fn new() -> Self {
        Self {}
    }

    pub async fn send<T: Serialize>(&self, topic: &str, key: Option<&str>, payload: &T) -> Result<(), String> {
        warn!("Using dummy Kafka producer. Message to topic '{}' not sent.", topic);
        if let Ok(json) = serde_json::to_string(payload) {
            debug!("Would have sent: key={:?}, payload={}", key, json);
        }
        Ok(())
    }
}

// Kafka consumer wrapper; every subscription runs on its own worker task
pub struct KafkaConsumer {
    config: KafkaConfig,
    running: Arc<AtomicBool>,
    handlers: Vec<JoinHandle<()>>,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig) -> Self {
        Self {
            config: config.clone(),
            running: Arc::new(AtomicBool::new(true)),
            handlers: Vec::new(),
        }
    }

    pub fn subscribe<F, Fut>(&mut self, topic: &str, message_handler: F) -> Result<(), KafkaError>
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let consumer: StreamConsumer = self.config.consumer_config(topic).create()?;
        consumer.subscribe(&[topic])?;
        info!("Subscribed to topic: {}", topic);

        let running = self.running.clone();

        let worker = tokio::spawn(async move {
            while running.load(Ordering::Relaxed) {
                match consumer.recv().await {
                    Ok(message) => {
                        let payload = match message.payload().map(std::str::from_utf8) {
                            Some(Ok(s)) => s.to_owned(),
                            Some(Err(e)) => {
                                error!("Error converting message payload to UTF-8: {}", e);
                                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                    error!("Failed to commit message: {}", e);
                                }
                                continue;
                            },
                            None => {
                                warn!("Empty message payload");
                                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                    error!("Failed to commit message: {}", e);
                                }
                                continue;
                            }
                        };

                        let key = message.key()
                            .and_then(|bytes| std::str::from_utf8(bytes).ok())
                            .unwrap_or_default()
                            .to_owned();

                        debug!("Received message: key={}, payload={}", key, payload);

                        message_handler(key, payload).await;

                        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                            error!("Failed to commit message: {}", e);
                        }
                    },
                    Err(e) => {
                        error!("Error while receiving message: {:?}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    },
                }
            }
        });

        self.handlers.push(worker);
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);

        for handler in self.handlers.drain(..) {
            handler.abort();
            let _ = handler.await;
        }
    }
}

// Event types for Kafka messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    UserRegistered,
    UserLogin,
    AppointmentBooked,
    AppointmentStatusChanged,
    PaymentSettled,
    DisbursementCompleted,
    DisbursementFailed,
    ReportFiled,
    ReportStatusChanged,
}

impl EventType {
    pub fn topic(&self) -> &'static str {
        match self {
            EventType::UserRegistered | EventType::UserLogin => TOPIC_ACCOUNT_EVENTS,
            EventType::AppointmentBooked | EventType::AppointmentStatusChanged => TOPIC_BOOKING_EVENTS,
            EventType::PaymentSettled
            | EventType::DisbursementCompleted
            | EventType::DisbursementFailed => TOPIC_PAYMENT_EVENTS,
            EventType::ReportFiled | EventType::ReportStatusChanged => TOPIC_MODERATION_EVENTS,
        }
    }
}

// Generic event structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Event<T> {
    pub event_type: EventType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: T,
}

impl<T> Event<T> {
    pub fn new(event_type: EventType, payload: T) -> Self {
        Self {
            event_type,
            timestamp: chrono::Utc::now(),
            payload,
        }
    }
}

// Event-specific topics
pub const TOPIC_ACCOUNT_EVENTS: &str = "account-events";
pub const TOPIC_BOOKING_EVENTS: &str = "booking-events";
pub const TOPIC_PAYMENT_EVENTS: &str = "payment-events";
pub const TOPIC_MODERATION_EVENTS: &str = "moderation-events";

pub const ALL_TOPICS: &[&str] = &[
    TOPIC_ACCOUNT_EVENTS,
    TOPIC_BOOKING_EVENTS,
    TOPIC_PAYMENT_EVENTS,
    TOPIC_MODERATION_EVENTS,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_type_has_a_known_topic() {
        let all = [
            EventType::UserRegistered,
            EventType::UserLogin,
            EventType::AppointmentBooked,
            EventType::AppointmentStatusChanged,
            EventType::PaymentSettled,
            EventType::DisbursementCompleted,
            EventType::DisbursementFailed,
            EventType::ReportFiled,
            EventType::ReportStatusChanged,
        ];
        for event_type in all {
            assert!(ALL_TOPICS.contains(&event_type.topic()));
        }
        assert_eq!(EventType::DisbursementFailed.topic(), TOPIC_PAYMENT_EVENTS);
    }

    #[test]
    fn event_envelope_shape() {
        let event = Event::new(EventType::PaymentSettled, serde_json::json!({ "payment_id": 3 }));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "PaymentSettled");
        assert_eq!(value["payload"]["payment_id"], 3);
        assert!(value["timestamp"].is_string());
    }

    #[actix_web::test]
    async fn dummy_producer_never_fails() {
        let producer = KafkaProducer::Dummy(DummyKafkaProducer::new());
        let result = producer.send(TOPIC_BOOKING_EVENTS, Some("1"), &serde_json::json!({"x": 1})).await;
        assert!(result.is_ok());
    }
}
