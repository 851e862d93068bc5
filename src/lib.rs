pub mod config;
pub mod db;
pub mod errors;
pub mod event_handlers;
pub mod gateway;
pub mod handlers;
pub mod kafka;
pub mod logger;
pub mod middleware;
pub mod models;
pub mod schema;
pub mod services;
pub mod worker;

// Re-export common types
pub use crate::config::{AppConfig, DbPool};
pub use crate::errors::ApiError;
pub use crate::event_handlers::EventPublisher;
pub use crate::gateway::PaymentGateway;
pub use crate::kafka::KafkaProducer;
