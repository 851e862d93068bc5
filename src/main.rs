use actix_web::{web, App, HttpServer};
use log::{error, info, warn};
use std::io;
use std::sync::Arc;

use roomrent::config::AppConfig;
use roomrent::db;
use roomrent::event_handlers::{
    handle_account_event, handle_booking_event, handle_moderation_event, handle_payment_event, EventPublisher,
};
use roomrent::gateway::PaymentGateway;
use roomrent::handlers;
use roomrent::kafka::{
    self, KafkaConfig, KafkaConsumer, TOPIC_ACCOUNT_EVENTS, TOPIC_BOOKING_EVENTS, TOPIC_MODERATION_EVENTS,
    TOPIC_PAYMENT_EVENTS,
};
use roomrent::logger::setup_logger;
use roomrent::middleware::RequestLogger;
use roomrent::worker::Worker;

fn startup_error(msg: impl std::fmt::Display) -> io::Error {
    error!("{}", msg);
    io::Error::new(io::ErrorKind::Other, msg.to_string())
}

fn start_consumers(kafka_config: &KafkaConfig) -> KafkaConsumer {
    let mut consumer = KafkaConsumer::new(kafka_config);

    let subscriptions = [
        consumer.subscribe(TOPIC_ACCOUNT_EVENTS, handle_account_event),
        consumer.subscribe(TOPIC_BOOKING_EVENTS, handle_booking_event),
        consumer.subscribe(TOPIC_PAYMENT_EVENTS, handle_payment_event),
        consumer.subscribe(TOPIC_MODERATION_EVENTS, handle_moderation_event),
    ];

    let failed = subscriptions.iter().filter(|r| r.is_err()).count();
    for e in subscriptions.iter().filter_map(|r| r.as_ref().err()) {
        error!("Failed to subscribe to Kafka topic: {}", e);
    }
    if failed == 0 {
        info!("Kafka consumers started successfully");
    } else {
        warn!("{} Kafka subscription(s) failed. Event processing partially disabled.", failed);
    }

    consumer
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load environment variables and initialize logger
    dotenvy::dotenv().ok();
    setup_logger();

    // Load and validate configuration
    let config = AppConfig::from_env();
    config
        .validate()
        .map_err(|e| startup_error(format!("Invalid configuration: {}", e)))?;

    // Initialize database schema and pool
    info!("Connecting to database");
    db::init_schema(&config.database_url).map_err(startup_error)?;
    let pool = db::build_pool(&config).map_err(startup_error)?;

    // Kafka producer falls back to a logging dummy when the broker is unreachable
    let kafka_config = KafkaConfig::from_env();
    let producer = Arc::new(kafka::create_producer(&kafka_config));
    let events = EventPublisher::new(producer);
    let mut consumer = start_consumers(&kafka_config);

    let gateway = PaymentGateway::from_config(&config);

    let worker = Worker::new(config.clone(), pool.clone(), gateway.clone(), events.clone()).spawn();

    let (host, port) = (config.host.clone(), config.port);
    info!("Starting HTTP server at http://{}:{}", host, port);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(events.clone()))
            .app_data(web::Data::new(gateway.clone()))
            .service(web::scope("/api").configure(handlers::configure))
    })
    .keep_alive(std::time::Duration::from_secs(75))
    .shutdown_timeout(30)
    .bind((host, port))?
    .run()
    .await;

    worker.abort();
    consumer.stop().await;
    info!("Server stopped");
    server
}
