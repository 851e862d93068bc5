use crate::kafka::{Event, EventType, KafkaProducer};
use crate::models::{Appointment, Disbursement, Payment, Report, User};
use chrono::NaiveDateTime;
use log::{info, warn, error};
use rust_decimal::Decimal;
use serde::{Serialize, Deserialize};
use std::sync::Arc;

// Event payloads
#[derive(Debug, Serialize, Deserialize)]
pub struct UserRegisteredEvent {
    pub user_id: i32,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserLoginEvent {
    pub user_id: i32,
    pub email: String,
    pub ip_address: Option<String>,
    pub login_timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppointmentEvent {
    pub appointment_id: i32,
    pub room_id: i32,
    pub renter_id: i32,
    pub scheduled_at: NaiveDateTime,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentSettledEvent {
    pub payment_id: i32,
    pub room_id: i32,
    pub renter_id: i32,
    pub owner_id: i32,
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub owner_amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisbursementEvent {
    pub disbursement_id: i32,
    pub payment_id: i32,
    pub owner_id: i32,
    pub amount: Decimal,
    pub retry_count: i32,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportEvent {
    pub report_id: i32,
    pub room_id: i32,
    pub reporter_id: i32,
    pub report_type: String,
    pub status: String,
}

// Event publisher service. Failures are logged and swallowed so they never fail a request.
#[derive(Clone)]
pub struct EventPublisher {
    producer: Arc<KafkaProducer>,
}

impl EventPublisher {
    pub fn new(producer: Arc<KafkaProducer>) -> Self {
        Self { producer }
    }

    async fn publish<T: Serialize>(&self, event_type: EventType, key: i32, payload: T) {
        let event = Event::new(event_type, payload);
        if let Err(e) = self.producer.send(event_type.topic(), Some(&key.to_string()), &event).await {
            warn!("Failed to publish {:?} event: {}", event_type, e);
        }
    }

    pub async fn user_registered(&self, user: &User) {
        self.publish(EventType::UserRegistered, user.user_id, UserRegisteredEvent {
            user_id: user.user_id,
            email: user.email.clone(),
            role: user.role.clone(),
        }).await
    }

    pub async fn user_login(&self, user: &User, ip_address: Option<String>) {
        self.publish(EventType::UserLogin, user.user_id, UserLoginEvent {
            user_id: user.user_id,
            email: user.email.clone(),
            ip_address,
            login_timestamp: chrono::Utc::now(),
        }).await
    }

    pub async fn appointment_booked(&self, appointment: &Appointment) {
        self.publish(EventType::AppointmentBooked, appointment.room_id, appointment_event(appointment)).await
    }

    pub async fn appointment_status_changed(&self, appointment: &Appointment) {
        self.publish(EventType::AppointmentStatusChanged, appointment.room_id, appointment_event(appointment)).await
    }

    pub async fn payment_settled(&self, payment: &Payment) {
        self.publish(EventType::PaymentSettled, payment.payment_id, PaymentSettledEvent {
            payment_id: payment.payment_id,
            room_id: payment.room_id,
            renter_id: payment.renter_id,
            owner_id: payment.owner_id,
            amount: payment.amount,
            platform_fee: payment.platform_fee,
            owner_amount: payment.owner_amount,
        }).await
    }

    pub async fn disbursement_completed(&self, disbursement: &Disbursement) {
        self.publish(EventType::DisbursementCompleted, disbursement.payment_id, disbursement_event(disbursement)).await
    }

    pub async fn disbursement_failed(&self, disbursement: &Disbursement) {
        self.publish(EventType::DisbursementFailed, disbursement.payment_id, disbursement_event(disbursement)).await
    }

    pub async fn report_filed(&self, report: &Report) {
        self.publish(EventType::ReportFiled, report.room_id, report_event(report)).await
    }

    pub async fn report_status_changed(&self, report: &Report) {
        self.publish(EventType::ReportStatusChanged, report.room_id, report_event(report)).await
    }
}

fn appointment_event(appointment: &Appointment) -> AppointmentEvent {
    AppointmentEvent {
        appointment_id: appointment.appointment_id,
        room_id: appointment.room_id,
        renter_id: appointment.renter_id,
        scheduled_at: appointment.scheduled_at,
        status: appointment.status.clone(),
    }
}

fn disbursement_event(disbursement: &Disbursement) -> DisbursementEvent {
    DisbursementEvent {
        disbursement_id: disbursement.disbursement_id,
        payment_id: disbursement.payment_id,
        owner_id: disbursement.owner_id,
        amount: disbursement.amount,
        retry_count: disbursement.retry_count,
        last_error: disbursement.last_error.clone(),
    }
}

fn report_event(report: &Report) -> ReportEvent {
    ReportEvent {
        report_id: report.report_id,
        room_id: report.room_id,
        reporter_id: report.reporter_id,
        report_type: report.report_type.clone(),
        status: report.status.clone(),
    }
}

/// Peeks at the envelope type without committing to a payload shape.
#[derive(Debug, Deserialize)]
struct EventHeader {
    event_type: EventType,
}

fn event_type_of(payload: &str) -> Option<EventType> {
    match serde_json::from_str::<EventHeader>(payload) {
        Ok(header) => Some(header.event_type),
        Err(e) => {
            error!("Failed to deserialize event envelope: {}", e);
            None
        }
    }
}

// Event consumer handlers
pub async fn handle_account_event(_key: String, payload: String) {
    match event_type_of(&payload) {
        Some(EventType::UserRegistered) => {
            if let Ok(event) = serde_json::from_str::<Event<UserRegisteredEvent>>(&payload) {
                info!(
                    "User registered event processed - User ID: {}, Email: {}, Role: {}",
                    event.payload.user_id, event.payload.email, event.payload.role
                );
            }
        },
        Some(EventType::UserLogin) => {
            if let Ok(event) = serde_json::from_str::<Event<UserLoginEvent>>(&payload) {
                info!(
                    "User login event processed - User ID: {}, Time: {}",
                    event.payload.user_id, event.payload.login_timestamp
                );
            }
        },
        Some(other) => info!("Received other account event type: {:?}", other),
        None => {},
    }
}

pub async fn handle_booking_event(_key: String, payload: String) {
    match serde_json::from_str::<Event<AppointmentEvent>>(&payload) {
        Ok(event) => {
            info!(
                "{:?} processed - Appointment ID: {}, Room ID: {}, Status: {}",
                event.event_type, event.payload.appointment_id, event.payload.room_id, event.payload.status
            );
        },
        Err(e) => {
            error!("Failed to deserialize booking event: {}", e);
        }
    }
}

pub async fn handle_payment_event(_key: String, payload: String) {
    match event_type_of(&payload) {
        Some(EventType::PaymentSettled) => {
            if let Ok(event) = serde_json::from_str::<Event<PaymentSettledEvent>>(&payload) {
                info!(
                    "Payment settled event processed - Payment ID: {}, Amount: {}, Owner share: {}",
                    event.payload.payment_id, event.payload.amount, event.payload.owner_amount
                );
            }
        },
        Some(event_type @ (EventType::DisbursementCompleted | EventType::DisbursementFailed)) => {
            if let Ok(event) = serde_json::from_str::<Event<DisbursementEvent>>(&payload) {
                info!(
                    "{:?} processed - Disbursement ID: {}, Payment ID: {}, Attempts: {}",
                    event_type, event.payload.disbursement_id, event.payload.payment_id, event.payload.retry_count
                );
            }
        },
        Some(other) => info!("Received other payment event type: {:?}", other),
        None => {},
    }
}

pub async fn handle_moderation_event(_key: String, payload: String) {
    match serde_json::from_str::<Event<ReportEvent>>(&payload) {
        Ok(event) => {
            info!(
                "{:?} processed - Report ID: {}, Room ID: {}, Type: {}, Status: {}",
                event.event_type, event.payload.report_id, event.payload.room_id,
                event.payload.report_type, event.payload.status
            );
        },
        Err(e) => {
            error!("Failed to deserialize moderation event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::DummyKafkaProducer;

    #[test]
    fn header_reads_event_type_only() {
        let payload = r#"{"event_type":"DisbursementFailed","timestamp":"2026-01-01T00:00:00Z","payload":{"anything":true}}"#;
        assert_eq!(event_type_of(payload), Some(EventType::DisbursementFailed));
        assert_eq!(event_type_of("not json"), None);
    }

    #[actix_web::test]
    async fn publisher_swallows_producer_errors() {
        let publisher = EventPublisher::new(Arc::new(KafkaProducer::Dummy(DummyKafkaProducer::new())));
        let now = chrono::Utc::now().naive_utc();
        let report = Report {
            report_id: 1,
            reporter_id: 2,
            room_id: 3,
            report_type: "fraud".into(),
            description: "Listing photos are fake".into(),
            status: "pending".into(),
            owner_response: None,
            responded_at: None,
            admin_note: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        publisher.report_filed(&report).await;
    }

    #[actix_web::test]
    async fn handlers_tolerate_garbage() {
        handle_account_event(String::new(), "{}".into()).await;
        handle_booking_event(String::new(), "nope".into()).await;
        handle_payment_event(String::new(), "[]".into()).await;
        handle_moderation_event(String::new(), "".into()).await;
    }
}
