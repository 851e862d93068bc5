use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use diesel::prelude::*;
use validator::Validate;

use super::{trim_opt, Checked};

use crate::errors::ApiError;

db_enum!(AppointmentStatus {
    Scheduled => "scheduled",
    Completed => "completed",
    Cancelled => "cancelled",
    NoShow => "no_show",
});

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentStatus::Scheduled)
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        matches!(
            (self, next),
            (AppointmentStatus::Scheduled, AppointmentStatus::Completed)
                | (AppointmentStatus::Scheduled, AppointmentStatus::Cancelled)
                | (AppointmentStatus::Scheduled, AppointmentStatus::NoShow)
        )
    }

    /// Error for a transition that was attempted from `self`.
    pub fn transition_error(&self, next: AppointmentStatus) -> ApiError {
        if *self == next {
            ApiError::validation(format!("Appointment is already {}", self.as_str()))
        } else {
            ApiError::validation(format!(
                "Appointment cannot move from {} to {}",
                self.as_str(),
                next.as_str()
            ))
        }
    }
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::survey_appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Appointment {
    pub appointment_id: i32,
    pub room_id: i32,
    pub renter_id: i32,
    pub scheduled_at: NaiveDateTime,
    pub status: String,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    pub fn status(&self) -> Result<AppointmentStatus, ApiError> {
        self.status.parse()
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::survey_appointments)]
pub struct NewAppointment {
    pub room_id: i32,
    pub renter_id: i32,
    pub scheduled_at: NaiveDateTime,
    pub status: String,
    pub notes: Option<String>,
}

// DTOs
#[derive(Deserialize, Validate, Debug)]
pub struct BookAppointmentRequest {
    pub room_id: i32,
    pub scheduled_at: NaiveDateTime,
    #[validate(length(max = 1000, message = "Notes are too long"))]
    pub notes: Option<String>,
}

impl Checked for BookAppointmentRequest {
    fn trimmed(mut self) -> Self {
        self.notes = trim_opt(self.notes);
        self
    }
}

#[derive(Deserialize, Validate, Debug, Default)]
pub struct CancelAppointmentRequest {
    #[validate(length(max = 1000, message = "Cancel reason is too long"))]
    pub reason: Option<String>,
}

impl Checked for CancelAppointmentRequest {
    fn trimmed(mut self) -> Self {
        self.reason = trim_opt(self.reason);
        self
    }
}

#[derive(Deserialize, Debug)]
pub struct RescheduleRequest {
    pub scheduled_at: NaiveDateTime,
}

#[derive(Deserialize, Debug)]
pub struct AppointmentQuery {
    pub status: Option<AppointmentStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub fn ensure_future(scheduled_at: NaiveDateTime, now: NaiveDateTime) -> Result<(), ApiError> {
    if scheduled_at <= now {
        return Err(ApiError::validation("Appointment time must be in the future"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn only_scheduled_can_move() {
        use AppointmentStatus::*;
        assert!(Scheduled.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Scheduled.can_transition_to(NoShow));
        assert!(!Scheduled.can_transition_to(Scheduled));

        for terminal in [Completed, Cancelled, NoShow] {
            assert!(terminal.is_terminal());
            for next in AppointmentStatus::ALL {
                assert!(!terminal.can_transition_to(*next));
            }
        }
    }

    #[test]
    fn double_cancel_is_reported_clearly() {
        let err = AppointmentStatus::Cancelled.transition_error(AppointmentStatus::Cancelled);
        assert_eq!(err.to_string(), "Validation error: Appointment is already cancelled");

        let err = AppointmentStatus::Completed.transition_error(AppointmentStatus::Cancelled);
        assert_eq!(err.to_string(), "Validation error: Appointment cannot move from completed to cancelled");
    }

    #[test]
    fn scheduled_time_must_be_in_future() {
        let now = chrono::Utc::now().naive_utc();
        assert!(ensure_future(now + Duration::hours(1), now).is_ok());
        assert!(ensure_future(now, now).is_err());
        assert!(ensure_future(now - Duration::minutes(5), now).is_err());
    }

    #[test]
    fn status_text_matches_schema() {
        assert_eq!(AppointmentStatus::NoShow.as_str(), "no_show");
        assert_eq!("no_show".parse::<AppointmentStatus>().unwrap(), AppointmentStatus::NoShow);
    }
}
