use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use diesel::prelude::*;
use validator::Validate;

use super::{trim_opt, Checked};

use crate::errors::ApiError;

db_enum!(ReportType {
    Fraud => "fraud",
    InaccurateListing => "inaccurate_listing",
    InappropriateContent => "inappropriate_content",
    Safety => "safety",
    Other => "other",
});

db_enum!(ReportStatus {
    Pending => "pending",
    InReview => "in_review",
    Resolved => "resolved",
    Rejected => "rejected",
});

impl ReportStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, ReportStatus::Resolved | ReportStatus::Rejected)
    }

    pub fn can_transition_to(&self, next: ReportStatus) -> bool {
        use ReportStatus::*;
        matches!(
            (self, next),
            (Pending, InReview) | (Pending, Resolved) | (Pending, Rejected)
                | (InReview, Resolved) | (InReview, Rejected)
        )
    }

    pub fn ensure_transition(&self, next: ReportStatus) -> Result<(), ApiError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(ApiError::validation(format!(
                "Report cannot move from {} to {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::reports)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Report {
    pub report_id: i32,
    pub reporter_id: i32,
    pub room_id: i32,
    pub report_type: String,
    pub description: String,
    pub status: String,
    pub owner_response: Option<String>,
    pub responded_at: Option<NaiveDateTime>,
    pub admin_note: Option<String>,
    pub resolved_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Report {
    pub fn status(&self) -> Result<ReportStatus, ApiError> {
        self.status.parse()
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::reports)]
pub struct NewReport {
    pub reporter_id: i32,
    pub room_id: i32,
    pub report_type: String,
    pub description: String,
    pub status: String,
}

// DTOs
#[derive(Deserialize, Validate, Debug)]
pub struct CreateReportRequest {
    pub room_id: i32,
    pub report_type: ReportType,
    #[validate(length(min = 10, max = 2000, message = "Description must be between 10 and 2000 characters"))]
    pub description: String,
}

impl Checked for CreateReportRequest {
    fn trimmed(mut self) -> Self {
        self.description = self.description.trim().to_string();
        self
    }
}

#[derive(Deserialize, Validate, Debug)]
pub struct RespondReportRequest {
    #[validate(length(min = 1, max = 2000, message = "Response must be between 1 and 2000 characters"))]
    pub response: String,
}

impl Checked for RespondReportRequest {
    fn trimmed(mut self) -> Self {
        self.response = self.response.trim().to_string();
        self
    }
}

#[derive(Deserialize, Validate, Debug)]
pub struct UpdateReportStatusRequest {
    pub status: ReportStatus,
    #[validate(length(max = 2000, message = "Admin note is too long"))]
    pub admin_note: Option<String>,
}

impl Checked for UpdateReportStatusRequest {
    fn trimmed(mut self) -> Self {
        self.admin_note = trim_opt(self.admin_note);
        self
    }
}

#[derive(Deserialize, Debug)]
pub struct ReportListQuery {
    pub status: Option<ReportStatus>,
    pub report_type: Option<ReportType>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReportStatus::*;

    #[test]
    fn report_workflow_transitions() {
        assert!(Pending.can_transition_to(InReview));
        assert!(Pending.can_transition_to(Resolved));
        assert!(InReview.can_transition_to(Rejected));
        assert!(!InReview.can_transition_to(Pending));
        assert!(!Resolved.can_transition_to(InReview));
        assert!(!Rejected.can_transition_to(Resolved));
        assert!(Resolved.is_closed() && Rejected.is_closed());
        assert!(!Pending.is_closed());
    }

    #[test]
    fn ensure_transition_reports_both_states() {
        let err = Resolved.ensure_transition(Pending).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Report cannot move from resolved to pending");
    }

    #[test]
    fn description_length_is_enforced() {
        let request = CreateReportRequest {
            room_id: 1,
            report_type: ReportType::Fraud,
            description: "too short".into(),
        };
        assert!(request.validate().is_err());

        let request = CreateReportRequest {
            room_id: 1,
            report_type: ReportType::Fraud,
            description: "The owner asked for payment outside the platform.".into(),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn padding_does_not_count_towards_description_length() {
        let request = CreateReportRequest {
            room_id: 1,
            report_type: ReportType::Other,
            description: format!("{}x{}", " ".repeat(9), " ".repeat(9)),
        };
        assert!(request.checked().is_err());

        let request = CreateReportRequest {
            room_id: 1,
            report_type: ReportType::Other,
            description: "  Broken window lock  ".into(),
        };
        assert_eq!(request.checked().unwrap().description, "Broken window lock");
    }

    #[test]
    fn blank_response_is_rejected() {
        let request = RespondReportRequest { response: "   ".into() };
        assert!(request.checked().is_err());
    }

    #[test]
    fn report_type_text_matches_schema() {
        let parsed: ReportType = serde_json::from_str("\"inaccurate_listing\"").unwrap();
        assert_eq!(parsed, ReportType::InaccurateListing);
        assert_eq!(ReportType::InappropriateContent.as_str(), "inappropriate_content");
    }
}
