use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use diesel::prelude::*;
use validator::Validate;

use super::{trim_opt, Checked};

pub const MIN_RATING: f64 = 1.0;
pub const MAX_RATING: f64 = 5.0;

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::reviews)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Review {
    pub review_id: i32,
    pub payment_id: i32,
    pub room_id: i32,
    pub renter_id: i32,
    pub rating: f64,
    pub comment: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::reviews)]
pub struct NewReview {
    pub payment_id: i32,
    pub room_id: i32,
    pub renter_id: i32,
    pub rating: f64,
    pub comment: Option<String>,
}

#[derive(Deserialize, Validate, Debug)]
pub struct CreateReviewRequest {
    pub payment_id: i32,
    #[validate(range(min = 1.0, max = 5.0, message = "Rating must be between 1.0 and 5.0"))]
    pub rating: f64,
    #[validate(length(max = 2000, message = "Comment is too long"))]
    pub comment: Option<String>,
}

impl Checked for CreateReviewRequest {
    fn trimmed(mut self) -> Self {
        self.comment = trim_opt(self.comment);
        self
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct RatingSummary {
    pub average: Option<f64>,
    pub count: i64,
}

impl RatingSummary {
    /// Rounds the database average to one decimal for display.
    pub fn new(average: Option<f64>, count: i64) -> Self {
        Self {
            average: average.map(|a| (a * 10.0).round() / 10.0),
            count,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ReviewWithAuthor {
    #[serde(flatten)]
    pub review: Review,
    pub author_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(rating: f64) -> CreateReviewRequest {
        CreateReviewRequest { payment_id: 1, rating, comment: Some("Clean and quiet".into()) }
    }

    #[test]
    fn rating_bounds_are_inclusive() {
        assert!(request(MIN_RATING).validate().is_ok());
        assert!(request(MAX_RATING).validate().is_ok());
        assert!(request(4.5).validate().is_ok());
        assert!(request(0.5).validate().is_err());
        assert!(request(5.5).validate().is_err());
    }

    #[test]
    fn summary_rounds_average() {
        let summary = RatingSummary::new(Some(4.333333), 3);
        assert_eq!(summary.average, Some(4.3));
        assert_eq!(RatingSummary::new(None, 0).average, None);
    }
}
