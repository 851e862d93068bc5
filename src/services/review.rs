use crate::models::*;
use crate::config::DbPool;
use crate::db;
use crate::errors::ApiError;
use crate::services::user::ensure_active;
use crate::middleware::AuthUser;
use crate::schema::{payments, reviews, users};
use crate::services::room::find_room;
use diesel::dsl::{avg, count_star};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use log::info;

pub struct ReviewService;

impl ReviewService {
    pub(crate) fn rating_summary(conn: &mut PgConnection, room: i32) -> Result<RatingSummary, ApiError> {
        let (average, count) = reviews::table
            .filter(reviews::room_id.eq(room))
            .select((avg(reviews::rating), count_star()))
            .first::<(Option<f64>, i64)>(conn)?;
        Ok(RatingSummary::new(average, count))
    }

    pub async fn create(caller: AuthUser, request: CreateReviewRequest, pool: &DbPool) -> Result<Review, ApiError> {
        let request = request.checked()?;

        let review = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            let payment = payments::table
                .find(request.payment_id)
                .select(Payment::as_select())
                .first::<Payment>(conn)
                .optional()?
                .ok_or_else(|| ApiError::not_found("Payment"))?;

            if payment.renter_id != caller.user_id {
                return Err(ApiError::forbidden("Only the renter who paid can review this stay"));
            }
            if payment.status()? != PaymentStatus::Paid {
                return Err(ApiError::validation("Only paid rentals can be reviewed"));
            }

            diesel::insert_into(reviews::table)
                .values(&NewReview {
                    payment_id: payment.payment_id,
                    room_id: payment.room_id,
                    renter_id: caller.user_id,
                    rating: request.rating,
                    comment: request.comment.filter(|c| !c.is_empty()),
                })
                .returning(Review::as_returning())
                .get_result::<Review>(conn)
                .map_err(|e| match ApiError::from(e) {
                    ApiError::Conflict(_) => ApiError::Conflict("This payment has already been reviewed".to_string()),
                    other => other,
                })
        })
        .await?;

        info!("Review {} added to room {}", review.review_id, review.room_id);
        Ok(review)
    }

    pub async fn list_for_room(room: i32, page: PageQuery, pool: &DbPool) -> Result<Paginated<ReviewWithAuthor>, ApiError> {
        let (rows, total) = db::run(pool, move |conn| {
            find_room(conn, room)?;

            let total = reviews::table
                .filter(reviews::room_id.eq(room))
                .count()
                .get_result::<i64>(conn)?;

            let rows = reviews::table
                .inner_join(users::table.on(users::user_id.eq(reviews::renter_id)))
                .filter(reviews::room_id.eq(room))
                .order((reviews::created_at.desc(), reviews::review_id.desc()))
                .select((Review::as_select(), users::name))
                .limit(page.limit())
                .offset(page.offset())
                .load::<(Review, String)>(conn)?
                .into_iter()
                .map(|(review, author_name)| ReviewWithAuthor { review, author_name })
                .collect();

            Ok((rows, total))
        })
        .await?;

        Ok(Paginated::new(rows, &page, total))
    }

    pub async fn summary(room: i32, pool: &DbPool) -> Result<RatingSummary, ApiError> {
        db::run(pool, move |conn| {
            find_room(conn, room)?;
            Self::rating_summary(conn, room)
        })
        .await
    }

    pub async fn delete(caller: AuthUser, id: i32, pool: &DbPool) -> Result<(), ApiError> {
        let caller_id = caller.user_id;
        db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            let author = reviews::table
                .find(id)
                .select(reviews::renter_id)
                .first::<i32>(conn)
                .optional()?
                .ok_or_else(|| ApiError::not_found("Review"))?;

            if author != caller.user_id && !caller.is_admin() {
                return Err(ApiError::forbidden("Only the author or an admin can delete this review"));
            }

            diesel::delete(reviews::table.find(id)).execute(conn)?;
            Ok(())
        })
        .await?;

        info!("Review {} deleted by user {}", id, caller_id);
        Ok(())
    }
}
