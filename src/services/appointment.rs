use crate::models::*;
use crate::config::DbPool;
use crate::db;
use crate::errors::ApiError;
use crate::services::user::ensure_active;
use crate::event_handlers::EventPublisher;
use crate::middleware::AuthUser;
use crate::schema::{rooms, survey_appointments};
use crate::services::room::find_room;
use chrono::Utc;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use log::{debug, info};

#[derive(Debug, Clone, Copy)]
enum Scope {
    Renter(i32),
    Owner(i32),
}

fn scoped<'a>(scope: Scope, status: Option<AppointmentStatus>) -> survey_appointments::BoxedQuery<'a, Pg> {
    let mut query = survey_appointments::table.into_boxed();
    query = match scope {
        Scope::Renter(renter) => query.filter(survey_appointments::renter_id.eq(renter)),
        Scope::Owner(owner) => query.filter(
            survey_appointments::room_id.eq_any(
                rooms::table.filter(rooms::owner_id.eq(owner)).select(rooms::room_id)
            )
        ),
    };
    if let Some(s) = status {
        query = query.filter(survey_appointments::status.eq(s.as_str()));
    }
    query
}

/// The appointment together with the owner of its room.
fn load_with_owner(conn: &mut PgConnection, id: i32) -> Result<(Appointment, i32), ApiError> {
    survey_appointments::table
        .inner_join(rooms::table)
        .filter(survey_appointments::appointment_id.eq(id))
        .select((Appointment::as_select(), rooms::owner_id))
        .first::<(Appointment, i32)>(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Appointment"))
}

/// Moves a scheduled appointment to `next`. The status guard in the WHERE clause means only one
/// of several concurrent transitions can win; the losers see the state the winner left.
fn apply_transition(
    conn: &mut PgConnection,
    current: &Appointment,
    next: AppointmentStatus,
    reason: Option<String>,
) -> Result<Appointment, ApiError> {
    let state = current.status()?;
    if !state.can_transition_to(next) {
        return Err(state.transition_error(next));
    }

    let updated = diesel::update(
        survey_appointments::table
            .find(current.appointment_id)
            .filter(survey_appointments::status.eq(AppointmentStatus::Scheduled.as_str()))
    )
    .set((
        survey_appointments::status.eq(next.as_str()),
        survey_appointments::cancel_reason.eq(reason),
        survey_appointments::updated_at.eq(Utc::now().naive_utc()),
    ))
    .returning(Appointment::as_returning())
    .get_result::<Appointment>(conn)
    .optional()?;

    match updated {
        Some(appointment) => Ok(appointment),
        None => {
            let latest = survey_appointments::table
                .find(current.appointment_id)
                .select(survey_appointments::status)
                .first::<String>(conn)?
                .parse::<AppointmentStatus>()?;
            debug!("Appointment {} lost a race to {}", current.appointment_id, latest);
            Err(latest.transition_error(next))
        }
    }
}

pub struct AppointmentService;

impl AppointmentService {
    pub async fn book(
        caller: AuthUser,
        request: BookAppointmentRequest,
        events: &EventPublisher,
        pool: &DbPool,
    ) -> Result<Appointment, ApiError> {
        caller.require_role(UserRole::Renter)?;
        let request = request.checked()?;
        ensure_future(request.scheduled_at, Utc::now().naive_utc())?;

        let appointment = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            let room = find_room(conn, request.room_id)?;
            if room.owner_id == caller.user_id {
                return Err(ApiError::validation("You cannot book a survey of your own room"));
            }
            if !room.is_available {
                return Err(ApiError::validation("This room is not available"));
            }

            diesel::insert_into(survey_appointments::table)
                .values(&NewAppointment {
                    room_id: room.room_id,
                    renter_id: caller.user_id,
                    scheduled_at: request.scheduled_at,
                    status: AppointmentStatus::Scheduled.as_str().to_string(),
                    notes: request.notes.filter(|n| !n.is_empty()),
                })
                .returning(Appointment::as_returning())
                .get_result::<Appointment>(conn)
                .map_err(|e| match ApiError::from(e) {
                    ApiError::Conflict(_) => {
                        ApiError::Conflict("You already have a scheduled survey for this room".to_string())
                    },
                    other => other,
                })
        })
        .await?;

        info!("Renter {} booked appointment {} for room {}", appointment.renter_id, appointment.appointment_id, appointment.room_id);
        events.appointment_booked(&appointment).await;
        Ok(appointment)
    }

    pub async fn cancel(
        caller: AuthUser,
        id: i32,
        request: CancelAppointmentRequest,
        events: &EventPublisher,
        pool: &DbPool,
    ) -> Result<Appointment, ApiError> {
        let request = request.checked()?;
        let reason = request.reason.filter(|r| !r.is_empty());

        let appointment = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            let (current, owner) = load_with_owner(conn, id)?;
            if current.renter_id != caller.user_id && owner != caller.user_id {
                return Err(ApiError::forbidden("Only the renter or the room owner can cancel this appointment"));
            }
            apply_transition(conn, &current, AppointmentStatus::Cancelled, reason)
        })
        .await?;

        info!("Appointment {} cancelled", id);
        events.appointment_status_changed(&appointment).await;
        Ok(appointment)
    }

    pub async fn reschedule(caller: AuthUser, id: i32, request: RescheduleRequest, pool: &DbPool) -> Result<Appointment, ApiError> {
        let now = Utc::now().naive_utc();
        ensure_future(request.scheduled_at, now)?;

        db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            let (current, _) = load_with_owner(conn, id)?;
            if current.renter_id != caller.user_id {
                return Err(ApiError::forbidden("Only the renter can reschedule this appointment"));
            }

            diesel::update(
                survey_appointments::table
                    .find(id)
                    .filter(survey_appointments::status.eq(AppointmentStatus::Scheduled.as_str()))
            )
            .set((
                survey_appointments::scheduled_at.eq(request.scheduled_at),
                survey_appointments::updated_at.eq(now),
            ))
            .returning(Appointment::as_returning())
            .get_result::<Appointment>(conn)
            .optional()?
            .ok_or_else(|| ApiError::validation(format!("Appointment is already {}", current.status)))
        })
        .await
    }

    pub async fn complete(caller: AuthUser, id: i32, events: &EventPublisher, pool: &DbPool) -> Result<Appointment, ApiError> {
        Self::close_by_owner(caller, id, AppointmentStatus::Completed, events, pool).await
    }

    pub async fn mark_no_show(caller: AuthUser, id: i32, events: &EventPublisher, pool: &DbPool) -> Result<Appointment, ApiError> {
        Self::close_by_owner(caller, id, AppointmentStatus::NoShow, events, pool).await
    }

    async fn close_by_owner(
        caller: AuthUser,
        id: i32,
        next: AppointmentStatus,
        events: &EventPublisher,
        pool: &DbPool,
    ) -> Result<Appointment, ApiError> {
        let appointment = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            let (current, owner) = load_with_owner(conn, id)?;
            if owner != caller.user_id {
                return Err(ApiError::forbidden("Only the room owner can close this appointment"));
            }
            let state = current.status()?;
            if state == AppointmentStatus::Scheduled && current.scheduled_at > Utc::now().naive_utc() {
                return Err(ApiError::validation("The appointment time has not passed yet"));
            }
            apply_transition(conn, &current, next, None)
        })
        .await?;

        info!("Appointment {} marked {}", id, next);
        events.appointment_status_changed(&appointment).await;
        Ok(appointment)
    }

    pub async fn list_mine(caller: AuthUser, query: AppointmentQuery, pool: &DbPool) -> Result<Paginated<Appointment>, ApiError> {
        caller.require_role(UserRole::Renter)?;
        Self::list(Scope::Renter(caller.user_id), query, pool).await
    }

    pub async fn list_incoming(caller: AuthUser, query: AppointmentQuery, pool: &DbPool) -> Result<Paginated<Appointment>, ApiError> {
        caller.require_role(UserRole::Owner)?;
        Self::list(Scope::Owner(caller.user_id), query, pool).await
    }

    async fn list(scope: Scope, query: AppointmentQuery, pool: &DbPool) -> Result<Paginated<Appointment>, ApiError> {
        let page = PageQuery { page: query.page, per_page: query.per_page };
        let status = query.status;

        let (rows, total) = db::run(pool, move |conn| {
            let total = scoped(scope, status).count().get_result::<i64>(conn)?;
            let rows = scoped(scope, status)
                .order((survey_appointments::scheduled_at.asc(), survey_appointments::appointment_id.asc()))
                .select(Appointment::as_select())
                .limit(page.limit())
                .offset(page.offset())
                .load::<Appointment>(conn)?;
            Ok((rows, total))
        })
        .await?;

        Ok(Paginated::new(rows, &page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;

    #[test]
    fn renter_scope_filters_by_renter() {
        let sql = debug_query::<Pg, _>(&scoped(Scope::Renter(4), Some(AppointmentStatus::Scheduled))).to_string();
        assert!(sql.contains("\"survey_appointments\".\"renter_id\" = $1"));
        assert!(sql.contains("\"survey_appointments\".\"status\" = $2"));
    }

    #[test]
    fn owner_scope_uses_owned_rooms() {
        let sql = debug_query::<Pg, _>(&scoped(Scope::Owner(4), None)).to_string();
        assert!(sql.contains("\"rooms\".\"owner_id\" = $1"));
        assert!(!sql.contains("\"survey_appointments\".\"status\" ="));
    }
}
