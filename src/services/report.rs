use crate::models::*;
use crate::config::DbPool;
use crate::db;
use crate::errors::ApiError;
use crate::services::user::ensure_active;
use crate::event_handlers::EventPublisher;
use crate::middleware::AuthUser;
use crate::schema::{reports, rooms};
use crate::services::room::find_room;
use chrono::Utc;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use log::info;

#[derive(Debug, Clone, Copy)]
enum Scope {
    Reporter(i32),
    RoomOwner(i32),
    All,
}

fn scoped<'a>(scope: Scope, status: Option<ReportStatus>, kind: Option<ReportType>) -> reports::BoxedQuery<'a, Pg> {
    let mut query = reports::table.into_boxed();
    query = match scope {
        Scope::Reporter(reporter) => query.filter(reports::reporter_id.eq(reporter)),
        Scope::RoomOwner(owner) => query.filter(
            reports::room_id.eq_any(rooms::table.filter(rooms::owner_id.eq(owner)).select(rooms::room_id))
        ),
        Scope::All => query,
    };
    if let Some(s) = status {
        query = query.filter(reports::status.eq(s.as_str()));
    }
    if let Some(k) = kind {
        query = query.filter(reports::report_type.eq(k.as_str()));
    }
    query
}

fn load_with_owner(conn: &mut PgConnection, id: i32) -> Result<(Report, i32), ApiError> {
    reports::table
        .inner_join(rooms::table)
        .filter(reports::report_id.eq(id))
        .select((Report::as_select(), rooms::owner_id))
        .first::<(Report, i32)>(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Report"))
}

/// Result of an update guarded on the report's previous status. When nothing matched, the
/// report moved underneath us: report the state it moved to.
fn settle_guarded(conn: &mut PgConnection, id: i32, next: ReportStatus, updated: Option<Report>) -> Result<Report, ApiError> {
    match updated {
        Some(report) => Ok(report),
        None => {
            let latest = reports::table
                .find(id)
                .select(reports::status)
                .first::<String>(conn)?
                .parse::<ReportStatus>()?;
            latest.ensure_transition(next)?;
            Err(ApiError::Conflict("The report was changed by someone else; reload and try again".to_string()))
        }
    }
}

pub struct ReportService;

impl ReportService {
    pub async fn create(
        caller: AuthUser,
        request: CreateReportRequest,
        events: &EventPublisher,
        pool: &DbPool,
    ) -> Result<Report, ApiError> {
        let request = request.checked()?;

        let report = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            let room = find_room(conn, request.room_id)?;
            if room.owner_id == caller.user_id {
                return Err(ApiError::forbidden("You cannot report your own room"));
            }

            Ok(diesel::insert_into(reports::table)
                .values(&NewReport {
                    reporter_id: caller.user_id,
                    room_id: room.room_id,
                    report_type: request.report_type.as_str().to_string(),
                    description: request.description,
                    status: ReportStatus::Pending.as_str().to_string(),
                })
                .returning(Report::as_returning())
                .get_result::<Report>(conn)?)
        })
        .await?;

        info!("Report {} filed against room {} ({})", report.report_id, report.room_id, report.report_type);
        events.report_filed(&report).await;
        Ok(report)
    }

    pub async fn list_mine(caller: AuthUser, query: ReportListQuery, pool: &DbPool) -> Result<Paginated<Report>, ApiError> {
        Self::list(Scope::Reporter(caller.user_id), query, pool).await
    }

    pub async fn list_for_my_rooms(caller: AuthUser, query: ReportListQuery, pool: &DbPool) -> Result<Paginated<Report>, ApiError> {
        caller.require_role(UserRole::Owner)?;
        Self::list(Scope::RoomOwner(caller.user_id), query, pool).await
    }

    pub async fn list_all(caller: AuthUser, query: ReportListQuery, pool: &DbPool) -> Result<Paginated<Report>, ApiError> {
        caller.require_admin()?;
        Self::list(Scope::All, query, pool).await
    }

    async fn list(scope: Scope, query: ReportListQuery, pool: &DbPool) -> Result<Paginated<Report>, ApiError> {
        let page = PageQuery { page: query.page, per_page: query.per_page };
        let (status, kind) = (query.status, query.report_type);

        let (rows, total) = db::run(pool, move |conn| {
            let total = scoped(scope, status, kind).count().get_result::<i64>(conn)?;
            let rows = scoped(scope, status, kind)
                .order((reports::created_at.desc(), reports::report_id.desc()))
                .select(Report::as_select())
                .limit(page.limit())
                .offset(page.offset())
                .load::<Report>(conn)?;
            Ok((rows, total))
        })
        .await?;

        Ok(Paginated::new(rows, &page, total))
    }

    /// Owner's answer to a report. A pending report moves to in_review.
    pub async fn respond(
        caller: AuthUser,
        id: i32,
        request: RespondReportRequest,
        events: &EventPublisher,
        pool: &DbPool,
    ) -> Result<Report, ApiError> {
        let request = request.checked()?;
        let response = request.response;

        let (report, moved) = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            let (current, owner) = load_with_owner(conn, id)?;
            if owner != caller.user_id {
                return Err(ApiError::forbidden("Only the room owner can respond to this report"));
            }

            let state = current.status()?;
            if state.is_closed() {
                return Err(ApiError::validation(format!("Report is already {}", state)));
            }

            let now = Utc::now().naive_utc();
            let updated = diesel::update(reports::table.find(id).filter(reports::status.eq(state.as_str())))
                .set((
                    reports::owner_response.eq(Some(response)),
                    reports::responded_at.eq(Some(now)),
                    reports::status.eq(ReportStatus::InReview.as_str()),
                    reports::updated_at.eq(now),
                ))
                .returning(Report::as_returning())
                .get_result::<Report>(conn)
                .optional()?;
            let report = settle_guarded(conn, id, ReportStatus::InReview, updated)?;
            Ok((report, state == ReportStatus::Pending))
        })
        .await?;

        if moved {
            events.report_status_changed(&report).await;
        }
        Ok(report)
    }

    pub async fn update_status(
        caller: AuthUser,
        id: i32,
        request: UpdateReportStatusRequest,
        events: &EventPublisher,
        pool: &DbPool,
    ) -> Result<Report, ApiError> {
        caller.require_admin()?;
        let request = request.checked()?;
        let next = request.status;

        let report = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            let (current, _) = load_with_owner(conn, id)?;
            let state = current.status()?;
            state.ensure_transition(next)?;

            let now = Utc::now().naive_utc();
            let note = request.admin_note.or(current.admin_note);
            let resolved_at = if next.is_closed() { Some(now) } else { None };

            let updated = diesel::update(reports::table.find(id).filter(reports::status.eq(state.as_str())))
                .set((
                    reports::status.eq(next.as_str()),
                    reports::admin_note.eq(note),
                    reports::resolved_at.eq(resolved_at),
                    reports::updated_at.eq(now),
                ))
                .returning(Report::as_returning())
                .get_result::<Report>(conn)
                .optional()?;
            settle_guarded(conn, id, next, updated)
        })
        .await?;

        info!("Report {} moved to {} by admin {}", id, next, caller.user_id);
        events.report_status_changed(&report).await;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;

    #[test]
    fn admin_listing_filters_by_status_and_type() {
        let query = scoped(Scope::All, Some(ReportStatus::Pending), Some(ReportType::Fraud));
        let sql = debug_query::<Pg, _>(&query).to_string();
        assert!(sql.contains("\"reports\".\"status\" = $1"));
        assert!(sql.contains("\"reports\".\"report_type\" = $2"));
    }

    #[test]
    fn owner_listing_uses_owned_rooms() {
        let sql = debug_query::<Pg, _>(&scoped(Scope::RoomOwner(8), None, None)).to_string();
        assert!(sql.contains("\"rooms\".\"owner_id\" = $1"));
    }
}
