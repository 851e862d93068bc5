use crate::models::*;
use crate::config::{AppConfig, DbPool};
use crate::db;
use crate::errors::ApiError;
use crate::services::user::ensure_active;
use crate::event_handlers::EventPublisher;
use crate::gateway::{PaymentGateway, PayoutRequest};
use crate::middleware::AuthUser;
use crate::schema::{disbursements, payments};
use crate::services::payout::resolve_for_payout;
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use log::{debug, error, info, warn};

/// Counts from one worker pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSummary {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Claimed but not settled; picked up again when the lease expires.
    pub stalled: usize,
}

fn scoped<'a>(owner: Option<i32>, status: Option<DisbursementStatus>) -> disbursements::BoxedQuery<'a, Pg> {
    let mut query = disbursements::table.into_boxed();
    if let Some(o) = owner {
        query = query.filter(disbursements::owner_id.eq(o));
    }
    if let Some(s) = status {
        query = query.filter(disbursements::status.eq(s.as_str()));
    }
    query
}

fn set_transfer_status(conn: &mut PgConnection, payment: i32, status: TransferStatus, now: NaiveDateTime) -> Result<(), ApiError> {
    diesel::update(payments::table.find(payment))
        .set((
            payments::transfer_status.eq(status.as_str()),
            payments::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

/// Disbursements ready for an attempt: pending, failed with retries left, or processing with
/// an expired claim lease.
fn due_query<'a>(max_retries: i32, now: NaiveDateTime) -> disbursements::BoxedQuery<'a, Pg> {
    disbursements::table
        .filter(
            disbursements::status
                .eq(DisbursementStatus::Pending.as_str())
                .or(disbursements::status
                    .eq(DisbursementStatus::Failed.as_str())
                    .and(disbursements::retry_count.lt(max_retries)))
                .or(disbursements::status.eq(DisbursementStatus::Processing.as_str()))
        )
        .filter(disbursements::next_attempt_at.le(now))
        .into_boxed()
}

fn due_ids(conn: &mut PgConnection, max_retries: i32, batch: i64, now: NaiveDateTime) -> Result<Vec<i32>, ApiError> {
    Ok(due_query(max_retries, now)
        .order((disbursements::next_attempt_at.asc(), disbursements::disbursement_id.asc()))
        .select(disbursements::disbursement_id)
        .limit(batch)
        .load::<i32>(conn)?)
}

/// Moves a due disbursement to `processing` and leases it until `now + lease`. A claim that is
/// never settled becomes due again once the lease runs out. Returns `None` when another worker
/// got there first.
fn claim(
    conn: &mut PgConnection,
    id: i32,
    max_retries: i32,
    lease: Duration,
    now: NaiveDateTime,
) -> Result<Option<Disbursement>, ApiError> {
    conn.transaction::<_, ApiError, _>(|conn| {
        let claimed = diesel::update(
            disbursements::table
                .find(id)
                .filter(
                    disbursements::status
                        .eq(DisbursementStatus::Pending.as_str())
                        .or(disbursements::status
                            .eq(DisbursementStatus::Failed.as_str())
                            .and(disbursements::retry_count.lt(max_retries)))
                        .or(disbursements::status.eq(DisbursementStatus::Processing.as_str()))
                )
                .filter(disbursements::next_attempt_at.le(now))
        )
        .set((
            disbursements::status.eq(DisbursementStatus::Processing.as_str()),
            disbursements::next_attempt_at.eq(now + lease),
            disbursements::updated_at.eq(now),
        ))
        .returning(Disbursement::as_returning())
        .get_result::<Disbursement>(conn)
        .optional()?;

        if let Some(disbursement) = &claimed {
            set_transfer_status(conn, disbursement.payment_id, TransferStatus::Processing, now)?;
        }
        Ok(claimed)
    })
}

pub struct DisbursementService;

impl DisbursementService {
    /// One worker pass over due disbursements.
    pub async fn process_due(
        config: &AppConfig,
        gateway: &PaymentGateway,
        events: &EventPublisher,
        pool: &DbPool,
    ) -> Result<ProcessSummary, ApiError> {
        let max_retries = config.disbursement_max_retries;
        let batch = config.worker_batch_size;

        let ids = db::run(pool, move |conn| due_ids(conn, max_retries, batch, Utc::now().naive_utc())).await?;
        let mut summary = ProcessSummary::default();

        for id in ids {
            let lease = Duration::seconds(config.disbursement_lease_secs);
            let claimed = match db::run(pool, move |conn| claim(conn, id, max_retries, lease, Utc::now().naive_utc())).await {
                Ok(Some(disbursement)) => disbursement,
                Ok(None) => {
                    debug!("Disbursement {} was claimed elsewhere", id);
                    continue;
                },
                Err(e) => {
                    error!("Failed to claim disbursement {}: {}", id, e);
                    continue;
                }
            };
            summary.claimed += 1;

            let settled = match Self::attempt(claimed, config, gateway, pool).await {
                Ok(settled) => settled,
                Err(e) => {
                    error!("Disbursement {} left in processing until its lease expires: {}", id, e);
                    summary.stalled += 1;
                    continue;
                }
            };
            if matches!(settled.status(), Ok(DisbursementStatus::Completed)) {
                summary.completed += 1;
                events.disbursement_completed(&settled).await;
            } else {
                summary.failed += 1;
                events.disbursement_failed(&settled).await;
            }
        }

        Ok(summary)
    }

    async fn attempt(
        disbursement: Disbursement,
        config: &AppConfig,
        gateway: &PaymentGateway,
        pool: &DbPool,
    ) -> Result<Disbursement, ApiError> {
        let owner = disbursement.owner_id;
        let preferred = disbursement.payout_method_id;
        let resolved = db::run(pool, move |conn| resolve_for_payout(conn, owner, preferred)).await;

        let (method_id, outcome) = match resolved {
            Err(e) => (preferred, Err(format!("Could not load payout method: {}", e))),
            Ok(None) => (None, Err("No payout method configured".to_string())),
            Ok(Some(method)) => {
                let request = PayoutRequest {
                    external_id: format!("disbursement-{}", disbursement.disbursement_id),
                    amount: disbursement.amount,
                    method_type: method.method_type,
                    provider_code: method.provider_code,
                    account_number: method.account_number,
                    account_holder: method.account_holder,
                };
                (Some(method.payout_method_id), gateway.disburse(&request).await.map_err(|e| e.to_string()))
            }
        };

        let id = disbursement.disbursement_id;
        let payment = disbursement.payment_id;
        let max_retries = config.disbursement_max_retries;
        let base = config.disbursement_retry_base_secs;
        let cap = config.disbursement_retry_max_secs;

        db::run(pool, move |conn| {
            let now = Utc::now().naive_utc();
            conn.transaction::<_, ApiError, _>(|conn| match outcome {
                Ok(payout) => {
                    let done = diesel::update(disbursements::table.find(id))
                        .set((
                            disbursements::status.eq(DisbursementStatus::Completed.as_str()),
                            disbursements::payout_method_id.eq(method_id),
                            disbursements::gateway_reference.eq(Some(payout.reference)),
                            disbursements::last_error.eq(None::<String>),
                            disbursements::completed_at.eq(Some(now)),
                            disbursements::updated_at.eq(now),
                        ))
                        .returning(Disbursement::as_returning())
                        .get_result::<Disbursement>(conn)?;
                    set_transfer_status(conn, payment, TransferStatus::Completed, now)?;
                    info!("Disbursement {} completed for payment {}", id, payment);
                    Ok(done)
                },
                Err(reason) => {
                    let attempts = disbursement.retry_count + 1;
                    let next_attempt = now + retry_delay(attempts, base, cap);
                    let failed = diesel::update(disbursements::table.find(id))
                        .set((
                            disbursements::status.eq(DisbursementStatus::Failed.as_str()),
                            disbursements::payout_method_id.eq(method_id),
                            disbursements::retry_count.eq(attempts),
                            disbursements::last_error.eq(Some(reason.clone())),
                            disbursements::next_attempt_at.eq(next_attempt),
                            disbursements::updated_at.eq(now),
                        ))
                        .returning(Disbursement::as_returning())
                        .get_result::<Disbursement>(conn)?;

                    if failed.retries_exhausted(max_retries) {
                        error!("Disbursement {} failed permanently after {} attempts: {}", id, attempts, reason);
                        set_transfer_status(conn, payment, TransferStatus::Failed, now)?;
                    } else {
                        warn!("Disbursement {} attempt {} failed: {}. Next attempt at {}", id, attempts, reason, next_attempt);
                        set_transfer_status(conn, payment, TransferStatus::Pending, now)?;
                    }
                    Ok(failed)
                },
            })
        })
        .await
    }

    pub async fn list(caller: AuthUser, query: DisbursementListQuery, pool: &DbPool) -> Result<Paginated<Disbursement>, ApiError> {
        caller.require_admin()?;
        Self::list_scoped(None, query, pool).await
    }

    pub async fn list_mine(caller: AuthUser, query: DisbursementListQuery, pool: &DbPool) -> Result<Paginated<Disbursement>, ApiError> {
        caller.require_role(UserRole::Owner)?;
        Self::list_scoped(Some(caller.user_id), query, pool).await
    }

    async fn list_scoped(owner: Option<i32>, query: DisbursementListQuery, pool: &DbPool) -> Result<Paginated<Disbursement>, ApiError> {
        let page = PageQuery { page: query.page, per_page: query.per_page };
        let status = query.status;

        let (rows, total) = db::run(pool, move |conn| {
            let total = scoped(owner, status).count().get_result::<i64>(conn)?;
            let rows = scoped(owner, status)
                .order((disbursements::created_at.desc(), disbursements::disbursement_id.desc()))
                .select(Disbursement::as_select())
                .limit(page.limit())
                .offset(page.offset())
                .load::<Disbursement>(conn)?;
            Ok((rows, total))
        })
        .await?;

        Ok(Paginated::new(rows, &page, total))
    }

    /// Puts a failed disbursement back in the queue, due now. Exhausted retries start over.
    pub async fn retry(caller: AuthUser, id: i32, config: &AppConfig, pool: &DbPool) -> Result<Disbursement, ApiError> {
        caller.require_admin()?;
        let max_retries = config.disbursement_max_retries;

        let disbursement = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            conn.transaction::<_, ApiError, _>(|conn| {
                let current = disbursements::table
                    .find(id)
                    .select(Disbursement::as_select())
                    .for_update()
                    .first::<Disbursement>(conn)
                    .optional()?
                    .ok_or_else(|| ApiError::not_found("Disbursement"))?;

                let status = current.status()?;
                if status != DisbursementStatus::Failed {
                    return Err(ApiError::validation(format!("Only failed disbursements can be retried; this one is {}", status)));
                }

                let retry_count = if current.retries_exhausted(max_retries) { 0 } else { current.retry_count };
                let now = Utc::now().naive_utc();

                let queued = diesel::update(disbursements::table.find(id))
                    .set((
                        disbursements::status.eq(DisbursementStatus::Pending.as_str()),
                        disbursements::retry_count.eq(retry_count),
                        disbursements::next_attempt_at.eq(now),
                        disbursements::updated_at.eq(now),
                    ))
                    .returning(Disbursement::as_returning())
                    .get_result::<Disbursement>(conn)?;
                set_transfer_status(conn, queued.payment_id, TransferStatus::Pending, now)?;
                Ok(queued)
            })
        })
        .await?;

        info!("Disbursement {} requeued by admin {}", id, caller.user_id);
        Ok(disbursement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;

    #[test]
    fn owner_listing_is_scoped() {
        let sql = debug_query::<Pg, _>(&scoped(Some(5), Some(DisbursementStatus::Failed))).to_string();
        assert!(sql.contains("\"disbursements\".\"owner_id\" = $1"));
        assert!(sql.contains("\"disbursements\".\"status\" = $2"));

        let sql = debug_query::<Pg, _>(&scoped(None, None)).to_string();
        assert!(!sql.contains("WHERE"));
    }

    #[test]
    fn due_query_reclaims_expired_leases() {
        let now = Utc::now().naive_utc();
        let sql = debug_query::<Pg, _>(&due_query(5, now)).to_string();
        assert!(sql.contains("\"disbursements\".\"retry_count\" < $3"));
        assert!(sql.contains("\"disbursements\".\"status\" = $4"));
        assert!(sql.contains("\"disbursements\".\"next_attempt_at\" <= $5"));
        assert!(sql.contains("\"processing\""));
    }

    #[test]
    fn summary_starts_empty() {
        assert_eq!(ProcessSummary::default(), ProcessSummary { claimed: 0, completed: 0, failed: 0, stalled: 0 });
    }
}
