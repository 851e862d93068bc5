use crate::models::*;
use crate::config::{AppConfig, DbPool};
use crate::db;
use crate::errors::ApiError;
use crate::services::user::ensure_active;
use crate::event_handlers::EventPublisher;
use crate::gateway::{InvoiceRequest, PaymentGateway};
use crate::middleware::AuthUser;
use crate::schema::{disbursements, payments, users};
use crate::services::payout::resolve_for_payout;
use crate::services::room::find_room;
use chrono::{Duration, Utc};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy)]
enum Scope {
    Renter(i32),
    Owner(i32),
    All,
}

fn scoped<'a>(scope: Scope, status: Option<PaymentStatus>) -> payments::BoxedQuery<'a, Pg> {
    let mut query = payments::table.into_boxed();
    query = match scope {
        Scope::Renter(renter) => query.filter(payments::renter_id.eq(renter)),
        Scope::Owner(owner) => query.filter(payments::owner_id.eq(owner)),
        Scope::All => query,
    };
    if let Some(s) = status {
        query = query.filter(payments::payment_status.eq(s.as_str()));
    }
    query
}

/// Total rent for `months` months of a room.
pub fn rent_amount(price_per_month: Decimal, months: i32) -> Decimal {
    price_per_month * Decimal::from(months)
}

/// Creates the disbursement for a freshly paid payment. A second call for the same payment is a no-op.
fn enqueue_disbursement(conn: &mut PgConnection, payment: &Payment) -> Result<(), ApiError> {
    let method = resolve_for_payout(conn, payment.owner_id, None)?;
    let inserted = diesel::insert_into(disbursements::table)
        .values(&NewDisbursement {
            payment_id: payment.payment_id,
            owner_id: payment.owner_id,
            payout_method_id: method.map(|m| m.payout_method_id),
            amount: payment.owner_amount,
            status: DisbursementStatus::Pending.as_str().to_string(),
            next_attempt_at: Utc::now().naive_utc(),
        })
        .on_conflict(disbursements::payment_id)
        .do_nothing()
        .execute(conn)?;

    if inserted == 0 {
        debug!("Disbursement for payment {} already exists", payment.payment_id);
    }
    Ok(())
}

pub struct PaymentService;

impl PaymentService {
    pub async fn checkout(
        caller: AuthUser,
        request: CheckoutRequest,
        config: &AppConfig,
        gateway: &PaymentGateway,
        pool: &DbPool,
    ) -> Result<CheckoutResponse, ApiError> {
        caller.require_role(UserRole::Renter)?;
        let request = request.checked()?;

        let fee_percent = config.platform_fee_percent;
        let expiry_minutes = config.payment_expiry_minutes;
        let renter = caller.user_id;

        let (payment, payer_email, room_title) = db::run(pool, move |conn| {
            ensure_active(conn, caller.user_id)?;
            let room = find_room(conn, request.room_id)?;
            if room.owner_id == renter {
                return Err(ApiError::validation("You cannot pay for your own room"));
            }
            if !room.is_available {
                return Err(ApiError::validation("This room is not available"));
            }

            let payer_email = users::table
                .find(renter)
                .select(users::email)
                .first::<String>(conn)?;

            let split = FeeSplit::compute(rent_amount(room.price_per_month, request.months), fee_percent);
            let payment = diesel::insert_into(payments::table)
                .values(&NewPayment {
                    room_id: room.room_id,
                    renter_id: renter,
                    owner_id: room.owner_id,
                    months: request.months,
                    amount: split.amount,
                    platform_fee: split.platform_fee,
                    owner_amount: split.owner_amount,
                    payment_status: PaymentStatus::Pending.as_str().to_string(),
                    transfer_status: TransferStatus::NotStarted.as_str().to_string(),
                    expires_at: (Utc::now() + Duration::minutes(expiry_minutes)).naive_utc(),
                })
                .returning(Payment::as_returning())
                .get_result::<Payment>(conn)?;

            Ok((payment, payer_email, room.title))
        })
        .await?;

        let invoice_request = InvoiceRequest {
            external_id: format!("payment-{}", payment.payment_id),
            amount: payment.amount,
            payer_email,
            description: format!("{} month(s) rent for {}", payment.months, room_title),
            expires_in_secs: expiry_minutes * 60,
        };

        let invoice = match gateway.create_invoice(&invoice_request).await {
            Ok(invoice) => invoice,
            Err(e) => {
                error!("Invoice creation failed for payment {}: {}", payment.payment_id, e);
                let payment_id = payment.payment_id;
                db::run(pool, move |conn| {
                    diesel::update(payments::table.find(payment_id))
                        .set((
                            payments::payment_status.eq(PaymentStatus::Failed.as_str()),
                            payments::updated_at.eq(Utc::now().naive_utc()),
                        ))
                        .execute(conn)?;
                    Ok(())
                })
                .await?;
                return Err(e.into());
            }
        };

        let payment_id = payment.payment_id;
        let payment = db::run(pool, move |conn| {
            Ok(diesel::update(payments::table.find(payment_id))
                .set((
                    payments::gateway_reference.eq(Some(invoice.reference)),
                    payments::checkout_url.eq(Some(invoice.checkout_url)),
                    payments::updated_at.eq(Utc::now().naive_utc()),
                ))
                .returning(Payment::as_returning())
                .get_result::<Payment>(conn)?)
        })
        .await?;

        info!(
            "Checkout {} created: amount {} (fee {}, owner {})",
            payment.payment_id, payment.amount, payment.platform_fee, payment.owner_amount
        );

        Ok(CheckoutResponse {
            checkout_url: payment.checkout_url.clone(),
            payment,
        })
    }

    /// Applies a gateway status report. Only a pending payment changes; anything else is
    /// acknowledged as already settled so the gateway stops retrying.
    pub async fn gateway_callback(
        callback: GatewayCallback,
        events: &EventPublisher,
        pool: &DbPool,
    ) -> Result<CallbackResult, ApiError> {
        let target = callback.status.target();
        let reference = callback.reference;

        let result = db::run(pool, move |conn| {
            conn.transaction::<_, ApiError, _>(|conn| {
                let payment = payments::table
                    .filter(payments::gateway_reference.eq(reference.as_str()))
                    .select(Payment::as_select())
                    .for_update()
                    .first::<Payment>(conn)
                    .optional()?
                    .ok_or_else(|| ApiError::not_found("Payment"))?;

                if CallbackOutcome::for_payment(payment.status()?) == CallbackOutcome::AlreadySettled {
                    if payment.payment_status != target.as_str() {
                        warn!(
                            "Ignoring {} callback for payment {} already {}",
                            target, payment.payment_id, payment.payment_status
                        );
                    }
                    return Ok(CallbackResult { outcome: CallbackOutcome::AlreadySettled, payment });
                }

                let now = Utc::now().naive_utc();
                let settlement = Settlement::for_target(target, now);

                let updated = diesel::update(
                    payments::table
                        .find(payment.payment_id)
                        .filter(payments::payment_status.eq(PaymentStatus::Pending.as_str()))
                )
                .set((
                    payments::payment_status.eq(target.as_str()),
                    payments::transfer_status.eq(settlement.transfer.as_str()),
                    payments::paid_at.eq(settlement.paid_at),
                    payments::updated_at.eq(now),
                ))
                .returning(Payment::as_returning())
                .get_result::<Payment>(conn)?;

                if settlement.enqueue_disbursement {
                    enqueue_disbursement(conn, &updated)?;
                }

                Ok(CallbackResult { outcome: CallbackOutcome::Applied, payment: updated })
            })
        })
        .await?;

        if result.outcome == CallbackOutcome::Applied {
            info!("Payment {} is now {}", result.payment.payment_id, result.payment.payment_status);
            if target == PaymentStatus::Paid {
                events.payment_settled(&result.payment).await;
            }
        }
        Ok(result)
    }

    pub async fn show(caller: AuthUser, id: i32, pool: &DbPool) -> Result<Payment, ApiError> {
        let payment = db::run(pool, move |conn| {
            payments::table
                .find(id)
                .select(Payment::as_select())
                .first::<Payment>(conn)
                .optional()?
                .ok_or_else(|| ApiError::not_found("Payment"))
        })
        .await?;

        if !payment.is_party(caller.user_id) && !caller.is_admin() {
            return Err(ApiError::forbidden("You are not a party to this payment"));
        }
        Ok(payment)
    }

    pub async fn list_mine(caller: AuthUser, query: PaymentListQuery, pool: &DbPool) -> Result<Paginated<Payment>, ApiError> {
        caller.require_role(UserRole::Renter)?;
        Self::list(Scope::Renter(caller.user_id), query, pool).await
    }

    pub async fn list_received(caller: AuthUser, query: PaymentListQuery, pool: &DbPool) -> Result<Paginated<Payment>, ApiError> {
        caller.require_role(UserRole::Owner)?;
        Self::list(Scope::Owner(caller.user_id), query, pool).await
    }

    pub async fn list_all(caller: AuthUser, query: PaymentListQuery, pool: &DbPool) -> Result<Paginated<Payment>, ApiError> {
        caller.require_admin()?;
        Self::list(Scope::All, query, pool).await
    }

    async fn list(scope: Scope, query: PaymentListQuery, pool: &DbPool) -> Result<Paginated<Payment>, ApiError> {
        let page = PageQuery { page: query.page, per_page: query.per_page };
        let status = query.status;

        let (rows, total) = db::run(pool, move |conn| {
            let total = scoped(scope, status).count().get_result::<i64>(conn)?;
            let rows = scoped(scope, status)
                .order((payments::created_at.desc(), payments::payment_id.desc()))
                .select(Payment::as_select())
                .limit(page.limit())
                .offset(page.offset())
                .load::<Payment>(conn)?;
            Ok((rows, total))
        })
        .await?;

        Ok(Paginated::new(rows, &page, total))
    }

    /// Marks pending payments whose checkout window has closed as expired.
    pub async fn expire_stale(pool: &DbPool) -> Result<usize, ApiError> {
        let expired = db::run(pool, |conn| {
            let now = Utc::now().naive_utc();
            Ok(diesel::update(
                payments::table
                    .filter(payments::payment_status.eq(PaymentStatus::Pending.as_str()))
                    .filter(payments::expires_at.lt(now))
            )
            .set((
                payments::payment_status.eq(PaymentStatus::Expired.as_str()),
                payments::updated_at.eq(now),
            ))
            .execute(conn)?)
        })
        .await?;

        if expired > 0 {
            info!("Expired {} stale payment(s)", expired);
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;
    use rust_decimal_macros::dec;

    #[test]
    fn rent_is_price_times_months() {
        assert_eq!(rent_amount(dec!(1250000.50), 3), dec!(3750001.50));
        assert_eq!(rent_amount(dec!(800000), 1), dec!(800000));
    }

    #[test]
    fn checkout_split_matches_amount() {
        let split = FeeSplit::compute(rent_amount(dec!(1333333.33), 7), dec!(5));
        assert_eq!(split.amount, dec!(9333333.31));
        assert_eq!(split.platform_fee + split.owner_amount, split.amount);
    }

    #[test]
    fn admin_scope_has_no_party_filter() {
        let sql = debug_query::<Pg, _>(&scoped(Scope::All, None)).to_string();
        assert!(!sql.contains("WHERE"));

        let sql = debug_query::<Pg, _>(&scoped(Scope::Owner(2), Some(PaymentStatus::Paid))).to_string();
        assert!(sql.contains("\"payments\".\"owner_id\" = $1"));
        assert!(sql.contains("\"payments\".\"payment_status\" = $2"));
    }
}
