use chrono::{Duration, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use diesel::prelude::*;
use validator::Validate;

use super::Checked;

use crate::errors::ApiError;

db_enum!(PaymentStatus {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
    Expired => "expired",
});

db_enum!(TransferStatus {
    NotStarted => "not_started",
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

db_enum!(DisbursementStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

db_enum!(PayoutMethodType {
    BankTransfer => "bank_transfer",
    EWallet => "e_wallet",
});

/// How a gross amount is divided between the platform and the room owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeSplit {
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub owner_amount: Decimal,
}

impl FeeSplit {
    /// The fee is rounded half-up to cents and the owner gets the remainder, so the parts
    /// always add back up to `amount`.
    pub fn compute(amount: Decimal, fee_percent: Decimal) -> Self {
        let platform_fee = (amount * fee_percent / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Self {
            amount,
            platform_fee,
            owner_amount: amount - platform_fee,
        }
    }
}

/// Delay before the next disbursement attempt after `retry_count` failures.
pub fn retry_delay(retry_count: i32, base_secs: i64, max_secs: i64) -> Duration {
    let exponent = retry_count.saturating_sub(1).clamp(0, 30) as u32;
    let secs = base_secs.saturating_mul(1i64 << exponent).min(max_secs);
    Duration::seconds(secs)
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Payment {
    pub payment_id: i32,
    pub room_id: i32,
    pub renter_id: i32,
    pub owner_id: i32,
    pub months: i32,
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub owner_amount: Decimal,
    pub payment_status: String,
    pub transfer_status: String,
    pub gateway_reference: Option<String>,
    pub checkout_url: Option<String>,
    pub expires_at: NaiveDateTime,
    pub paid_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Payment {
    pub fn status(&self) -> Result<PaymentStatus, ApiError> {
        self.payment_status.parse()
    }

    pub fn is_party(&self, user_id: i32) -> bool {
        self.renter_id == user_id || self.owner_id == user_id
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::payments)]
pub struct NewPayment {
    pub room_id: i32,
    pub renter_id: i32,
    pub owner_id: i32,
    pub months: i32,
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub owner_amount: Decimal,
    pub payment_status: String,
    pub transfer_status: String,
    pub expires_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::payout_methods)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PayoutMethod {
    pub payout_method_id: i32,
    pub owner_id: i32,
    pub method_type: String,
    pub provider_code: String,
    pub account_number: String,
    pub account_holder: String,
    pub is_default: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::payout_methods)]
pub struct NewPayoutMethod {
    pub owner_id: i32,
    pub method_type: String,
    pub provider_code: String,
    pub account_number: String,
    pub account_holder: String,
    pub is_default: bool,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::disbursements)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Disbursement {
    pub disbursement_id: i32,
    pub payment_id: i32,
    pub owner_id: i32,
    pub payout_method_id: Option<i32>,
    pub amount: Decimal,
    pub status: String,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: NaiveDateTime,
    pub gateway_reference: Option<String>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Disbursement {
    pub fn status(&self) -> Result<DisbursementStatus, ApiError> {
        self.status.parse()
    }

    pub fn retries_exhausted(&self, max_retries: i32) -> bool {
        self.retry_count >= max_retries
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::disbursements)]
pub struct NewDisbursement {
    pub payment_id: i32,
    pub owner_id: i32,
    pub payout_method_id: Option<i32>,
    pub amount: Decimal,
    pub status: String,
    pub next_attempt_at: NaiveDateTime,
}

// DTOs
#[derive(Deserialize, Validate, Debug)]
pub struct CheckoutRequest {
    pub room_id: i32,
    #[validate(range(min = 1, max = 12, message = "Months must be between 1 and 12"))]
    pub months: i32,
}

impl Checked for CheckoutRequest {}

/// Status values the gateway reports back. Anything else is rejected.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum GatewayPaymentStatus {
    Paid,
    Expired,
    Failed,
}

impl GatewayPaymentStatus {
    pub fn target(&self) -> PaymentStatus {
        match self {
            GatewayPaymentStatus::Paid => PaymentStatus::Paid,
            GatewayPaymentStatus::Expired => PaymentStatus::Expired,
            GatewayPaymentStatus::Failed => PaymentStatus::Failed,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct GatewayCallback {
    pub reference: String,
    pub status: GatewayPaymentStatus,
}

/// Outcome of applying a gateway callback.
#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Applied,
    AlreadySettled,
}

impl CallbackOutcome {
    /// Only a pending payment moves. Repeats and conflicting reports on a settled payment are
    /// acknowledged unchanged.
    pub fn for_payment(current: PaymentStatus) -> Self {
        if current == PaymentStatus::Pending {
            CallbackOutcome::Applied
        } else {
            CallbackOutcome::AlreadySettled
        }
    }
}

/// Settlement fields a pending payment takes when the gateway reports `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub paid_at: Option<NaiveDateTime>,
    pub transfer: TransferStatus,
    pub enqueue_disbursement: bool,
}

impl Settlement {
    pub fn for_target(target: PaymentStatus, now: NaiveDateTime) -> Self {
        if target == PaymentStatus::Paid {
            Settlement { paid_at: Some(now), transfer: TransferStatus::Pending, enqueue_disbursement: true }
        } else {
            Settlement { paid_at: None, transfer: TransferStatus::NotStarted, enqueue_disbursement: false }
        }
    }
}

#[derive(Serialize, Debug)]
pub struct CallbackResult {
    pub outcome: CallbackOutcome,
    pub payment: Payment,
}

#[derive(Deserialize, Validate, Debug)]
pub struct CreatePayoutMethodRequest {
    pub method_type: PayoutMethodType,
    #[validate(length(min = 2, max = 50, message = "Provider code must be between 2 and 50 characters"))]
    pub provider_code: String,
    #[validate(length(min = 4, max = 50, message = "Account number must be between 4 and 50 characters"))]
    pub account_number: String,
    #[validate(length(min = 2, max = 120, message = "Account holder must be between 2 and 120 characters"))]
    pub account_holder: String,
    pub is_default: Option<bool>,
}

impl Checked for CreatePayoutMethodRequest {
    fn trimmed(mut self) -> Self {
        self.provider_code = self.provider_code.trim().to_string();
        self.account_number = self.account_number.trim().to_string();
        self.account_holder = self.account_holder.trim().to_string();
        self
    }
}

impl CreatePayoutMethodRequest {
    pub fn normalized_account_number(&self) -> Result<String, ApiError> {
        let digits: String = self.account_number.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ApiError::validation("Account number must contain digits only"));
        }
        Ok(digits)
    }
}

#[derive(Deserialize, Debug)]
pub struct PaymentListQuery {
    pub status: Option<PaymentStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Deserialize, Debug)]
pub struct DisbursementListQuery {
    pub status: Option<DisbursementStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Serialize, Debug)]
pub struct CheckoutResponse {
    pub payment: Payment,
    pub checkout_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fee_split_adds_up() {
        let split = FeeSplit::compute(dec!(1500000), dec!(5));
        assert_eq!(split.platform_fee, dec!(75000));
        assert_eq!(split.owner_amount, dec!(1425000));
        assert_eq!(split.platform_fee + split.owner_amount, split.amount);
    }

    #[test]
    fn fee_split_rounds_half_up_to_cents() {
        // 2.5% of 10.10 is 0.2525
        let split = FeeSplit::compute(dec!(10.10), dec!(2.5));
        assert_eq!(split.platform_fee, dec!(0.25));
        assert_eq!(split.owner_amount, dec!(9.85));

        // 5% of 0.30 is 0.015
        let split = FeeSplit::compute(dec!(0.30), dec!(5));
        assert_eq!(split.platform_fee, dec!(0.02));
        assert_eq!(split.owner_amount, dec!(0.28));
    }

    #[test]
    fn zero_fee_pays_everything_to_owner() {
        let split = FeeSplit::compute(dec!(999.99), Decimal::ZERO);
        assert_eq!(split.platform_fee, Decimal::ZERO);
        assert_eq!(split.owner_amount, dec!(999.99));
    }

    #[test]
    fn retry_delay_doubles_until_capped() {
        assert_eq!(retry_delay(1, 60, 3600), Duration::seconds(60));
        assert_eq!(retry_delay(2, 60, 3600), Duration::seconds(120));
        assert_eq!(retry_delay(3, 60, 3600), Duration::seconds(240));
        assert_eq!(retry_delay(7, 60, 3600), Duration::seconds(3600));
        assert_eq!(retry_delay(1000, 60, 3600), Duration::seconds(3600));
        assert_eq!(retry_delay(0, 60, 3600), Duration::seconds(60));
    }

    #[test]
    fn months_are_bounded() {
        let ok = CheckoutRequest { room_id: 1, months: 12 };
        assert!(ok.checked().is_ok());
        let zero = CheckoutRequest { room_id: 1, months: 0 };
        assert!(zero.checked().is_err());
        let too_many = CheckoutRequest { room_id: 1, months: 13 };
        assert!(too_many.checked().is_err());
    }

    #[test]
    fn only_pending_payments_take_a_callback() {
        assert_eq!(CallbackOutcome::for_payment(PaymentStatus::Pending), CallbackOutcome::Applied);
        for settled in [PaymentStatus::Paid, PaymentStatus::Failed, PaymentStatus::Expired] {
            assert_eq!(CallbackOutcome::for_payment(settled), CallbackOutcome::AlreadySettled);
        }
    }

    #[test]
    fn repeated_paid_callback_is_acknowledged_once_settled() {
        let now = chrono::NaiveDate::from_ymd_opt(2024, 5, 1).and_then(|d| d.and_hms_opt(10, 0, 0)).unwrap();
        let first = Settlement::for_target(GatewayPaymentStatus::Paid.target(), now);
        assert!(first.enqueue_disbursement);
        assert_eq!(first.paid_at, Some(now));
        assert_eq!(first.transfer, TransferStatus::Pending);
        assert_eq!(CallbackOutcome::for_payment(PaymentStatus::Paid), CallbackOutcome::AlreadySettled);
    }

    #[test]
    fn expiry_and_failure_never_pay_out() {
        let now = chrono::NaiveDate::from_ymd_opt(2024, 5, 1).and_then(|d| d.and_hms_opt(10, 0, 0)).unwrap();
        for target in [PaymentStatus::Expired, PaymentStatus::Failed] {
            let settlement = Settlement::for_target(target, now);
            assert!(!settlement.enqueue_disbursement);
            assert_eq!(settlement.paid_at, None);
            assert_eq!(settlement.transfer, TransferStatus::NotStarted);
        }
    }

    #[test]
    fn gateway_status_parses_uppercase() {
        let callback: GatewayCallback =
            serde_json::from_str(r#"{"reference":"INV-1","status":"PAID"}"#).unwrap();
        assert_eq!(callback.status.target(), PaymentStatus::Paid);
        assert!(serde_json::from_str::<GatewayCallback>(r#"{"reference":"INV-1","status":"SETTLING"}"#).is_err());
    }

    #[test]
    fn account_number_is_normalized() {
        let request = CreatePayoutMethodRequest {
            method_type: PayoutMethodType::BankTransfer,
            provider_code: "BCA".into(),
            account_number: "123-456 7890".into(),
            account_holder: "Budi Santoso".into(),
            is_default: None,
        };
        assert_eq!(request.normalized_account_number().unwrap(), "1234567890");

        let bad = CreatePayoutMethodRequest { account_number: "12ab".into(), ..request };
        assert!(bad.normalized_account_number().is_err());
    }

    #[test]
    fn exhausted_retries() {
        let now = chrono::Utc::now().naive_utc();
        let disbursement = Disbursement {
            disbursement_id: 1,
            payment_id: 1,
            owner_id: 2,
            payout_method_id: None,
            amount: dec!(100),
            status: "failed".into(),
            retry_count: 5,
            last_error: Some("timeout".into()),
            next_attempt_at: now,
            gateway_reference: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(disbursement.retries_exhausted(5));
        assert!(!disbursement.retries_exhausted(6));
        assert_eq!(disbursement.status().unwrap(), DisbursementStatus::Failed);
    }
}
