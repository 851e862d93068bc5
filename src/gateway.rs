use std::time::Duration;
use log::{info, error, warn, debug};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AppConfig;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("payment gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("payment gateway rejected the request: {0}")]
    Rejected(String),

    #[error("payment gateway returned status {status}: {body}")]
    Upstream { status: u16, body: String },
}

#[derive(Serialize, Debug, Clone)]
pub struct InvoiceRequest {
    pub external_id: String,
    pub amount: Decimal,
    pub payer_email: String,
    pub description: String,
    pub expires_in_secs: i64,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub reference: String,
    pub checkout_url: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct PayoutRequest {
    pub external_id: String,
    pub amount: Decimal,
    pub method_type: String,
    pub provider_code: String,
    pub account_number: String,
    pub account_holder: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub reference: String,
}

// Either a real HTTP gateway or the sandbox used when none is configured
#[derive(Clone)]
pub enum PaymentGateway {
    Http(HttpGateway),
    Sandbox(SandboxGateway),
}

impl PaymentGateway {
    pub fn from_config(config: &AppConfig) -> Self {
        match (&config.gateway_url, &config.gateway_key) {
            (Some(url), Some(key)) => match HttpGateway::new(url, key) {
                Ok(gateway) => {
                    info!("Payment gateway configured at {}", url);
                    PaymentGateway::Http(gateway)
                },
                Err(e) => {
                    error!("Failed to create payment gateway client: {}. Using sandbox gateway.", e);
                    PaymentGateway::Sandbox(SandboxGateway::new(&config.public_base_url))
                }
            },
            _ => {
                warn!("PAYMENT_GATEWAY_URL/PAYMENT_GATEWAY_KEY not set. Using sandbox gateway.");
                PaymentGateway::Sandbox(SandboxGateway::new(&config.public_base_url))
            }
        }
    }

    pub async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        match self {
            PaymentGateway::Http(gateway) => gateway.create_invoice(request).await,
            PaymentGateway::Sandbox(gateway) => gateway.create_invoice(request),
        }
    }

    pub async fn disburse(&self, request: &PayoutRequest) -> Result<Payout, GatewayError> {
        match self {
            PaymentGateway::Http(gateway) => gateway.disburse(request).await,
            PaymentGateway::Sandbox(gateway) => gateway.disburse(request),
        }
    }
}

// Concrete implementation
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("roomrent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self.client
            .post(&url)
            .basic_auth(&self.api_key, Some(""))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Resp>().await?);
        }

        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            Err(GatewayError::Rejected(text))
        } else {
            Err(GatewayError::Upstream { status: status.as_u16(), body: text })
        }
    }

    pub async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        let invoice: Invoice = self.post("/v1/invoices", request).await?;
        info!("Invoice {} created for {}", invoice.reference, request.external_id);
        Ok(invoice)
    }

    pub async fn disburse(&self, request: &PayoutRequest) -> Result<Payout, GatewayError> {
        let payout: Payout = self.post("/v1/disbursements", request).await?;
        info!("Disbursement {} accepted for {}", payout.reference, request.external_id);
        Ok(payout)
    }
}

// Sandbox gateway for development when no provider is configured
#[derive(Clone)]
pub struct SandboxGateway {
    base_url: String,
}

impl SandboxGateway {
    pub fn new(base_url: &str) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_string() }
    }

    pub fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        if request.amount <= Decimal::ZERO {
            return Err(GatewayError::Rejected("amount must be positive".to_string()));
        }
        let reference = format!("SANDBOX-INV-{}", request.external_id);
        warn!("Using sandbox payment gateway. Invoice {} is not real.", reference);
        Ok(Invoice {
            checkout_url: format!("{}/sandbox/checkout/{}", self.base_url, reference),
            reference,
        })
    }

    /// Account numbers made only of zeros are treated as unknown, which lets the retry path
    /// be exercised locally.
    pub fn disburse(&self, request: &PayoutRequest) -> Result<Payout, GatewayError> {
        if request.account_number.chars().all(|c| c == '0') {
            return Err(GatewayError::Rejected(format!(
                "account {} not found at {}",
                request.account_number, request.provider_code
            )));
        }
        let reference = format!("SANDBOX-DSB-{}", request.external_id);
        warn!("Using sandbox payment gateway. Disbursement {} not sent.", reference);
        Ok(Payout { reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn invoice_request(amount: Decimal) -> InvoiceRequest {
        InvoiceRequest {
            external_id: "payment-42".into(),
            amount,
            payer_email: "renter@example.com".into(),
            description: "Room rent".into(),
            expires_in_secs: 3600,
        }
    }

    fn payout_request(account_number: &str) -> PayoutRequest {
        PayoutRequest {
            external_id: "disbursement-7".into(),
            amount: dec!(950000),
            method_type: "bank_transfer".into(),
            provider_code: "BCA".into(),
            account_number: account_number.into(),
            account_holder: "Budi".into(),
        }
    }

    #[test]
    fn sandbox_invoice_is_deterministic() {
        let gateway = SandboxGateway::new("http://localhost:8080/");
        let invoice = gateway.create_invoice(&invoice_request(dec!(1000))).unwrap();
        assert_eq!(invoice.reference, "SANDBOX-INV-payment-42");
        assert_eq!(invoice.checkout_url, "http://localhost:8080/sandbox/checkout/SANDBOX-INV-payment-42");
    }

    #[test]
    fn sandbox_rejects_non_positive_amount() {
        let gateway = SandboxGateway::new("http://localhost:8080");
        assert!(matches!(
            gateway.create_invoice(&invoice_request(Decimal::ZERO)),
            Err(GatewayError::Rejected(_))
        ));
    }

    #[test]
    fn sandbox_disbursement_fails_for_zero_accounts() {
        let gateway = SandboxGateway::new("http://localhost:8080");
        assert!(gateway.disburse(&payout_request("0000")).is_err());
        let payout = gateway.disburse(&payout_request("1234567890")).unwrap();
        assert_eq!(payout.reference, "SANDBOX-DSB-disbursement-7");
    }

    #[test]
    fn from_config_without_url_uses_sandbox() {
        let config = crate::config::test_config();
        assert!(matches!(PaymentGateway::from_config(&config), PaymentGateway::Sandbox(_)));
    }

    #[test]
    fn from_config_with_url_uses_http() {
        let mut config = crate::config::test_config();
        config.gateway_url = Some("https://gateway.example.com/".into());
        config.gateway_key = Some("sk_test".into());
        match PaymentGateway::from_config(&config) {
            PaymentGateway::Http(gateway) => assert_eq!(gateway.base_url, "https://gateway.example.com"),
            PaymentGateway::Sandbox(_) => panic!("expected http gateway"),
        }
    }
}
