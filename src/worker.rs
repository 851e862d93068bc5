use std::time::Duration;
use log::{debug, error, info};
use tokio::task::JoinHandle;

use crate::config::{AppConfig, DbPool};
use crate::event_handlers::EventPublisher;
use crate::gateway::PaymentGateway;
use crate::services::{DisbursementService, PaymentService, ProcessSummary};

/// Everything a background pass needs, owned so it can move onto its own task.
#[derive(Clone)]
pub struct Worker {
    pub config: AppConfig,
    pub pool: DbPool,
    pub gateway: PaymentGateway,
    pub events: EventPublisher,
}

impl Worker {
    pub fn new(config: AppConfig, pool: DbPool, gateway: PaymentGateway, events: EventPublisher) -> Self {
        Self { config, pool, gateway, events }
    }

    /// Expires stale checkouts, then pays out due disbursements.
    pub async fn run_once(&self) -> ProcessSummary {
        if let Err(e) = PaymentService::expire_stale(&self.pool).await {
            error!("Payment expiry pass failed: {}", e);
        }

        match DisbursementService::process_due(&self.config, &self.gateway, &self.events, &self.pool).await {
            Ok(summary) => {
                if summary.claimed > 0 {
                    info!(
                        "Disbursement pass: {} claimed, {} completed, {} failed, {} stalled",
                        summary.claimed, summary.completed, summary.failed, summary.stalled
                    );
                } else {
                    debug!("Disbursement pass: nothing due");
                }
                summary
            },
            Err(e) => {
                error!("Disbursement pass failed: {}", e);
                ProcessSummary::default()
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.worker_interval_secs.max(1));
        info!("Starting background worker every {:?}", period);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }
}
