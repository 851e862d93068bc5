use diesel::r2d2::{self, ConnectionManager};
use diesel::pg::PgConnection;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use log::warn;
use rand::{thread_rng, Rng};
use rand::distributions::Alphanumeric;

// Type aliases
pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub const DEFAULT_CALLBACK_TOKEN: &str = "change-me-callback-token";

// Config
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_pool_size: u32,
    pub jwt_secret: String,
    pub jwt_expiry: i64, // In hours
    pub refresh_expiry: i64, // In days
    pub platform_fee_percent: Decimal,
    pub payment_expiry_minutes: i64,
    pub payment_callback_token: String,
    pub gateway_url: Option<String>,
    pub gateway_key: Option<String>,
    pub public_base_url: String,
    pub disbursement_max_retries: i32,
    pub disbursement_retry_base_secs: i64,
    pub disbursement_retry_max_secs: i64,
    pub disbursement_lease_secs: i64,
    pub worker_interval_secs: u64,
    pub worker_batch_size: i64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            warn!("Ignoring unparsable value for {}: {:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(val) => val,
            Err(e) => {
                warn!("Failed to load JWT_SECRET: {}", e);
                warn!("Using a random per-process JWT secret; tokens will not survive a restart");
                Self::generate_secure_secret()
            }
        };

        let payment_callback_token = env::var("PAYMENT_CALLBACK_TOKEN")
            .unwrap_or_else(|_| DEFAULT_CALLBACK_TOKEN.to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_or("PORT", 8080u16);

        Self {
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            host,
            port,
            database_url: env::var("DATABASE_URL").unwrap_or_default(),
            db_pool_size: env_or("DB_POOL_SIZE", 10),
            jwt_secret,
            jwt_expiry: env_or("JWT_EXPIRY_HOURS", 24),
            refresh_expiry: env_or("REFRESH_EXPIRY_DAYS", 30),
            platform_fee_percent: env_or("PLATFORM_FEE_PERCENT", Decimal::from(5)),
            payment_expiry_minutes: env_or("PAYMENT_EXPIRY_MINUTES", 60),
            payment_callback_token,
            gateway_url: env::var("PAYMENT_GATEWAY_URL").ok().filter(|s| !s.is_empty()),
            gateway_key: env::var("PAYMENT_GATEWAY_KEY").ok().filter(|s| !s.is_empty()),
            disbursement_max_retries: env_or("DISBURSEMENT_MAX_RETRIES", 5),
            disbursement_retry_base_secs: env_or("DISBURSEMENT_RETRY_BASE_SECS", 60),
            disbursement_retry_max_secs: env_or("DISBURSEMENT_RETRY_MAX_SECS", 3600),
            disbursement_lease_secs: env_or("DISBURSEMENT_LEASE_SECS", 300),
            worker_interval_secs: env_or("WORKER_INTERVAL_SECS", 30),
            worker_batch_size: env_or("WORKER_BATCH_SIZE", 20),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.is_empty() {
            return Err("DATABASE_URL must be set".to_string());
        }

        if self.payment_callback_token == DEFAULT_CALLBACK_TOKEN {
            warn!("Using the default payment callback token is not secure for production!");
        }

        if self.jwt_expiry <= 0 {
            return Err("JWT_EXPIRY_HOURS must be positive".to_string());
        }

        if self.refresh_expiry <= 0 {
            return Err("REFRESH_EXPIRY_DAYS must be positive".to_string());
        }

        if self.platform_fee_percent < Decimal::ZERO || self.platform_fee_percent >= Decimal::ONE_HUNDRED {
            return Err("PLATFORM_FEE_PERCENT must be within 0..100".to_string());
        }

        if self.payment_expiry_minutes <= 0 {
            return Err("PAYMENT_EXPIRY_MINUTES must be positive".to_string());
        }

        if self.disbursement_max_retries <= 0 {
            return Err("DISBURSEMENT_MAX_RETRIES must be positive".to_string());
        }

        if self.disbursement_retry_base_secs <= 0 || self.disbursement_retry_max_secs < self.disbursement_retry_base_secs {
            return Err("DISBURSEMENT_RETRY_BASE_SECS must be positive and not exceed DISBURSEMENT_RETRY_MAX_SECS".to_string());
        }

        if self.disbursement_lease_secs <= 0 {
            return Err("DISBURSEMENT_LEASE_SECS must be positive".to_string());
        }

        if self.worker_interval_secs == 0 || self.worker_batch_size <= 0 {
            return Err("WORKER_INTERVAL_SECS and WORKER_BATCH_SIZE must be positive".to_string());
        }

        if self.db_pool_size == 0 {
            return Err("DB_POOL_SIZE must be positive".to_string());
        }

        Ok(())
    }

    pub fn generate_secure_secret() -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 8080,
        database_url: "postgres://localhost/roomrent_test".to_string(),
        db_pool_size: 2,
        jwt_secret: "test-secret-key-for-testing-only-32chars".to_string(),
        jwt_expiry: 24,
        refresh_expiry: 30,
        platform_fee_percent: Decimal::from(5),
        payment_expiry_minutes: 60,
        payment_callback_token: "callback-secret".to_string(),
        gateway_url: None,
        gateway_key: None,
        public_base_url: "http://localhost:8080".to_string(),
        disbursement_max_retries: 5,
        disbursement_retry_base_secs: 60,
        disbursement_retry_max_secs: 3600,
        disbursement_lease_secs: 300,
        worker_interval_secs: 30,
        worker_batch_size: 20,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn rejects_fee_outside_range() {
        let mut config = test_config();
        config.platform_fee_percent = Decimal::from(100);
        assert!(config.validate().is_err());
        config.platform_fee_percent = Decimal::from(-1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_backoff_base_above_cap() {
        let mut config = test_config();
        config.disbursement_retry_base_secs = 7200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_lease() {
        let mut config = test_config();
        config.disbursement_lease_secs = 0;
        assert_eq!(config.validate().unwrap_err(), "DISBURSEMENT_LEASE_SECS must be positive");
    }

    #[test]
    fn rejects_missing_database_url() {
        let mut config = test_config();
        config.database_url.clear();
        assert_eq!(config.validate().unwrap_err(), "DATABASE_URL must be set");
    }

    #[test]
    fn generated_secret_is_alphanumeric() {
        let secret = AppConfig::generate_secure_secret();
        assert_eq!(secret.len(), 32);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        std::env::set_var("ROOMRENT_TEST_GARBAGE_PORT", "not-a-number");
        assert_eq!(env_or("ROOMRENT_TEST_GARBAGE_PORT", 8080u16), 8080);
        std::env::set_var("ROOMRENT_TEST_GOOD_PORT", "9090");
        assert_eq!(env_or("ROOMRENT_TEST_GOOD_PORT", 8080u16), 9090);
    }
}
