use actix_web::web;
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager};
use diesel::Connection;
use log::{error, info};

use crate::config::{AppConfig, DbPool};
use crate::errors::ApiError;

// Database initialization SQL
pub const DB_INIT_SQL: &str = r#"
-- Create tables if they don't exist
CREATE TABLE IF NOT EXISTS users (
    user_id SERIAL PRIMARY KEY,
    name VARCHAR(120) NOT NULL,
    email VARCHAR(255) UNIQUE NOT NULL,
    password_hash VARCHAR(255) NOT NULL,
    phone_number VARCHAR(50),
    role VARCHAR(20) NOT NULL DEFAULT 'renter',
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    profile_image VARCHAR(500),
    last_login TIMESTAMP,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_users_role CHECK (role IN ('admin', 'owner', 'renter'))
);

CREATE TABLE IF NOT EXISTS refresh_token (
    token_id SERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL,
    token VARCHAR(255) NOT NULL UNIQUE,
    expires_at TIMESTAMP NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS rooms (
    room_id SERIAL PRIMARY KEY,
    owner_id INTEGER NOT NULL,
    title VARCHAR(200) NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    address VARCHAR(500) NOT NULL,
    city VARCHAR(120) NOT NULL,
    price_per_month NUMERIC(12, 2) NOT NULL,
    size_sqm INTEGER,
    capacity INTEGER NOT NULL DEFAULT 1,
    is_available BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_rooms_price CHECK (price_per_month > 0),
    CONSTRAINT chk_rooms_capacity CHECK (capacity > 0)
);

CREATE TABLE IF NOT EXISTS room_images (
    image_id SERIAL PRIMARY KEY,
    room_id INTEGER NOT NULL,
    image_url VARCHAR(500) NOT NULL,
    is_primary BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS facilities (
    facility_id SERIAL PRIMARY KEY,
    name VARCHAR(100) UNIQUE NOT NULL,
    icon VARCHAR(100)
);

CREATE TABLE IF NOT EXISTS room_facilities (
    room_id INTEGER NOT NULL,
    facility_id INTEGER NOT NULL,
    PRIMARY KEY (room_id, facility_id)
);

CREATE TABLE IF NOT EXISTS bookmarks (
    bookmark_id SERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL,
    room_id INTEGER NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    CONSTRAINT uq_bookmarks_user_room UNIQUE (user_id, room_id)
);

CREATE TABLE IF NOT EXISTS survey_appointments (
    appointment_id SERIAL PRIMARY KEY,
    room_id INTEGER NOT NULL,
    renter_id INTEGER NOT NULL,
    scheduled_at TIMESTAMP NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'scheduled',
    notes TEXT,
    cancel_reason TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_appointment_status CHECK (status IN ('scheduled', 'completed', 'cancelled', 'no_show'))
);

CREATE TABLE IF NOT EXISTS payout_methods (
    payout_method_id SERIAL PRIMARY KEY,
    owner_id INTEGER NOT NULL,
    method_type VARCHAR(20) NOT NULL,
    provider_code VARCHAR(50) NOT NULL,
    account_number VARCHAR(50) NOT NULL,
    account_holder VARCHAR(120) NOT NULL,
    is_default BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_payout_method_type CHECK (method_type IN ('bank_transfer', 'e_wallet'))
);

CREATE TABLE IF NOT EXISTS payments (
    payment_id SERIAL PRIMARY KEY,
    room_id INTEGER NOT NULL,
    renter_id INTEGER NOT NULL,
    owner_id INTEGER NOT NULL,
    months INTEGER NOT NULL,
    amount NUMERIC(14, 2) NOT NULL,
    platform_fee NUMERIC(14, 2) NOT NULL,
    owner_amount NUMERIC(14, 2) NOT NULL,
    payment_status VARCHAR(20) NOT NULL DEFAULT 'pending',
    transfer_status VARCHAR(20) NOT NULL DEFAULT 'not_started',
    gateway_reference VARCHAR(255) UNIQUE,
    checkout_url VARCHAR(500),
    expires_at TIMESTAMP NOT NULL,
    paid_at TIMESTAMP,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_payment_split CHECK (amount = platform_fee + owner_amount),
    CONSTRAINT chk_payment_months CHECK (months BETWEEN 1 AND 12),
    CONSTRAINT chk_payment_status CHECK (payment_status IN ('pending', 'paid', 'failed', 'expired')),
    CONSTRAINT chk_transfer_status CHECK (transfer_status IN ('not_started', 'pending', 'processing', 'completed', 'failed'))
);

CREATE TABLE IF NOT EXISTS disbursements (
    disbursement_id SERIAL PRIMARY KEY,
    payment_id INTEGER NOT NULL UNIQUE,
    owner_id INTEGER NOT NULL,
    payout_method_id INTEGER,
    amount NUMERIC(14, 2) NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    next_attempt_at TIMESTAMP NOT NULL DEFAULT NOW(),
    gateway_reference VARCHAR(255),
    completed_at TIMESTAMP,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_disbursement_status CHECK (status IN ('pending', 'processing', 'completed', 'failed'))
);

CREATE TABLE IF NOT EXISTS reviews (
    review_id SERIAL PRIMARY KEY,
    payment_id INTEGER NOT NULL UNIQUE,
    room_id INTEGER NOT NULL,
    renter_id INTEGER NOT NULL,
    rating DOUBLE PRECISION NOT NULL,
    comment TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_review_rating CHECK (rating >= 1.0 AND rating <= 5.0)
);

CREATE TABLE IF NOT EXISTS reports (
    report_id SERIAL PRIMARY KEY,
    reporter_id INTEGER NOT NULL,
    room_id INTEGER NOT NULL,
    report_type VARCHAR(30) NOT NULL,
    description TEXT NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'pending',
    owner_response TEXT,
    responded_at TIMESTAMP,
    admin_note TEXT,
    resolved_at TIMESTAMP,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_report_type CHECK (report_type IN ('fraud', 'inaccurate_listing', 'inappropriate_content', 'safety', 'other')),
    CONSTRAINT chk_report_status CHECK (status IN ('pending', 'in_review', 'resolved', 'rejected'))
);

CREATE TABLE IF NOT EXISTS messages (
    message_id SERIAL PRIMARY KEY,
    sender_id INTEGER NOT NULL,
    receiver_id INTEGER NOT NULL,
    room_id INTEGER,
    body TEXT NOT NULL,
    is_read BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_rooms_city ON rooms (city);
CREATE INDEX IF NOT EXISTS idx_appointments_room ON survey_appointments (room_id, status);
CREATE UNIQUE INDEX IF NOT EXISTS uq_appointments_open
    ON survey_appointments (renter_id, room_id) WHERE status = 'scheduled';
CREATE UNIQUE INDEX IF NOT EXISTS uq_payout_methods_default
    ON payout_methods (owner_id) WHERE is_default;
CREATE UNIQUE INDEX IF NOT EXISTS uq_room_images_primary
    ON room_images (room_id) WHERE is_primary;
CREATE INDEX IF NOT EXISTS idx_disbursements_due ON disbursements (status, next_attempt_at);
CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages (sender_id, receiver_id, message_id);

-- Add foreign keys if not exist
DO $$
BEGIN
    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_refresh_token_user') THEN
        ALTER TABLE refresh_token ADD CONSTRAINT fk_refresh_token_user
        FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_rooms_owner') THEN
        ALTER TABLE rooms ADD CONSTRAINT fk_rooms_owner
        FOREIGN KEY (owner_id) REFERENCES users(user_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_room_images_room') THEN
        ALTER TABLE room_images ADD CONSTRAINT fk_room_images_room
        FOREIGN KEY (room_id) REFERENCES rooms(room_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_room_facilities_room') THEN
        ALTER TABLE room_facilities ADD CONSTRAINT fk_room_facilities_room
        FOREIGN KEY (room_id) REFERENCES rooms(room_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_room_facilities_facility') THEN
        ALTER TABLE room_facilities ADD CONSTRAINT fk_room_facilities_facility
        FOREIGN KEY (facility_id) REFERENCES facilities(facility_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_bookmarks_user') THEN
        ALTER TABLE bookmarks ADD CONSTRAINT fk_bookmarks_user
        FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_bookmarks_room') THEN
        ALTER TABLE bookmarks ADD CONSTRAINT fk_bookmarks_room
        FOREIGN KEY (room_id) REFERENCES rooms(room_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_appointments_room') THEN
        ALTER TABLE survey_appointments ADD CONSTRAINT fk_appointments_room
        FOREIGN KEY (room_id) REFERENCES rooms(room_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_appointments_renter') THEN
        ALTER TABLE survey_appointments ADD CONSTRAINT fk_appointments_renter
        FOREIGN KEY (renter_id) REFERENCES users(user_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_payout_methods_owner') THEN
        ALTER TABLE payout_methods ADD CONSTRAINT fk_payout_methods_owner
        FOREIGN KEY (owner_id) REFERENCES users(user_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_payments_room') THEN
        ALTER TABLE payments ADD CONSTRAINT fk_payments_room
        FOREIGN KEY (room_id) REFERENCES rooms(room_id) ON DELETE RESTRICT;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_payments_renter') THEN
        ALTER TABLE payments ADD CONSTRAINT fk_payments_renter
        FOREIGN KEY (renter_id) REFERENCES users(user_id) ON DELETE RESTRICT;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_payments_owner') THEN
        ALTER TABLE payments ADD CONSTRAINT fk_payments_owner
        FOREIGN KEY (owner_id) REFERENCES users(user_id) ON DELETE RESTRICT;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_disbursements_payment') THEN
        ALTER TABLE disbursements ADD CONSTRAINT fk_disbursements_payment
        FOREIGN KEY (payment_id) REFERENCES payments(payment_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_disbursements_payout_method') THEN
        ALTER TABLE disbursements ADD CONSTRAINT fk_disbursements_payout_method
        FOREIGN KEY (payout_method_id) REFERENCES payout_methods(payout_method_id) ON DELETE SET NULL;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_reviews_payment') THEN
        ALTER TABLE reviews ADD CONSTRAINT fk_reviews_payment
        FOREIGN KEY (payment_id) REFERENCES payments(payment_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_reviews_room') THEN
        ALTER TABLE reviews ADD CONSTRAINT fk_reviews_room
        FOREIGN KEY (room_id) REFERENCES rooms(room_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_reports_reporter') THEN
        ALTER TABLE reports ADD CONSTRAINT fk_reports_reporter
        FOREIGN KEY (reporter_id) REFERENCES users(user_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_reports_room') THEN
        ALTER TABLE reports ADD CONSTRAINT fk_reports_room
        FOREIGN KEY (room_id) REFERENCES rooms(room_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_messages_sender') THEN
        ALTER TABLE messages ADD CONSTRAINT fk_messages_sender
        FOREIGN KEY (sender_id) REFERENCES users(user_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_messages_receiver') THEN
        ALTER TABLE messages ADD CONSTRAINT fk_messages_receiver
        FOREIGN KEY (receiver_id) REFERENCES users(user_id) ON DELETE CASCADE;
    END IF;

    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = 'fk_messages_room') THEN
        ALTER TABLE messages ADD CONSTRAINT fk_messages_room
        FOREIGN KEY (room_id) REFERENCES rooms(room_id) ON DELETE SET NULL;
    END IF;
END $$;

-- Insert default facilities if not exist
INSERT INTO facilities (name, icon)
VALUES
    ('WiFi', 'wifi'),
    ('Air Conditioning', 'snowflake'),
    ('Private Bathroom', 'bath'),
    ('Parking', 'car'),
    ('Kitchen', 'utensils'),
    ('Laundry', 'shirt'),
    ('Furnished', 'bed'),
    ('CCTV', 'camera')
ON CONFLICT (name) DO NOTHING;
"#;

/// Creates missing tables and constraints. Safe to run on every start.
pub fn init_schema(database_url: &str) -> Result<(), ApiError> {
    let mut conn = PgConnection::establish(database_url)
        .map_err(|e| ApiError::DatabaseError(format!("Failed to establish connection for migrations: {}", e)))?;
    conn.batch_execute(DB_INIT_SQL)?;
    info!("Database initialization complete.");
    Ok(())
}

pub fn build_pool(config: &AppConfig) -> Result<DbPool, ApiError> {
    let manager = ConnectionManager::<PgConnection>::new(config.database_url.clone());
    r2d2::Pool::builder()
        .max_size(config.db_pool_size)
        .build(manager)
        .map_err(|e| ApiError::DatabaseError(format!("Failed to create database connection pool: {}", e)))
}

/// Runs a blocking diesel closure on the actix blocking thread pool with a pooled connection.
pub async fn run<F, T>(pool: &DbPool, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let conn = pool.get().map_err(|e| {
        error!("Failed to get database connection: {}", e);
        ApiError::from(e)
    })?;

    web::block(move || {
        let mut conn = conn;
        f(&mut conn)
    })
    .await
    .map_err(|e| {
        error!("Database operation error: {}", e);
        ApiError::from(e)
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_flag_rules_are_backed_by_partial_indexes() {
        assert!(DB_INIT_SQL.contains("uq_payout_methods_default\n    ON payout_methods (owner_id) WHERE is_default;"));
        assert!(DB_INIT_SQL.contains("uq_room_images_primary\n    ON room_images (room_id) WHERE is_primary;"));
        assert!(DB_INIT_SQL.contains("ON survey_appointments (renter_id, room_id) WHERE status = 'scheduled';"));
    }
}
