//! SQL schema definitions.

/// Complete schema for cwatch v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Observations: one row per identifier ever heard
-- ============================================================

CREATE TABLE IF NOT EXISTS observations (
    tcn BLOB PRIMARY KEY,
    last_seen INTEGER NOT NULL,
    closest_distance REAL NOT NULL,
    was_potentially_infectious INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_observations_infectious
    ON observations(was_potentially_infectious, last_seen);

-- ============================================================
-- Recorded contacts
-- ============================================================

CREATE TABLE IF NOT EXISTS contact_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tcn BLOB NOT NULL,
    average_distance REAL NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contact_events_tcn ON contact_events(tcn);
CREATE INDEX IF NOT EXISTS idx_contact_events_end ON contact_events(end_time);

-- ============================================================
-- Disclosure reports, local and received
-- ============================================================

CREATE TABLE IF NOT EXISTS signed_reports (
    signature BLOB PRIMARY KEY,
    rvk BLOB NOT NULL,
    tck BLOB NOT NULL,
    start_index INTEGER NOT NULL,
    end_index INTEGER NOT NULL,
    memo_type INTEGER NOT NULL,
    memo_data BLOB NOT NULL,
    is_local INTEGER NOT NULL,
    upload_state INTEGER NOT NULL DEFAULT 0,
    is_processed INTEGER NOT NULL DEFAULT 0,
    stored_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signed_reports_upload
    ON signed_reports(is_local, upload_state);

-- ============================================================
-- Key/value settings
-- ============================================================

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
