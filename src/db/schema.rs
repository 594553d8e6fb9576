//! Database schema definitions
//!
//! The ingest pipeline writes both tables; this service only reads them.
//! Timestamps are unix milliseconds.

pub const CREATE_ALERTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    timestamp BIGINT NOT NULL,
    severity TEXT NOT NULL,
    rule_name TEXT NOT NULL,
    source_ip TEXT NOT NULL,
    anomaly_score REAL NOT NULL DEFAULT 0,
    raw_log TEXT NOT NULL DEFAULT ''
)
"#;

pub const CREATE_LOGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id TEXT PRIMARY KEY,
    timestamp BIGINT NOT NULL,
    host TEXT NOT NULL,
    country TEXT NOT NULL DEFAULT '',
    service TEXT NOT NULL,
    message TEXT NOT NULL,
    anomaly_score REAL NOT NULL DEFAULT 0,
    is_threat INTEGER NOT NULL DEFAULT 0
)
"#;

// Recent alerts page (ORDER BY timestamp DESC)
pub const CREATE_INDEX_ALERTS_TS: &str =
    "CREATE INDEX IF NOT EXISTS idx_alerts_ts ON alerts(timestamp DESC)";

// Investigator search: time range plus service filter
pub const CREATE_INDEX_LOGS_TS_SERVICE: &str =
    "CREATE INDEX IF NOT EXISTS idx_logs_ts_service ON logs(timestamp, service)";

// Threat counters
pub const CREATE_INDEX_LOGS_THREAT: &str =
    "CREATE INDEX IF NOT EXISTS idx_logs_threat ON logs(is_threat) WHERE is_threat = 1";
