//! Alert and log record models shared by the hub, the alert source and the query API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity assigned by the detection pipeline.
///
/// The pipeline's level set is open: values this build does not recognise
/// are carried verbatim in `Other` and written back out unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
    Other(String),
}

impl Severity {
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
            Severity::Other(raw) => raw,
        }
    }
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        match value.as_str() {
            "info" => Severity::Info,
            "warning" => Severity::Warning,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Other(value),
        }
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected security event as produced by the detection pipeline.
///
/// Records are never mutated after construction; the hub shares them
/// behind an `Arc` while fanning out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub rule_name: String,
    pub source_ip: String,
    #[serde(default)]
    pub anomaly_score: f64,
    #[serde(default)]
    pub raw_log: String,
}

#[cfg(test)]
impl AlertRecord {
    pub fn new(severity: Severity, rule_name: String, source_ip: String) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            rule_name,
            source_ip,
            anomaly_score: 0.0,
            raw_log: String::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_score(mut self, anomaly_score: f64) -> Self {
        self.anomaly_score = anomaly_score;
        self
    }

    pub fn with_raw_log(mut self, raw_log: String) -> Self {
        self.raw_log = raw_log;
        self
    }
}

/// A single row of the `logs` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub country: String,
    pub service: String,
    pub message: String,
    pub anomaly_score: f32,
    pub is_threat: bool,
}

/// Filters for the investigator search page
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// e.g. 0.8 for threats only
    pub min_score: Option<f32>,
    pub service: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SearchQuery {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Aggregates for the dashboard charts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub total_logs: i64,
    pub threat_count: i64,
    pub eps: f64,
}
