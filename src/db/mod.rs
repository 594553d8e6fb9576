//! Alert store and read-only query service

mod schema;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite, SqlitePool};
use tracing::warn;

use crate::alert::{AlertRecord, LogEntry, SearchQuery, Severity, Stats};
use crate::config::DatabaseConfig;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Narrow read interface over the time-ordered alert/log store
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Most recent alerts first
    async fn fetch_recent(&self, limit: i64) -> Result<Vec<AlertRecord>, StoreError>;

    /// Filtered log search, most recent first
    async fn search(&self, query: &SearchQuery) -> Result<Vec<LogEntry>, StoreError>;

    async fn stats(&self) -> Result<Stats, StoreError>;
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.url)).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        // WAL lets the ingest writer and our readers proceed concurrently
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        for statement in [
            schema::CREATE_ALERTS_TABLE,
            schema::CREATE_LOGS_TABLE,
            schema::CREATE_INDEX_ALERTS_TS,
            schema::CREATE_INDEX_LOGS_TS_SERVICE,
            schema::CREATE_INDEX_LOGS_THREAT,
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Rows whose timestamp chrono cannot represent are skipped rather than
/// shown with a made-up time.
fn from_millis(table: &str, ts: i64) -> Option<DateTime<Utc>> {
    let timestamp = DateTime::from_timestamp_millis(ts);
    if timestamp.is_none() {
        warn!(table, timestamp = ts, "Row with out-of-range timestamp skipped");
    }
    timestamp
}

#[async_trait]
impl QueryService for Database {
    async fn fetch_recent(&self, limit: i64) -> Result<Vec<AlertRecord>, StoreError> {
        let rows: Vec<(i64, String, String, String, f64, String)> = sqlx::query_as(
            r#"
            SELECT timestamp, severity, rule_name, source_ip, anomaly_score, raw_log
            FROM alerts
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(ts, severity, rule_name, source_ip, anomaly_score, raw_log)| {
                Some(AlertRecord {
                    timestamp: from_millis("alerts", ts)?,
                    severity: Severity::from(severity),
                    rule_name,
                    source_ip,
                    anomaly_score,
                    raw_log,
                })
            })
            .collect())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<LogEntry>, StoreError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, timestamp, host, country, service, message, anomaly_score, is_threat FROM logs WHERE 1 = 1",
        );
        if let Some(start) = query.start_time {
            builder.push(" AND timestamp >= ").push_bind(start.timestamp_millis());
        }
        if let Some(end) = query.end_time {
            builder.push(" AND timestamp <= ").push_bind(end.timestamp_millis());
        }
        if let Some(min_score) = query.min_score {
            builder.push(" AND anomaly_score >= ").push_bind(min_score as f64);
        }
        if let Some(service) = query.service.as_deref().filter(|s| !s.is_empty()) {
            builder.push(" AND service = ").push_bind(service.to_string());
        }
        builder
            .push(" ORDER BY timestamp DESC LIMIT ")
            .push_bind(query.effective_limit())
            .push(" OFFSET ")
            .push_bind(query.effective_offset());

        let rows: Vec<(String, i64, String, String, String, String, f64, i64)> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, ts, host, country, service, message, anomaly_score, is_threat)| {
                Some(LogEntry {
                    id,
                    timestamp: from_millis("logs", ts)?,
                    host,
                    country,
                    service,
                    message,
                    anomaly_score: anomaly_score as f32,
                    is_threat: is_threat != 0,
                })
            })
            .collect())
    }

    async fn stats(&self) -> Result<Stats, StoreError> {
        let window_start = Utc::now().timestamp_millis() - 60_000;
        let (total_logs, threat_count, last_minute): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN is_threat = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN timestamp > ? THEN 1 ELSE 0 END), 0)
            FROM logs
            "#,
        )
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;

        Ok(Stats {
            total_logs,
            threat_count,
            eps: last_minute as f64 / 60.0,
        })
    }
}

#[cfg(test)]
impl Database {
    pub async fn in_memory() -> Self {
        // One connection, otherwise every pooled connection opens its own empty database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = Self { pool };
        db.run_migrations().await.unwrap();
        db
    }

    pub async fn insert_alert(&self, alert: &AlertRecord) {
        sqlx::query(
            "INSERT INTO alerts (timestamp, severity, rule_name, source_ip, anomaly_score, raw_log) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(alert.timestamp.timestamp_millis())
        .bind(alert.severity.as_str())
        .bind(&alert.rule_name)
        .bind(&alert.source_ip)
        .bind(alert.anomaly_score)
        .bind(&alert.raw_log)
        .execute(&self.pool)
        .await
        .unwrap();
    }

    pub async fn insert_log(&self, entry: &LogEntry) {
        sqlx::query(
            "INSERT INTO logs (id, timestamp, host, country, service, message, anomaly_score, is_threat) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(entry.timestamp.timestamp_millis())
        .bind(&entry.host)
        .bind(&entry.country)
        .bind(&entry.service)
        .bind(&entry.message)
        .bind(entry.anomaly_score as f64)
        .bind(entry.is_threat as i64)
        .execute(&self.pool)
        .await
        .unwrap();
    }
}
