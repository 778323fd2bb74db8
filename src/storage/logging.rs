//! Request logging data types and database operations.

use sqlx::SqlitePool;

/// A completed request log entry ready for database insertion.
///
/// All fields are owned types to satisfy `tokio::spawn` `'static` requirement.
pub struct RequestLog {
    pub request_id: String,
    pub timestamp: String,
    pub caller_id: Option<String>,
    pub session_id: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub cached: bool,
    pub latency_ms: i64,
    pub success: bool,
    pub error_kind: Option<String>,
}

impl RequestLog {
    /// Insert this log entry into the database.
    pub async fn insert(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO requests (
                request_id, timestamp, caller_id, session_id,
                provider, model, cached, latency_ms, success, error_kind
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.request_id)
        .bind(&self.timestamp)
        .bind(self.caller_id.as_deref())
        .bind(self.session_id.as_deref())
        .bind(self.provider.as_deref())
        .bind(self.model.as_deref())
        .bind(self.cached)
        .bind(self.latency_ms)
        .bind(self.success)
        .bind(self.error_kind.as_deref())
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Spawn a fire-and-forget database write.
///
/// If the write fails, a warning is logged but the error is not propagated.
pub fn spawn_log_write(pool: &SqlitePool, log: RequestLog) {
    let pool = pool.clone();
    tokio::spawn(async move {
        if let Err(e) = log.insert(&pool).await {
            tracing::warn!(
                request_id = %log.request_id,
                error = %e,
                "Failed to write request log to database"
            );
        }
    });
}
