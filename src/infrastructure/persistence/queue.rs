//! C7: the durable priority queue. Claims are atomic single-statement
//! `UPDATE ... WHERE id = (SELECT ...)` so concurrent executor workers
//! never double-claim a row; `consume` polls on a short interval up to
//! the caller's wait budget rather than blocking on a notification
//! channel, matching sqlite's poll-friendly concurrency model.

use crate::domain::errors::QueueError;
use crate::domain::ports::SignalQueue;
use crate::domain::types::{QueueStats, Signal};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct SqliteQueue {
    pool: SqlitePool,
    visibility_timeout: Duration,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool, visibility_timeout: Duration) -> Self {
        Self { pool, visibility_timeout }
    }

    async fn try_claim(&self) -> Result<Option<Signal>, QueueError> {
        let claim_token = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let visible_until = now + self.visibility_timeout.as_secs() as i64;

        let result = sqlx::query(
            r#"
            UPDATE queue SET status = ?1, visible_until = ?2, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM queue WHERE status = 'pending'
                ORDER BY priority ASC, enqueued_at ASC LIMIT 1
            )
            "#,
        )
        .bind(&claim_token)
        .bind(visible_until)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Io(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT payload_json FROM queue WHERE status = ?1")
            .bind(&claim_token)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| QueueError::Io(e.to_string()))?;
        // Mark it "processing" now that we've read it back, so a crash
        // between claim and read doesn't strand it under a random token.
        sqlx::query("UPDATE queue SET status = 'processing' WHERE status = ?1")
            .bind(&claim_token)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Io(e.to_string()))?;

        let payload: String = row.try_get("payload_json").map_err(|e| QueueError::Io(e.to_string()))?;
        let signal: Signal = serde_json::from_str(&payload).map_err(|e| QueueError::Io(e.to_string()))?;
        Ok(Some(signal))
    }

    /// Admin-only (C14 `queue retry-failed`): moves every `failed` row
    /// back to `pending` so the next `consume` picks it up again.
    pub async fn retry_failed(&self) -> Result<usize, QueueError> {
        let result = sqlx::query("UPDATE queue SET status = 'pending', attempts = 0 WHERE status = 'failed'")
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Io(e.to_string()))?;
        Ok(result.rows_affected() as usize)
    }

    /// Admin-only (C14 `queue clear <status>`): deletes every row in the
    /// given status bucket. `status` must be one of pending/processing/failed.
    pub async fn clear(&self, status: &str) -> Result<usize, QueueError> {
        let result = sqlx::query("DELETE FROM queue WHERE status = ?1")
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Io(e.to_string()))?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl SignalQueue for SqliteQueue {
    async fn publish(&self, signal: Signal) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&signal).map_err(|e| QueueError::Io(e.to_string()))?;
        let kind_group = if signal.kind.is_buy() { "BUY" } else { "SELL" };
        sqlx::query(
            r#"
            INSERT INTO queue (id, symbol, kind, kind_group, priority, payload_json, status, attempts, enqueued_at, visible_until)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, NULL)
            "#,
        )
        .bind(&signal.id)
        .bind(&signal.symbol)
        .bind(signal.kind.to_string())
        .bind(kind_group)
        .bind(signal.priority())
        .bind(payload)
        .bind(signal.generated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Io(e.to_string()))?;
        Ok(())
    }

    async fn consume(&self, timeout: Duration) -> Result<Option<Signal>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(signal) = self.try_claim().await? {
                return Ok(Some(signal));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn ack(&self, signal_id: &str) -> Result<(), QueueError> {
        let result = sqlx::query("UPDATE queue SET status = 'succeeded' WHERE id = ?1 AND status = 'processing'")
            .bind(signal_id)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Io(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(signal_id.to_string()));
        }
        Ok(())
    }

    async fn fail(&self, signal_id: &str, retryable: bool) -> Result<(), QueueError> {
        let next_status = if retryable { "pending" } else { "failed" };
        let result = sqlx::query("UPDATE queue SET status = ?1, visible_until = NULL WHERE id = ?2 AND status = 'processing'")
            .bind(next_status)
            .bind(signal_id)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Io(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(signal_id.to_string()));
        }
        Ok(())
    }

    async fn has_pending(&self, symbol: &str, kind_label: &str) -> Result<bool, QueueError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM queue WHERE symbol = ?1 AND kind_group = ?2 AND status IN ('pending', 'processing')",
        )
        .bind(symbol)
        .bind(kind_label)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Io(e.to_string()))?;
        let n: i64 = row.try_get("n").map_err(|e| QueueError::Io(e.to_string()))?;
        Ok(n > 0)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) as pending,
                SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END) as processing,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) as failed,
                SUM(CASE WHEN status = 'succeeded' THEN 1 ELSE 0 END) as succeeded
            FROM queue
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::Io(e.to_string()))?;

        Ok(QueueStats {
            pending: row.try_get::<Option<i64>, _>("pending").map_err(|e| QueueError::Io(e.to_string()))?.unwrap_or(0),
            processing: row.try_get::<Option<i64>, _>("processing").map_err(|e| QueueError::Io(e.to_string()))?.unwrap_or(0),
            failed: row.try_get::<Option<i64>, _>("failed").map_err(|e| QueueError::Io(e.to_string()))?.unwrap_or(0),
            succeeded: row.try_get::<Option<i64>, _>("succeeded").map_err(|e| QueueError::Io(e.to_string()))?.unwrap_or(0),
        })
    }

    async fn reclaim_expired(&self, visibility_timeout: Duration) -> Result<usize, QueueError> {
        let _ = visibility_timeout;
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE queue SET status = 'pending', visible_until = NULL WHERE status = 'processing' AND visible_until IS NOT NULL AND visible_until < ?1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Io(e.to_string()))?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Indicators, SignalKind};
    use crate::infrastructure::persistence::database::Database;

    async fn queue() -> SqliteQueue {
        let db = Database::new("sqlite::memory:").await.unwrap();
        SqliteQueue::new(db.pool, Duration::from_secs(300))
    }

    fn signal(id: &str, symbol: &str, kind: SignalKind, score: f64) -> Signal {
        Signal {
            id: id.to_string(),
            symbol: symbol.to_string(),
            kind,
            score,
            reference_price: 100.0,
            indicators: Indicators::default(),
            stop_loss: 94.0,
            take_profit: 115.0,
            generated_at: chrono::Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn higher_score_buy_dispatches_before_lower_score() {
        let q = queue().await;
        q.publish(signal("s1", "A.US", SignalKind::Buy, 50.0)).await.unwrap();
        q.publish(signal("s2", "B.US", SignalKind::StrongBuy, 80.0)).await.unwrap();

        let first = q.consume(Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(first.symbol, "B.US");
    }

    #[tokio::test]
    async fn sell_stop_loss_dispatches_before_any_buy() {
        let q = queue().await;
        q.publish(signal("s1", "A.US", SignalKind::StrongBuy, 90.0)).await.unwrap();
        q.publish(signal("s2", "B.HK", SignalKind::SellStopLoss, 0.0)).await.unwrap();

        let first = q.consume(Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(first.symbol, "B.HK");
    }

    #[tokio::test]
    async fn ack_marks_succeeded_and_has_pending_clears() {
        let q = queue().await;
        q.publish(signal("s1", "A.US", SignalKind::Buy, 50.0)).await.unwrap();
        assert!(q.has_pending("A.US", "BUY").await.unwrap());

        let claimed = q.consume(Duration::from_millis(500)).await.unwrap().unwrap();
        q.ack(&claimed.id).await.unwrap();
        assert!(!q.has_pending("A.US", "BUY").await.unwrap());
    }

    #[tokio::test]
    async fn fail_retryable_returns_to_pending_non_retryable_fails() {
        let q = queue().await;
        q.publish(signal("s1", "A.US", SignalKind::Buy, 50.0)).await.unwrap();
        let claimed = q.consume(Duration::from_millis(500)).await.unwrap().unwrap();
        q.fail(&claimed.id, true).await.unwrap();
        assert!(q.has_pending("A.US", "BUY").await.unwrap());

        let claimed = q.consume(Duration::from_millis(500)).await.unwrap().unwrap();
        q.fail(&claimed.id, false).await.unwrap();
        let stats = q.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn reclaim_expired_requeues_stuck_processing_rows() {
        let q = SqliteQueue::new(Database::new("sqlite::memory:").await.unwrap().pool, Duration::from_secs(0));
        q.publish(signal("s1", "A.US", SignalKind::Buy, 50.0)).await.unwrap();
        q.consume(Duration::from_millis(500)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let reclaimed = q.reclaim_expired(Duration::from_secs(0)).await.unwrap();
        assert_eq!(reclaimed, 1);
    }
}
