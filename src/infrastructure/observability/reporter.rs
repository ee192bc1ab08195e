//! Push-based metrics reporter. Periodically outputs engine state as
//! structured JSON to stdout under a `METRICS_JSON:` prefix so it can be
//! filtered out of regular logs by a downstream collector.

use crate::domain::ports::{SignalQueue, StopStore};
use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub queue: QueueSnapshot,
    pub active_stops: usize,
}

#[derive(Serialize)]
pub struct QueueSnapshot {
    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
    pub succeeded: i64,
}

pub struct MetricsReporter {
    queue: Arc<dyn SignalQueue>,
    stops: Arc<dyn StopStore>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(queue: Arc<dyn SignalQueue>, stops: Arc<dyn StopStore>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self { queue, stops, metrics, start_time: Instant::now(), interval: Duration::from_secs(interval_seconds) }
    }

    pub async fn run(self) {
        info!(interval = ?self.interval, "metrics reporter starting");
        loop {
            tokio::time::sleep(self.interval).await;
            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{json}");
                        info!(pending = snapshot.queue.pending, failed = snapshot.queue.failed, active_stops = snapshot.active_stops, "engine snapshot");
                    }
                    Err(e) => warn!(error = %e, "failed to serialize metrics"),
                },
                Err(e) => warn!(error = %e, "failed to collect metrics"),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let stats = self.queue.stats().await?;
        let active_stops = self.stops.load_all_active().await?.len();
        self.metrics.set_queue_stats(&stats);
        self.metrics.set_active_stops(active_stops);

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            queue: QueueSnapshot { pending: stats.pending, processing: stats.processing, failed: stats.failed, succeeded: stats.succeeded },
            active_stops,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::{Database, SqliteQueue, SqliteStopStore};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn collect_snapshot_reads_empty_stores() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let queue = Arc::new(SqliteQueue::new(db.pool.clone(), StdDuration::from_secs(300)));
        let stops = Arc::new(SqliteStopStore::new(db.pool));
        let metrics = Metrics::new().unwrap();
        let reporter = MetricsReporter::new(queue, stops, metrics, 60);

        let snapshot = reporter.collect_snapshot().await.unwrap();
        assert_eq!(snapshot.queue.pending, 0);
        assert_eq!(snapshot.active_stops, 0);
    }
}
