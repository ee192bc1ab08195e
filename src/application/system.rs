//! Bootstrap/DI wiring (C14). Grounded in the teacher's `Application::build`
//! split: one function assembles every port adapter behind its trait
//! object, a second spawns the long-running tasks the CLI asked for.

use crate::application::executor::OrderExecutor;
use crate::application::generator::SignalGenerator;
use crate::config::AppConfig;
use crate::domain::ports::{BrokerClient, Notifier, OrderStore, QuoteSource, SignalQueue, StopStore};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::{Database, SqliteOrderStore, SqliteQueue, SqliteStopStore};
use crate::infrastructure::{MockBroker, MockQuoteSource, WebhookNotifier};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Every port adapter this deployment wires up, assembled once and
/// shared across the generator, executor workers, and reporter.
pub struct Application {
    pub quotes: Arc<dyn QuoteSource>,
    pub broker: Arc<dyn BrokerClient>,
    pub stops: Arc<dyn StopStore>,
    pub order_store: Arc<dyn OrderStore>,
    pub queue: Arc<dyn SignalQueue>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Arc<Metrics>,
    pub config: AppConfig,
}

impl Application {
    pub async fn build(config: AppConfig, watchlist: Vec<String>) -> Result<Self> {
        let db = Database::new(&config.db_path).await?;
        let stops: Arc<dyn StopStore> = Arc::new(SqliteStopStore::new(db.pool.clone()));
        let order_store: Arc<dyn OrderStore> = Arc::new(SqliteOrderStore::new(db.pool.clone()));
        let queue: Arc<dyn SignalQueue> = Arc::new(SqliteQueue::new(
            db.pool.clone(),
            Duration::from_secs(config.visibility_timeout_secs),
        ));
        let quotes: Arc<dyn QuoteSource> = Arc::new(MockQuoteSource::new(&watchlist));
        let broker: Arc<dyn BrokerClient> = Arc::new(MockBroker::new());
        let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::spawn(config.notification_url.clone()));
        let metrics = Arc::new(Metrics::new()?);

        info!(db_path = %config.db_path, watchlist_size = watchlist.len(), "application assembled");
        Ok(Self { quotes, broker, stops, order_store, queue, notifier, metrics, config })
    }

    /// Spawns the generator, `worker_count` executor workers, and the
    /// metrics reporter according to `role`, returning their handles so
    /// the caller can await graceful shutdown.
    pub fn start(&self, role: Role, watchlist: Vec<String>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if role.runs_generator() {
            let generator = Arc::new(SignalGenerator {
                quotes: self.quotes.clone(),
                broker: self.broker.clone(),
                stops: self.stops.clone(),
                order_store: self.order_store.clone(),
                queue: self.queue.clone(),
                notifier: self.notifier.clone(),
                watchlist,
                config: self.config.clone(),
            });
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { generator.run(cancel).await }));
        }

        if role.runs_executor() {
            for worker_id in 0..self.config.worker_count.max(1) {
                let executor = Arc::new(OrderExecutor {
                    quotes: self.quotes.clone(),
                    broker: self.broker.clone(),
                    stops: self.stops.clone(),
                    order_store: self.order_store.clone(),
                    queue: self.queue.clone(),
                    notifier: self.notifier.clone(),
                    metrics: self.metrics.clone(),
                    config: self.config.clone(),
                    worker_id,
                });
                let cancel = cancel.clone();
                handles.push(tokio::spawn(async move { executor.run(cancel).await }));
            }
        }

        if self.config.metrics_enabled {
            let reporter = crate::infrastructure::observability::MetricsReporter::new(
                self.queue.clone(),
                self.stops.clone(),
                (*self.metrics).clone(),
                self.config.metrics_interval_secs,
            );
            handles.push(tokio::spawn(async move { reporter.run().await }));
        }

        handles
    }
}

/// Which long-running tasks a process instance should host (§4.14).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Generator,
    Executor,
    Both,
}

impl Role {
    pub fn runs_generator(&self) -> bool {
        matches!(self, Role::Generator | Role::Both)
    }

    pub fn runs_executor(&self) -> bool {
        matches!(self, Role::Executor | Role::Both)
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generator" => Ok(Role::Generator),
            "executor" => Ok(Role::Executor),
            "both" => Ok(Role::Both),
            other => Err(anyhow::anyhow!("unknown role '{other}', expected generator|executor|both")),
        }
    }
}
