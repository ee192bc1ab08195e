//! Webhook notifier (C10). Grounded in the teacher's `reqwest::Client`
//! usage (`sentiment::alternative_me`), reworked into a bounded
//! fire-and-forget queue: a background task drains it so `notify()` never
//! blocks the caller on network latency, and failures are logged at most
//! once a minute rather than spamming on every drop.

use crate::domain::ports::Notifier;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, Sender};
use tracing::{info, warn};

const QUEUE_CAPACITY: usize = 256;
const ERROR_LOG_INTERVAL_SECS: i64 = 60;

pub struct WebhookNotifier {
    tx: Sender<String>,
}

impl WebhookNotifier {
    pub fn spawn(url: Option<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        tokio::spawn(async move {
            let Some(url) = url else {
                // No webhook configured: drain quietly so the channel never
                // fills and blocks a producer.
                while rx.recv().await.is_some() {}
                return;
            };
            let last_error_logged = AtomicI64::new(0);

            while let Some(message) = rx.recv().await {
                let body = serde_json::json!({ "text": message });
                match client.post(&url).json(&body).send().await {
                    Ok(resp) if resp.status().is_success() => {}
                    Ok(resp) => rate_limited_warn(&last_error_logged, &format!("webhook returned {}", resp.status())),
                    Err(e) => rate_limited_warn(&last_error_logged, &e.to_string()),
                }
            }
        });

        info!("webhook notifier started");
        Self { tx }
    }
}

fn rate_limited_warn(last_logged: &AtomicI64, message: &str) {
    let now = chrono::Utc::now().timestamp();
    let last = last_logged.load(Ordering::Relaxed);
    if now - last >= ERROR_LOG_INTERVAL_SECS {
        last_logged.store(now, Ordering::Relaxed);
        warn!(error = %message, "webhook delivery failed");
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: String) {
        // Drop-oldest overflow policy (§6): a full queue means the
        // consumer is behind, not that this notification matters more
        // than making progress. try_send never blocks the caller.
        if self.tx.try_send(message).is_err() {
            warn!("notification queue full; dropping message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_does_not_block_without_webhook_configured() {
        let notifier = WebhookNotifier::spawn(None);
        for i in 0..10 {
            notifier.notify(format!("signal {i}")).await;
        }
    }
}
