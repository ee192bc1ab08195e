//! Prometheus metrics for the signal engine (C13). All gauges/counters
//! use the `engine_` prefix and are read-only from outside this module.

use prometheus::{
    core::{AtomicF64, GenericGauge},
    CounterVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub queue_pending: GenericGauge<AtomicF64>,
    pub queue_processing: GenericGauge<AtomicF64>,
    pub queue_failed: GenericGauge<AtomicF64>,
    pub signals_total: CounterVec,
    pub orders_total: CounterVec,
    pub scan_duration_seconds: HistogramVec,
    pub active_stops: GenericGauge<AtomicF64>,
    pub broker_call_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let queue_pending = prometheus::Gauge::with_opts(Opts::new("engine_queue_pending", "Signals waiting to be consumed"))?;
        registry.register(Box::new(queue_pending.clone()))?;

        let queue_processing = prometheus::Gauge::with_opts(Opts::new("engine_queue_processing", "Signals claimed by a worker"))?;
        registry.register(Box::new(queue_processing.clone()))?;

        let queue_failed = prometheus::Gauge::with_opts(Opts::new("engine_queue_failed", "Signals that exhausted retries"))?;
        registry.register(Box::new(queue_failed.clone()))?;

        let signals_total = CounterVec::new(
            Opts::new("engine_signals_total", "Total signals published by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(signals_total.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("engine_orders_total", "Total orders submitted by side and outcome"),
            &["side", "outcome"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let scan_duration_seconds = HistogramVec::new(
            HistogramOpts::new("engine_scan_duration_seconds", "Generator scan iteration duration")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["market"],
        )?;
        registry.register(Box::new(scan_duration_seconds.clone()))?;

        let active_stops = prometheus::Gauge::with_opts(Opts::new("engine_active_stops", "Currently active stop contracts"))?;
        registry.register(Box::new(active_stops.clone()))?;

        let broker_call_seconds = Histogram::with_opts(
            HistogramOpts::new("engine_broker_call_seconds", "Broker adapter call latency")
                .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;
        registry.register(Box::new(broker_call_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            queue_pending,
            queue_processing,
            queue_failed,
            signals_total,
            orders_total,
            scan_duration_seconds,
            active_stops,
            broker_call_seconds,
        })
    }

    pub fn latency_guard(&self) -> crate::infrastructure::observability::LatencyGuard {
        crate::infrastructure::observability::LatencyGuard::new(self.broker_call_seconds.clone())
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn set_queue_stats(&self, stats: &crate::domain::types::QueueStats) {
        self.queue_pending.set(stats.pending as f64);
        self.queue_processing.set(stats.processing as f64);
        self.queue_failed.set(stats.failed as f64);
    }

    pub fn inc_signal(&self, kind: &str) {
        self.signals_total.with_label_values(&[kind]).inc();
    }

    pub fn inc_order(&self, side: &str, outcome: &str) {
        self.orders_total.with_label_values(&[side, outcome]).inc();
    }

    pub fn observe_scan_duration(&self, market: &str, seconds: f64) {
        self.scan_duration_seconds.with_label_values(&[market]).observe(seconds);
    }

    pub fn set_active_stops(&self, count: usize) {
        self.active_stops.set(count as f64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to create default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::QueueStats;

    #[test]
    fn metrics_render_includes_engine_prefix() {
        let metrics = Metrics::new().expect("metrics");
        assert!(metrics.render().contains("engine_"));
    }

    #[test]
    fn queue_stats_update_gauges() {
        let metrics = Metrics::new().expect("metrics");
        metrics.set_queue_stats(&QueueStats { pending: 3, processing: 1, failed: 0, succeeded: 10 });
        let output = metrics.render();
        assert!(output.contains("engine_queue_pending 3"));
    }

    #[test]
    fn signal_and_order_counters_increment() {
        let metrics = Metrics::new().expect("metrics");
        metrics.inc_signal("BUY");
        metrics.inc_order("BUY", "filled");
        let output = metrics.render();
        assert!(output.contains("engine_signals_total"));
        assert!(output.contains("engine_orders_total"));
    }
}
