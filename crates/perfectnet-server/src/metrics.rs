//! Prometheus metrics for the coordinator daemon.

use std::sync::OnceLock;

use perfectnet_types::Stats;
use perfectnet_wire::ErrorCode;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tracing::warn;

/// Process-wide metric handles.
pub struct Metrics {
    registry: Registry,
    pub requests: IntCounterVec,
    pub errors: IntCounterVec,
    pub assignments: IntCounter,
    pub progress_reports: IntCounter,
    pub verdicts: IntCounterVec,
    pub connections: IntGauge,
    queue_depth: IntGauge,
    active_leases: IntGauge,
    discoveries: IntGauge,
    expired_leases: IntGauge,
    degraded: IntGauge,
}

static METRICS: OnceLock<Option<Metrics>> = OnceLock::new();

impl Metrics {
    /// The shared instance, or `None` if registration failed at startup.
    pub fn global() -> Option<&'static Metrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    warn!(error = %e, "metrics registration failed; metrics disabled");
                    None
                }
            })
            .as_ref()
    }

    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("perfectnet".into()), None)?;

        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Requests handled, by operation"),
            &["op"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("errors_total", "Error responses, by code"),
            &["code"],
        )?;
        let assignments = IntCounter::new("assignments_total", "Leases granted")?;
        let progress_reports = IntCounter::new("progress_reports_total", "Heartbeats accepted")?;
        let verdicts = IntCounterVec::new(
            Opts::new("verdicts_total", "Accepted verdicts, by outcome"),
            &["outcome"],
        )?;
        let expired_leases =
            IntGauge::new("leases_expired", "Leases reclaimed by sweeps since start")?;
        let connections = IntGauge::new("connections", "Open protocol connections")?;
        let queue_depth = IntGauge::new("queue_depth", "Queued candidates")?;
        let active_leases = IntGauge::new("active_leases", "Leases currently held")?;
        let discoveries = IntGauge::new("discoveries", "Perfect numbers found")?;
        let degraded = IntGauge::new("degraded", "1 once a store write has failed")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(assignments.clone()))?;
        registry.register(Box::new(progress_reports.clone()))?;
        registry.register(Box::new(verdicts.clone()))?;
        registry.register(Box::new(expired_leases.clone()))?;
        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(active_leases.clone()))?;
        registry.register(Box::new(discoveries.clone()))?;
        registry.register(Box::new(degraded.clone()))?;

        Ok(Self {
            registry,
            requests,
            errors,
            assignments,
            progress_reports,
            verdicts,
            connections,
            queue_depth,
            active_leases,
            discoveries,
            expired_leases,
            degraded,
        })
    }

    /// Copies coordinator gauges from a fresh [`Stats`].
    pub fn observe(&self, stats: &Stats) {
        self.queue_depth.set(stats.queued as i64);
        self.active_leases.set(stats.active_leases as i64);
        self.discoveries.set(stats.discoveries as i64);
        self.expired_leases.set(stats.expired_total as i64);
        self.degraded.set(i64::from(stats.degraded));
    }

    /// Prometheus text exposition of every metric.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            warn!(error = %e, "metrics encoding failed");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

pub fn record_request(op: &'static str) {
    if let Some(m) = Metrics::global() {
        m.requests.with_label_values(&[op]).inc();
    }
}

pub fn record_error(code: ErrorCode) {
    if let Some(m) = Metrics::global() {
        m.errors.with_label_values(&[code.as_str()]).inc();
    }
}

pub fn record_assignment() {
    if let Some(m) = Metrics::global() {
        m.assignments.inc();
    }
}

pub fn record_progress() {
    if let Some(m) = Metrics::global() {
        m.progress_reports.inc();
    }
}

pub fn record_verdict(witness: bool) {
    if let Some(m) = Metrics::global() {
        let outcome = if witness { "witness" } else { "composite" };
        m.verdicts.with_label_values(&[outcome]).inc();
    }
}

pub fn set_connections(count: usize) {
    if let Some(m) = Metrics::global() {
        m.connections.set(count as i64);
    }
}
