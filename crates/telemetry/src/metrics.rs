//! In-process metrics.
//!
//! Lock-free counters, gauges and a fixed-bucket histogram, exposed through
//! a process-wide registry. Snapshots are served on `/health` and logged
//! periodically with [`log_snapshot`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements, saturating at zero.
    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / count as f64
        }
    }
}

/// Collected metrics for the gateway.
#[derive(Debug, Default)]
pub struct Metrics {
    // Session lifecycle
    pub sessions_opened: Counter,
    pub sessions_closed: Counter,
    pub sessions_expired: Counter,
    pub sessions_exited: Counter,
    pub launch_failures: Counter,
    pub persistence_failures: Counter,

    // Terminal I/O
    pub stdin_bytes: Counter,
    pub pty_output_bytes: Counter,

    // Admission
    pub rate_limited_requests: Counter,
    pub gate_connections: Counter,
    pub gate_rejections: Counter,

    pub launch_latency_ms: Histogram,

    pub active_sessions: Gauge,
    pub active_gate_connections: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_expired: u64,
    pub sessions_exited: u64,
    pub launch_failures: u64,
    pub persistence_failures: u64,
    pub stdin_bytes: u64,
    pub pty_output_bytes: u64,
    pub rate_limited_requests: u64,
    pub gate_connections: u64,
    pub gate_rejections: u64,
    pub launch_latency_mean_ms: f64,
    pub active_sessions: u64,
    pub active_gate_connections: u64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            sessions_opened: self.sessions_opened.get(),
            sessions_closed: self.sessions_closed.get(),
            sessions_expired: self.sessions_expired.get(),
            sessions_exited: self.sessions_exited.get(),
            launch_failures: self.launch_failures.get(),
            persistence_failures: self.persistence_failures.get(),
            stdin_bytes: self.stdin_bytes.get(),
            pty_output_bytes: self.pty_output_bytes.get(),
            rate_limited_requests: self.rate_limited_requests.get(),
            gate_connections: self.gate_connections.get(),
            gate_rejections: self.gate_rejections.get(),
            launch_latency_mean_ms: self.launch_latency_ms.mean(),
            active_sessions: self.active_sessions.get(),
            active_gate_connections: self.active_gate_connections.get(),
        }
    }
}

/// Log a snapshot as one structured line. Failures since `previous` raise
/// the level to warn.
pub fn log_snapshot(snapshot: &MetricsSnapshot, previous: Option<&MetricsSnapshot>) {
    let new_failures = previous.map_or(0, |prev| {
        (snapshot.launch_failures + snapshot.persistence_failures)
            .saturating_sub(prev.launch_failures + prev.persistence_failures)
    });

    if new_failures > 0 {
        warn!(
            new_failures,
            launch_failures = snapshot.launch_failures,
            persistence_failures = snapshot.persistence_failures,
            active_sessions = snapshot.active_sessions,
            "Session failures since last report"
        );
    }
    info!(
        sessions_opened = snapshot.sessions_opened,
        sessions_closed = snapshot.sessions_closed,
        sessions_expired = snapshot.sessions_expired,
        sessions_exited = snapshot.sessions_exited,
        active_sessions = snapshot.active_sessions,
        active_gate_connections = snapshot.active_gate_connections,
        gate_rejections = snapshot.gate_rejections,
        rate_limited = snapshot.rate_limited_requests,
        stdin_bytes = snapshot.stdin_bytes,
        pty_output_bytes = snapshot.pty_output_bytes,
        launch_latency_mean_ms = snapshot.launch_latency_mean_ms,
        "Metrics snapshot"
    );
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
