//! Process-wide counters exposed on the admin surface's `/metrics` endpoint.
//!
//! Counters use relaxed ordering: they are approximate gauges read
//! periodically, so strict ordering isn't needed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;

pub struct Metrics {
    pub active_sandboxes: AtomicU64,
    pub peak_sandboxes: AtomicU64,
    pub total_submitted: AtomicU64,
    pub total_stopped: AtomicU64,
    pub reaped_idle: AtomicU64,
    pub garbage_collected: AtomicU64,
    pub proxy_requests: AtomicU64,
    pub proxy_errors: AtomicU64,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            active_sandboxes: AtomicU64::new(0),
            peak_sandboxes: AtomicU64::new(0),
            total_submitted: AtomicU64::new(0),
            total_stopped: AtomicU64::new(0),
            reaped_idle: AtomicU64::new(0),
            garbage_collected: AtomicU64::new(0),
            proxy_requests: AtomicU64::new(0),
            proxy_errors: AtomicU64::new(0),
        }
    }

    pub fn record_sandbox_created(&self) {
        self.total_submitted.fetch_add(1, Ordering::Relaxed);
        let current = self.active_sandboxes.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_sandboxes.fetch_max(current, Ordering::Relaxed);
    }

    pub fn record_sandbox_deleted(&self) {
        self.total_stopped.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .active_sandboxes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn record_reaped_idle(&self) {
        self.reaped_idle.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_garbage_collected(&self) {
        self.garbage_collected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_proxy_request(&self) {
        self.proxy_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_proxy_error(&self) {
        self.proxy_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Render counters as Prometheus text-exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let mut push = |name: &str, value: u64| {
            out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
        };
        push("sandbox_active", self.active_sandboxes.load(Ordering::Relaxed));
        push("sandbox_peak", self.peak_sandboxes.load(Ordering::Relaxed));
        push("sandbox_submitted_total", self.total_submitted.load(Ordering::Relaxed));
        push("sandbox_stopped_total", self.total_stopped.load(Ordering::Relaxed));
        push("sandbox_reaped_idle_total", self.reaped_idle.load(Ordering::Relaxed));
        push("sandbox_garbage_collected_total", self.garbage_collected.load(Ordering::Relaxed));
        push("proxy_requests_total", self.proxy_requests.load(Ordering::Relaxed));
        push("proxy_errors_total", self.proxy_errors.load(Ordering::Relaxed));
        out.push_str(&format!("# TYPE process_uptime_seconds gauge\nprocess_uptime_seconds {}\n", uptime_secs()));
        out
    }
}

static METRICS: Metrics = Metrics::new();
static START: Lazy<Instant> = Lazy::new(Instant::now);

pub fn metrics() -> &'static Metrics {
    &METRICS
}

pub fn uptime_secs() -> u64 {
    START.elapsed().as_secs()
}
