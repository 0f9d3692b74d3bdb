//! Prometheus instrumentation.
//!
//! A self-contained registry exposed in text format at `GET /metrics`.
//! Counters cover command outcomes per tool, a histogram tracks command
//! latency, and gauges track live sessions and stored events.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::error;

pub struct GatewayMetrics {
    registry: Registry,
    commands_total: IntCounterVec,
    command_duration_seconds: HistogramVec,
    sessions_active: IntGauge,
    events_stored_total: IntCounter,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let commands_total = IntCounterVec::new(
            Opts::new("kubegate_commands_total", "Tool commands by tool and status"),
            &["tool", "status"],
        )
        .expect("static metric definition");

        let command_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "kubegate_command_duration_seconds",
                "Tool command wall-clock duration",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["tool"],
        )
        .expect("static metric definition");

        let sessions_active = IntGauge::new(
            "kubegate_sessions_active",
            "Currently tracked MCP sessions",
        )
        .expect("static metric definition");

        let events_stored_total = IntCounter::new(
            "kubegate_events_stored_total",
            "Protocol events appended to the event store",
        )
        .expect("static metric definition");

        for collector in [
            Box::new(commands_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(command_duration_seconds.clone()),
            Box::new(sessions_active.clone()),
            Box::new(events_stored_total.clone()),
        ] {
            if let Err(e) = registry.register(collector) {
                error!(error = %e, "failed to register metric");
            }
        }

        Self {
            registry,
            commands_total,
            command_duration_seconds,
            sessions_active,
            events_stored_total,
        }
    }

    pub fn observe_command(&self, tool: &str, status: &str, elapsed: Duration) {
        self.commands_total.with_label_values(&[tool, status]).inc();
        self.command_duration_seconds
            .with_label_values(&[tool])
            .observe(elapsed.as_secs_f64());
    }

    pub fn session_opened(&self) {
        self.sessions_active.inc();
    }

    pub fn session_closed(&self) {
        self.sessions_active.dec();
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.sessions_active.set(count as i64);
    }

    pub fn event_stored(&self) {
        self.events_stored_total.inc();
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
