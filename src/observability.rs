use std::net::SocketAddr;

use crate::protocol::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests executed. Labels: command, status.
pub const REQUESTS_TOTAL: &str = "bookcal_requests_total";

/// Histogram: request latency in seconds. Labels: command.
pub const REQUEST_DURATION_SECONDS: &str = "bookcal_request_duration_seconds";

/// Histogram: time spent in one calendar pass.
pub const CALENDAR_BUILD_DURATION_SECONDS: &str = "bookcal_calendar_build_duration_seconds";

/// Counter: records/spans left out of a calendar. Labels: reason.
pub const RECORDS_SKIPPED_TOTAL: &str = "bookcal_records_skipped_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bookcal_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bookcal_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bookcal_connections_rejected_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Ping => "ping",
        Command::Merge { .. } => "merge",
        Command::Expand { .. } => "expand",
        Command::Calendar(_) => "calendar",
    }
}
