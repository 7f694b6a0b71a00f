use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking store operations. Labels: op, status.
pub const STORE_OPERATIONS_TOTAL: &str = "schedulr_store_operations_total";

/// Histogram: booking store operation latency in seconds. Labels: op.
pub const STORE_OPERATION_DURATION_SECONDS: &str = "schedulr_store_operation_duration_seconds";

/// Counter: facade requests rejected by validation. Labels: op.
pub const REQUESTS_INVALID_TOTAL: &str = "schedulr_requests_invalid_total";

// ── Notification hub ────────────────────────────────────────────

/// Gauge: open subscriptions.
pub const HUB_SUBSCRIBERS: &str = "schedulr_hub_subscribers";

/// Counter: upstream change notifications fanned out.
pub const HUB_NOTIFICATIONS_TOTAL: &str = "schedulr_hub_notifications_total";

/// Counter: signals merged into one already pending for a subscriber.
pub const HUB_SIGNALS_COALESCED_TOTAL: &str = "schedulr_hub_signals_coalesced_total";

/// Counter: subscriptions closed because their receiver was dropped.
pub const HUB_SUBSCRIPTIONS_PRUNED_TOTAL: &str = "schedulr_hub_subscriptions_pruned_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL append + fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "schedulr_wal_flush_duration_seconds";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "schedulr_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
