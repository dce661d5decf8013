use std::net::SocketAddr;

// ── Reservation store ───────────────────────────────────────────

/// Counter: booking requests. Labels: outcome (created, denied, rolled_back, invalid).
pub const BOOKINGS_TOTAL: &str = "gymbook_bookings_total";

/// Counter: admission denials. Labels: reason.
pub const BOOKING_DENIALS_TOTAL: &str = "gymbook_booking_denials_total";

/// Counter: cancellations. Labels: status.
pub const CANCELLATIONS_TOTAL: &str = "gymbook_cancellations_total";

/// Counter: remote change events handled. Labels: table, op, outcome.
pub const REMOTE_EVENTS_TOTAL: &str = "gymbook_remote_events_total";

/// Counter: full resyncs triggered by a lagging subscription.
pub const RESYNCS_TOTAL: &str = "gymbook_resyncs_total";

/// Gauge: bookings currently waiting on their durable write.
pub const PENDING_BOOKINGS: &str = "gymbook_pending_bookings";

// ── Durable gateway ─────────────────────────────────────────────

/// Counter: gateway writes. Labels: table, op, status.
pub const GATEWAY_WRITES_TOTAL: &str = "gymbook_gateway_writes_total";

/// Histogram: gateway write latency in seconds (includes fsync). Labels: table.
pub const GATEWAY_WRITE_DURATION_SECONDS: &str = "gymbook_gateway_write_duration_seconds";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "gymbook_wal_compactions_total";

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
