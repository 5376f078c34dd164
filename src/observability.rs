use std::net::SocketAddr;

use crate::engine::StoreError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "roomkeep_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "roomkeep_http_request_duration_seconds";

/// Counter: storage calls made through the repository. Labels: op, status.
pub const STORE_CALLS_TOTAL: &str = "roomkeep_store_calls_total";

/// Histogram: storage call latency in seconds. Labels: op.
pub const STORE_CALL_DURATION_SECONDS: &str = "roomkeep_store_call_duration_seconds";

/// Counter: availability searches by outcome (offered, none, failed).
pub const SEARCHES_TOTAL: &str = "roomkeep_searches_total";

/// Counter: booking attempts by outcome (booked, unavailable, failed).
pub const BOOKINGS_TOTAL: &str = "roomkeep_bookings_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: live guest and staff sessions.
pub const SESSIONS_ACTIVE: &str = "roomkeep_sessions_active";

/// Counter: sessions dropped for inactivity.
pub const SESSIONS_EXPIRED_TOTAL: &str = "roomkeep_sessions_expired_total";

/// Counter: failed staff logins.
pub const AUTH_FAILURES_TOTAL: &str = "roomkeep_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomkeep_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomkeep_wal_compactions_total";

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

/// Short label for a storage result.
pub fn status_label<T>(result: &Result<T, StoreError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(StoreError::Timeout(_)) => "timeout",
        Err(e) if e.is_storage_failure() => "error",
        Err(_) => "rejected",
    }
}
