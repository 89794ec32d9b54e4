use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: requests executed. Labels: op, code.
pub const REQUESTS_TOTAL: &str = "slotd_requests_total";

/// Histogram: request processing latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "slotd_request_duration_seconds";

// ── Transport and simulator ─────────────────────────────────────

/// Counter: datagrams received on the server socket.
pub const DATAGRAMS_RECEIVED_TOTAL: &str = "slotd_datagrams_received_total";

/// Counter: inbound datagrams dropped by the fault injector.
pub const INBOUND_DROPPED_TOTAL: &str = "slotd_inbound_dropped_total";

/// Counter: outbound datagrams (replies and callbacks) dropped by the
/// fault injector.
pub const OUTBOUND_DROPPED_TOTAL: &str = "slotd_outbound_dropped_total";

/// Counter: undecodable frames answered with ERR_INVALID.
pub const DECODE_FAILURES_TOTAL: &str = "slotd_decode_failures_total";

// ── Invocation semantics ────────────────────────────────────────

/// Counter: duplicate requests served from the reply cache.
pub const DUPLICATES_SERVED_TOTAL: &str = "slotd_duplicates_served_total";

/// Gauge: live entries in the duplicate-reply cache.
pub const DUP_CACHE_ENTRIES: &str = "slotd_dup_cache_entries";

/// Counter: monitor callback datagrams sent.
pub const CALLBACKS_SENT_TOTAL: &str = "slotd_callbacks_sent_total";

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
