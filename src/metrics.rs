//! Prometheus metrics for the ingest pipeline and epoch state.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total notifications received on the ingest endpoint.
    pub static ref NOTICES_RECEIVED: IntCounter = IntCounter::new(
        "rtc_notifications_received_total",
        "Notifications received"
    ).unwrap();

    /// Notifications accepted and fully committed.
    pub static ref NOTICES_ACCEPTED: IntCounter = IntCounter::new(
        "rtc_notifications_accepted_total",
        "Notifications accepted"
    ).unwrap();

    /// Notifications dropped as duplicates of a known notice_id.
    pub static ref NOTICES_DUPLICATE: IntCounter = IntCounter::new(
        "rtc_notifications_duplicate_total",
        "Duplicate notifications dropped"
    ).unwrap();

    /// Ingest failures, labeled by error code.
    pub static ref INGEST_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("rtc_ingest_errors_total", "Ingest failures by error code"),
        &["code"]
    ).unwrap();

    /// Presence sessions opened by join events.
    pub static ref SESSIONS_OPENED: IntCounter = IntCounter::new(
        "rtc_sessions_opened_total",
        "Presence sessions opened"
    ).unwrap();

    /// Presence sessions closed by leave events.
    pub static ref SESSIONS_CLOSED: IntCounter = IntCounter::new(
        "rtc_sessions_closed_total",
        "Presence sessions closed"
    ).unwrap();

    /// Closed sessions synthesized from a leave-with-duration.
    pub static ref SESSIONS_SYNTHESIZED: IntCounter = IntCounter::new(
        "rtc_sessions_synthesized_total",
        "Sessions synthesized from orphan leaves"
    ).unwrap();

    /// Role-change events recorded.
    pub static ref ROLE_EVENTS: IntCounter = IntCounter::new(
        "rtc_role_events_total",
        "Role change events recorded"
    ).unwrap();

    /// Provisional epochs allocated for orphan user events.
    pub static ref PROVISIONAL_EPOCHS: IntCounter = IntCounter::new(
        "rtc_provisional_epochs_total",
        "Provisional epochs allocated"
    ).unwrap();

    /// Session and role-event rows relabelled from provisional epochs.
    pub static ref PROVISIONAL_ROWS_MERGED: IntCounter = IntCounter::new(
        "rtc_provisional_rows_merged_total",
        "Rows relabelled by provisional merge"
    ).unwrap();

    /// Channel epochs currently active.
    pub static ref ACTIVE_EPOCHS: IntGauge = IntGauge::new(
        "rtc_active_epochs",
        "Currently active channel epochs"
    ).unwrap();
}

/// Register all metrics with the global registry.
///
/// Must be called once at startup before any metrics are recorded.
pub fn init() {
    REGISTRY.register(Box::new(NOTICES_RECEIVED.clone())).unwrap();
    REGISTRY.register(Box::new(NOTICES_ACCEPTED.clone())).unwrap();
    REGISTRY.register(Box::new(NOTICES_DUPLICATE.clone())).unwrap();
    REGISTRY.register(Box::new(INGEST_ERRORS.clone())).unwrap();
    REGISTRY.register(Box::new(SESSIONS_OPENED.clone())).unwrap();
    REGISTRY.register(Box::new(SESSIONS_CLOSED.clone())).unwrap();
    REGISTRY
        .register(Box::new(SESSIONS_SYNTHESIZED.clone()))
        .unwrap();
    REGISTRY.register(Box::new(ROLE_EVENTS.clone())).unwrap();
    REGISTRY.register(Box::new(PROVISIONAL_EPOCHS.clone())).unwrap();
    REGISTRY
        .register(Box::new(PROVISIONAL_ROWS_MERGED.clone()))
        .unwrap();
    REGISTRY.register(Box::new(ACTIVE_EPOCHS.clone())).unwrap();
}

/// Record an ingest failure by error code.
pub fn record_ingest_error(code: &str) {
    INGEST_ERRORS.with_label_values(&[code]).inc();
}

/// Encode all registered metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
