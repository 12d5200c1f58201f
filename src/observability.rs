use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings committed as CONFIRMED.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "slotwise_bookings_confirmed_total";

/// Counter: bookings committed as provisional PENDING holds.
pub const BOOKINGS_PENDING_TOTAL: &str = "slotwise_bookings_pending_total";

/// Counter: booking attempts rejected with a conflict.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotwise_booking_conflicts_total";

/// Counter: bookings canceled (staff action, compensation, or sweep).
pub const BOOKINGS_CANCELED_TOTAL: &str = "slotwise_bookings_canceled_total";

/// Histogram: end-to-end create-booking latency in seconds.
pub const CREATE_BOOKING_DURATION_SECONDS: &str = "slotwise_create_booking_duration_seconds";

// ── USE metrics (engine internals) ──────────────────────────────

/// Counter: serializable transactions retried after a conflict.
pub const TX_RETRIES_TOTAL: &str = "slotwise_tx_retries_total";

/// Counter: stale provisional holds canceled by the sweep.
pub const HOLDS_EXPIRED_TOTAL: &str = "slotwise_holds_expired_total";

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

/// Install the default fmt tracing subscriber for the embedding process.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}

/// Map an engine error to a short label for metrics.
pub fn error_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::SalonNotFound(_)
        | EngineError::StaffNotFound(_)
        | EngineError::ServiceNotFound(_)
        | EngineError::ClientNotFound(_)
        | EngineError::BookingNotFound(_) => "not_found",
        EngineError::StaffInactive(_)
        | EngineError::ServiceInactive(_)
        | EngineError::StaffNotInSalon { .. }
        | EngineError::NoStaffAvailable(_)
        | EngineError::InvalidTimeRange { .. }
        | EngineError::EmptyServiceList => "validation",
        EngineError::AlreadyBooked { .. } => "already_booked",
        EngineError::StaffConflict { .. } | EngineError::ClientConflict { .. } => "conflict",
        EngineError::InvalidTransition { .. } => "invalid_transition",
        EngineError::SerializationConflict => "serialization",
        EngineError::NotificationFailed(_) => "notification",
    }
}
