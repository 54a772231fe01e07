//! Prometheus metrics for perpdesk.
//!
//! Covers:
//! - Upstream link state and reconnects per connection role
//! - Heartbeat timeouts and dropped frames
//! - Browser sessions and slow-consumer evictions
//! - Refresh outcomes per panel
//!
//! # Panics
//!
//! Registration `unwrap()`s run once, at first use. A failure there
//! means a duplicate metric name, which is a startup bug.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge, register_int_gauge_vec, Encoder,
    IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};

/// Link states a role can be in.
pub const LINK_STATES: [&str; 5] = ["idle", "connecting", "open", "backoff", "gave_up"];

/// Current link state per role (1 = active state).
pub static WS_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "perpdesk_ws_state",
        "Upstream link state per role (1=active, 0=inactive)",
        &["role", "state"]
    )
    .unwrap()
});

pub static WS_RECONNECT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "perpdesk_ws_reconnect_total",
        "Scheduled reconnection attempts",
        &["role"]
    )
    .unwrap()
});

pub static WS_GAVE_UP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "perpdesk_ws_gave_up_total",
        "Times a link exhausted its retries",
        &["role"]
    )
    .unwrap()
});

pub static WS_LINK_LOST_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "perpdesk_ws_link_lost_total",
        "Failed connects and lost connections",
        &["role", "reason"]
    )
    .unwrap()
});

pub static HEARTBEAT_TIMEOUT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "perpdesk_heartbeat_timeout_total",
        "Connections closed after missed pongs",
        &["role"]
    )
    .unwrap()
});

pub static FRAMES_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "perpdesk_frames_dropped_total",
        "Malformed inbound frames dropped",
        &["role"]
    )
    .unwrap()
});

pub static BROADCAST_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "perpdesk_broadcast_sessions",
        "Browser sessions currently registered"
    )
    .unwrap()
});

pub static BROADCAST_EVICTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "perpdesk_broadcast_evictions_total",
        "Sessions removed during fan-out",
        &["reason"]
    )
    .unwrap()
});

pub static REFRESH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "perpdesk_refresh_total",
        "Mirror refreshes by panel and outcome",
        &["panel", "outcome"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Mark `state` as the role's only active state.
    pub fn ws_state_set(role: &str, state: &str) {
        for s in LINK_STATES {
            WS_STATE.with_label_values(&[role, s]).set(0);
        }
        WS_STATE.with_label_values(&[role, state]).set(1);
    }

    pub fn ws_reconnect(role: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[role]).inc();
    }

    pub fn ws_gave_up(role: &str) {
        WS_GAVE_UP_TOTAL.with_label_values(&[role]).inc();
    }

    pub fn ws_link_lost(role: &str, reason: &str) {
        WS_LINK_LOST_TOTAL.with_label_values(&[role, reason]).inc();
    }

    pub fn heartbeat_timeout(role: &str) {
        HEARTBEAT_TIMEOUT_TOTAL.with_label_values(&[role]).inc();
    }

    pub fn frame_dropped(role: &str) {
        FRAMES_DROPPED_TOTAL.with_label_values(&[role]).inc();
    }

    pub fn session_opened() {
        BROADCAST_SESSIONS.inc();
    }

    pub fn session_closed() {
        BROADCAST_SESSIONS.dec();
    }

    /// `reason` is `slow_consumer` or `closed`.
    pub fn session_evicted(reason: &str) {
        BROADCAST_EVICTIONS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn refresh(panel: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        REFRESH_TOTAL.with_label_values(&[panel, outcome]).inc();
    }

    /// Render the default registry in the text exposition format.
    pub fn render() -> TelemetryResult<String> {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
