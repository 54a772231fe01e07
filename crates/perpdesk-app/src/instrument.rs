//! Frame handler wrapper that feeds link metrics.

use perpdesk_telemetry::Metrics;
use perpdesk_ws::{ConnectionRole, Disposition, FrameHandler, SupervisorState, WsError};

pub struct Instrumented<H> {
    inner: H,
}

impl<H: FrameHandler> Instrumented<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

fn loss_reason(error: &WsError) -> &'static str {
    match error {
        WsError::ConnectionFailed(_) => "connect_failed",
        WsError::ConnectionClosed { .. } => "closed",
        WsError::HeartbeatTimeout { .. } => "heartbeat_timeout",
        WsError::ReconnectRequested(_) => "reconnect_requested",
        _ => "error",
    }
}

impl<H: FrameHandler> FrameHandler for Instrumented<H> {
    fn on_frame(&self, role: ConnectionRole, frame: &str) -> Disposition {
        let disposition = self.inner.on_frame(role, frame);
        if disposition == Disposition::Dropped {
            Metrics::frame_dropped(role.as_str());
        }
        disposition
    }

    fn on_state(&self, role: ConnectionRole, state: &SupervisorState) {
        Metrics::ws_state_set(role.as_str(), state.as_str());
        match state {
            SupervisorState::Backoff { .. } => Metrics::ws_reconnect(role.as_str()),
            SupervisorState::GaveUp { .. } => Metrics::ws_gave_up(role.as_str()),
            _ => {}
        }
        self.inner.on_state(role, state);
    }

    fn on_link_lost(&self, role: ConnectionRole, reason: &WsError) {
        if let WsError::HeartbeatTimeout { .. } = reason {
            Metrics::heartbeat_timeout(role.as_str());
        }
        Metrics::ws_link_lost(role.as_str(), loss_reason(reason));
        self.inner.on_link_lost(role, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Seen {
        states: Mutex<Vec<SupervisorState>>,
    }

    impl FrameHandler for Seen {
        fn on_frame(&self, _role: ConnectionRole, frame: &str) -> Disposition {
            if frame.starts_with('{') {
                Disposition::Handled
            } else {
                Disposition::Dropped
            }
        }

        fn on_state(&self, _role: ConnectionRole, state: &SupervisorState) {
            self.states.lock().push(state.clone());
        }
    }

    #[test]
    fn test_passes_through_and_counts() {
        let handler = Instrumented::new(Seen::default());
        let role = ConnectionRole::MarketFeed;

        assert_eq!(handler.on_frame(role, "{}"), Disposition::Handled);
        assert_eq!(handler.on_frame(role, "garbage"), Disposition::Dropped);

        handler.on_state(role, &SupervisorState::GaveUp { attempts: 5 });
        assert_eq!(
            *handler.inner().states.lock(),
            vec![SupervisorState::GaveUp { attempts: 5 }]
        );

        let rendered = Metrics::render().unwrap();
        assert!(rendered.contains("perpdesk_frames_dropped_total"));
        assert!(rendered.contains("perpdesk_ws_gave_up_total"));
    }

    #[test]
    fn test_loss_reasons() {
        assert_eq!(
            loss_reason(&WsError::HeartbeatTimeout { missed: 2 }),
            "heartbeat_timeout"
        );
        assert_eq!(
            loss_reason(&WsError::ConnectionFailed("refused".to_string())),
            "connect_failed"
        );
    }
}
