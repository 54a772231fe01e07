//! Message routing: decoded events to handler methods.
//!
//! The router sits between a supervised connection and the state layer.
//! Malformed frames are logged and dropped without touching any state;
//! the connection stays up.

use crate::decoder::{Decoded, FrameDecoder};
use crate::event::{
    AccountUpdate, InboundEvent, OrderUpdate, PriceTick, StreamError, StreamErrorKind,
};
use perpdesk_core::{DepthUpdate, Kline};
use perpdesk_ws::{ConnectionNotice, ConnectionRole, Disposition, FrameHandler, SupervisorState};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Longest frame prefix quoted in a drop warning.
const MAX_LOGGED_FRAME: usize = 256;

/// One method per inbound event kind.
pub trait EventHandler: Send + Sync {
    fn on_price_tick(&self, role: ConnectionRole, tick: PriceTick);

    fn on_kline(&self, role: ConnectionRole, kline: Kline);

    fn on_depth(&self, role: ConnectionRole, depth: DepthUpdate);

    fn on_account_update(&self, role: ConnectionRole, update: AccountUpdate);

    fn on_order_update(&self, role: ConnectionRole, update: OrderUpdate);

    fn on_stream_error(&self, role: ConnectionRole, error: StreamError);

    fn on_connection_status(&self, role: ConnectionRole, notice: ConnectionNotice);

    /// Supervisor state changes of the connection this handler serves.
    fn on_link_state(&self, _role: ConnectionRole, _state: &SupervisorState) {}

    fn on_unknown(&self, role: ConnectionRole, kind: &str) {
        debug!(%role, kind, "No handler for message kind, dropping");
    }
}

/// Router counters.
#[derive(Debug, Default)]
pub struct RouterStats {
    dispatched: AtomicU64,
    dropped: AtomicU64,
    unknown: AtomicU64,
}

impl RouterStats {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn unknown(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }
}

pub struct MessageRouter<D, H> {
    decoder: D,
    handler: H,
    stats: RouterStats,
}

impl<D: FrameDecoder, H: EventHandler> MessageRouter<D, H> {
    pub fn new(decoder: D, handler: H) -> Self {
        Self {
            decoder,
            handler,
            stats: RouterStats::default(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Decode one frame and hand every resulting event to its handler.
    pub fn dispatch(&self, role: ConnectionRole, frame: &str) -> Disposition {
        let events = match self.decoder.decode(frame) {
            Ok(Decoded::Events(events)) => events,
            Ok(Decoded::Ignored) => return Disposition::Handled,
            Ok(Decoded::Unknown(kind)) => {
                self.stats.unknown.fetch_add(1, Ordering::Relaxed);
                self.handler.on_unknown(role, &kind);
                return Disposition::Handled;
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    %role,
                    error = %e,
                    frame = truncate(frame),
                    "Dropping malformed frame"
                );
                return Disposition::Dropped;
            }
        };

        let mut disposition = Disposition::Handled;
        for event in events {
            self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            disposition = strongest(disposition, self.route(role, event));
        }
        disposition
    }

    fn route(&self, role: ConnectionRole, event: InboundEvent) -> Disposition {
        match event {
            InboundEvent::PriceTick(tick) => self.handler.on_price_tick(role, tick),
            InboundEvent::Kline(kline) => self.handler.on_kline(role, kline),
            InboundEvent::Depth(depth) => self.handler.on_depth(role, depth),
            InboundEvent::AccountUpdate(update) => self.handler.on_account_update(role, update),
            InboundEvent::OrderUpdate(update) => self.handler.on_order_update(role, update),
            InboundEvent::HeartbeatReply { .. } => return Disposition::HeartbeatReply,
            InboundEvent::Error(error) => {
                let expired = error.kind == StreamErrorKind::ListenKeyExpired;
                self.handler.on_stream_error(role, error);
                if expired {
                    return Disposition::Reconnect;
                }
            }
            InboundEvent::ConnectionStatus(notice) => {
                self.handler.on_connection_status(role, notice)
            }
        }
        Disposition::Handled
    }
}

impl<D: FrameDecoder, H: EventHandler> FrameHandler for MessageRouter<D, H> {
    fn on_frame(&self, role: ConnectionRole, frame: &str) -> Disposition {
        self.dispatch(role, frame)
    }

    fn on_state(&self, role: ConnectionRole, state: &SupervisorState) {
        self.handler.on_link_state(role, state);
    }
}

/// A reconnect request outranks a heartbeat reply, which outranks plain handling.
fn strongest(current: Disposition, next: Disposition) -> Disposition {
    match (current, next) {
        (Disposition::Reconnect, _) | (_, Disposition::Reconnect) => Disposition::Reconnect,
        (Disposition::HeartbeatReply, _) | (_, Disposition::HeartbeatReply) => {
            Disposition::HeartbeatReply
        }
        (current, _) => current,
    }
}

fn truncate(frame: &str) -> &str {
    match frame.char_indices().nth(MAX_LOGGED_FRAME) {
        Some((idx, _)) => &frame[..idx],
        None => frame,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{ExchangeDecoder, GatewayDecoder};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Tally {
        seen: Mutex<Vec<&'static str>>,
    }

    impl EventHandler for Tally {
        fn on_price_tick(&self, _: ConnectionRole, _: PriceTick) {
            self.seen.lock().push("price");
        }
        fn on_kline(&self, _: ConnectionRole, _: Kline) {
            self.seen.lock().push("kline");
        }
        fn on_depth(&self, _: ConnectionRole, _: DepthUpdate) {
            self.seen.lock().push("depth");
        }
        fn on_account_update(&self, _: ConnectionRole, _: AccountUpdate) {
            self.seen.lock().push("account");
        }
        fn on_order_update(&self, _: ConnectionRole, _: OrderUpdate) {
            self.seen.lock().push("order");
        }
        fn on_stream_error(&self, _: ConnectionRole, _: StreamError) {
            self.seen.lock().push("error");
        }
        fn on_connection_status(&self, _: ConnectionRole, _: ConnectionNotice) {
            self.seen.lock().push("connection");
        }
        fn on_unknown(&self, _: ConnectionRole, _: &str) {
            self.seen.lock().push("unknown");
        }
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let router = MessageRouter::new(ExchangeDecoder, Tally::default());
        assert_eq!(
            router.dispatch(ConnectionRole::MarketFeed, "{not json"),
            Disposition::Dropped
        );
        assert_eq!(router.stats().dropped(), 1);
        assert!(router.handler().seen.lock().is_empty());
    }

    #[test]
    fn test_listen_key_expiry_requests_reconnect() {
        let router = MessageRouter::new(ExchangeDecoder, Tally::default());
        let disposition = router.dispatch(
            ConnectionRole::UserData,
            r#"{"e":"listenKeyExpired","E":1}"#,
        );
        assert_eq!(disposition, Disposition::Reconnect);
        assert_eq!(*router.handler().seen.lock(), vec!["error"]);
    }

    #[test]
    fn test_pong_is_heartbeat_reply() {
        let router = MessageRouter::new(GatewayDecoder::new(), Tally::default());
        assert_eq!(
            router.dispatch(
                ConnectionRole::BrowserSession,
                r#"{"type":"pong","timestamp":1}"#
            ),
            Disposition::HeartbeatReply
        );
        assert!(router.handler().seen.lock().is_empty());
    }

    #[test]
    fn test_unknown_kind_uses_default_path() {
        let router = MessageRouter::new(ExchangeDecoder, Tally::default());
        router.dispatch(ConnectionRole::UserData, r#"{"e":"MARGIN_CALL","E":1}"#);
        assert_eq!(router.stats().unknown(), 1);
        assert_eq!(*router.handler().seen.lock(), vec!["unknown"]);
    }

    #[test]
    fn test_strongest_disposition() {
        assert_eq!(
            strongest(Disposition::HeartbeatReply, Disposition::Handled),
            Disposition::HeartbeatReply
        );
        assert_eq!(
            strongest(Disposition::Handled, Disposition::Reconnect),
            Disposition::Reconnect
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(MAX_LOGGED_FRAME + 10);
        assert_eq!(truncate(&long).chars().count(), MAX_LOGGED_FRAME);
        assert_eq!(truncate("short"), "short");
    }
}
