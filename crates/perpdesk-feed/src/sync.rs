//! Applies routed events to the mirrors and forwards them downstream.

use crate::event::{AccountUpdate, OrderUpdate, PriceTick, StreamError, StreamErrorKind};
use crate::mirror::StateMirrors;
use crate::refresh::{RefreshHandle, RefreshScope};
use crate::router::EventHandler;
use perpdesk_core::{now_ms, DepthUpdate, Kline};
use perpdesk_ws::{ConnectionNotice, ConnectionRole, GatewayMessage, LinkStatus, SupervisorState};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Downstream consumer of browser-protocol messages (the broadcaster in
/// the gateway, the console in the watch client).
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn emit(&self, message: GatewayMessage);
}

/// Connection notice for a supervisor state, `None` for `Idle`.
pub fn link_notice(role: ConnectionRole, state: &SupervisorState) -> Option<ConnectionNotice> {
    let mut notice = match state {
        SupervisorState::Idle => return None,
        SupervisorState::Connecting => ConnectionNotice::new(LinkStatus::Connecting, now_ms()),
        SupervisorState::Open => ConnectionNotice::new(LinkStatus::Connected, now_ms()),
        SupervisorState::Backoff { attempt, delay } => {
            let mut notice = ConnectionNotice::new(LinkStatus::Reconnecting, now_ms());
            notice.attempt = Some(*attempt);
            notice.retry_in_ms = Some(delay.as_millis() as u64);
            notice
        }
        SupervisorState::GaveUp { attempts } => {
            let mut notice = ConnectionNotice::new(LinkStatus::GaveUp, now_ms());
            notice.attempt = Some(*attempts);
            notice
        }
    };
    notice.role = Some(role);
    Some(notice)
}

/// Event handler that keeps the mirrors in step with the streams.
///
/// Price ticks append to the series. Position pushes upsert. Any
/// account or order push schedules a full refresh of positions, orders
/// and balance, which is the only path that writes orders and balance.
pub struct StateSync {
    mirrors: Arc<StateMirrors>,
    sink: Arc<dyn EventSink>,
    refresh: RefreshHandle,
}

impl StateSync {
    pub fn new(mirrors: Arc<StateMirrors>, sink: Arc<dyn EventSink>, refresh: RefreshHandle) -> Self {
        Self {
            mirrors,
            sink,
            refresh,
        }
    }

    pub fn mirrors(&self) -> &Arc<StateMirrors> {
        &self.mirrors
    }
}

impl EventHandler for StateSync {
    fn on_price_tick(&self, _role: ConnectionRole, tick: PriceTick) {
        self.mirrors.prices.append(tick.point());
        let message = match tick {
            PriceTick::Mini(t) => GatewayMessage::MiniTicker(t),
            PriceTick::Full(t) => GatewayMessage::Ticker(t),
        };
        self.sink.emit(message);
    }

    fn on_kline(&self, _role: ConnectionRole, kline: Kline) {
        self.sink.emit(GatewayMessage::Kline(kline));
    }

    fn on_depth(&self, _role: ConnectionRole, depth: DepthUpdate) {
        self.sink.emit(GatewayMessage::Depth(depth));
    }

    fn on_account_update(&self, role: ConnectionRole, update: AccountUpdate) {
        debug!(
            %role,
            reason = update.reason.as_deref().unwrap_or("-"),
            positions = update.positions.len(),
            "Account update"
        );
        self.sink.emit(GatewayMessage::UserData(update.payload()));
        for position in update.positions {
            self.mirrors.positions.upsert(position);
        }
        self.refresh.request(RefreshScope::Full);
    }

    fn on_order_update(&self, role: ConnectionRole, update: OrderUpdate) {
        debug!(
            %role,
            order_id = %update.order.order_id,
            symbol = %update.order.symbol,
            status = %update.order.status,
            execution = %update.execution_type,
            "Order update"
        );
        self.sink.emit(GatewayMessage::UserData(update.payload()));
        self.refresh.request(RefreshScope::Full);
    }

    fn on_stream_error(&self, role: ConnectionRole, error: StreamError) {
        match error.kind {
            StreamErrorKind::ListenKeyExpired => {
                warn!(%role, "Listen key expired, reopening user data stream");
                self.sink.emit(GatewayMessage::error(
                    "User data stream expired, reconnecting",
                    None,
                ));
            }
            StreamErrorKind::Exchange => {
                warn!(%role, code = ?error.code, message = %error.message, "Exchange stream error");
                self.sink.emit(GatewayMessage::error(error.message, None));
            }
            StreamErrorKind::Gateway => {
                self.sink
                    .emit(GatewayMessage::error(error.message, error.panel.as_deref()));
            }
        }
    }

    fn on_connection_status(&self, _role: ConnectionRole, notice: ConnectionNotice) {
        self.sink.emit(GatewayMessage::Connection(notice));
    }

    fn on_link_state(&self, role: ConnectionRole, state: &SupervisorState) {
        // Pushes missed while the account link was down are recovered by re-querying.
        if *state == SupervisorState::Open && role != ConnectionRole::MarketFeed {
            info!(%role, "Account link open, refreshing account state");
            self.refresh.request(RefreshScope::Full);
        }
        if let Some(notice) = link_notice(role, state) {
            self.sink.emit(GatewayMessage::Connection(notice));
        }
    }
}
