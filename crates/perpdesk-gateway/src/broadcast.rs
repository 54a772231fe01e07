//! Per-session fan-out.
//!
//! Every session owns a bounded FIFO drained by its own socket task. A
//! broadcast serializes the message once and offers it to each admitting
//! session without waiting: a full queue evicts that session (slow
//! consumer), a closed queue unregisters it. One peer's failure never
//! blocks or reorders delivery to the others.

use dashmap::DashMap;
use parking_lot::RwLock;
use perpdesk_feed::EventSink;
use perpdesk_telemetry::Metrics;
use perpdesk_ws::{GatewayMessage, StreamKind, Subscription};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Streams one session asked for.
///
/// Control messages and account events reach every session; market
/// events only those with an admitting subscription.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    subscriptions: BTreeSet<Subscription>,
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sub: Subscription) -> bool {
        self.subscriptions.insert(sub)
    }

    pub fn remove(&mut self, sub: &Subscription) -> bool {
        self.subscriptions.remove(sub)
    }

    pub fn contains(&self, sub: &Subscription) -> bool {
        self.subscriptions.contains(sub)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.iter().cloned().collect()
    }

    pub fn admits(&self, message: &GatewayMessage) -> bool {
        match message.stream() {
            None | Some((StreamKind::UserData, _, _)) => true,
            Some((kind, symbol, interval)) => self
                .subscriptions
                .iter()
                .any(|s| s.admits(kind, symbol, interval)),
        }
    }
}

struct SessionEntry {
    tx: mpsc::Sender<Arc<str>>,
    filter: Arc<RwLock<SessionFilter>>,
    evicted: CancellationToken,
}

/// What a session task holds after registering.
pub struct SessionRegistration {
    pub id: u64,
    pub rx: mpsc::Receiver<Arc<str>>,
    pub filter: Arc<RwLock<SessionFilter>>,
    /// Cancelled when the broadcaster drops the session as a slow consumer.
    pub evicted: CancellationToken,
}

pub struct Broadcaster {
    sessions: DashMap<u64, SessionEntry>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Broadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn register(&self) -> SessionRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let filter = Arc::new(RwLock::new(SessionFilter::new()));
        let evicted = CancellationToken::new();
        self.sessions.insert(
            id,
            SessionEntry {
                tx,
                filter: filter.clone(),
                evicted: evicted.clone(),
            },
        );
        Metrics::session_opened();
        debug!(session_id = id, sessions = self.sessions.len(), "Session registered");
        SessionRegistration {
            id,
            rx,
            filter,
            evicted,
        }
    }

    /// Remove a session. Returns false if it was already gone.
    pub fn unregister(&self, id: u64) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            Metrics::session_closed();
            debug!(session_id = id, sessions = self.sessions.len(), "Session unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether any session other than `except` holds `sub`.
    pub fn is_held_elsewhere(&self, sub: &Subscription, except: u64) -> bool {
        self.sessions
            .iter()
            .any(|entry| *entry.key() != except && entry.filter.read().contains(sub))
    }

    /// Offer `message` to every admitting session. Returns how many accepted it.
    pub fn broadcast(&self, message: &GatewayMessage) -> usize {
        let text: Arc<str> = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, kind = message.kind(), "Failed to serialize broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut slow = Vec::new();
        let mut closed = Vec::new();
        for entry in self.sessions.iter() {
            if !entry.filter.read().admits(message) {
                continue;
            }
            match entry.tx.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => slow.push(*entry.key()),
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in slow {
            if let Some((_, entry)) = self.sessions.remove(&id) {
                warn!(session_id = id, "Evicting slow consumer");
                entry.evicted.cancel();
                Metrics::session_closed();
                Metrics::session_evicted("slow_consumer");
            }
        }
        for id in closed {
            if self.unregister(id) {
                Metrics::session_evicted("closed");
            }
        }

        trace!(kind = message.kind(), delivered, "Broadcast");
        delivered
    }

    /// Queue `message` for one session only.
    pub fn send_to(&self, id: u64, message: &GatewayMessage) -> bool {
        let Some(entry) = self.sessions.get(&id) else {
            return false;
        };
        match serde_json::to_string(message) {
            Ok(json) => entry.tx.try_send(json.into()).is_ok(),
            Err(_) => false,
        }
    }
}

impl EventSink for Broadcaster {
    fn emit(&self, message: GatewayMessage) {
        self.broadcast(&message);
    }
}
