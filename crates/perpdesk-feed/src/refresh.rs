//! Authoritative re-queries of account state.
//!
//! Each mirror is refreshed under its own async lock held across the
//! request and the write, so an older response can never land after a
//! newer one. A failed refresh leaves its mirror untouched and reports
//! an `error` message tagged with the affected panel.

use crate::error::{FeedError, FeedResult};
use crate::mirror::StateMirrors;
use crate::sync::EventSink;
use perpdesk_rest::ExchangeApi;
use perpdesk_ws::GatewayMessage;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A UI table backed by a refreshable mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Panel {
    Orders,
    Positions,
    Balance,
}

impl Panel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Positions => "positions",
            Self::Balance => "balance",
        }
    }
}

impl fmt::Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    Only(Panel),
    Full,
}

impl RefreshScope {
    pub fn includes(&self, panel: Panel) -> bool {
        match self {
            Self::Full => true,
            Self::Only(p) => *p == panel,
        }
    }

    /// Smallest scope covering both.
    pub fn merge(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            Self::Full
        }
    }
}

/// What one refresh pass achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub refreshed: Vec<Panel>,
    pub failed: Vec<Panel>,
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Called after every worker pass.
pub type RefreshObserver = Arc<dyn Fn(&RefreshOutcome) + Send + Sync>;

/// Cheap handle for requesting a refresh from the worker.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    tx: mpsc::UnboundedSender<RefreshScope>,
}

impl RefreshHandle {
    pub fn request(&self, scope: RefreshScope) {
        if self.tx.send(scope).is_err() {
            debug!(?scope, "Refresh worker stopped, request dropped");
        }
    }
}

/// Pending refresh requests, consumed by [`Refresher::run`].
#[derive(Debug)]
pub struct RefreshQueue {
    rx: mpsc::UnboundedReceiver<RefreshScope>,
}

impl RefreshQueue {
    /// Next queued request, without waiting.
    pub fn try_next(&mut self) -> Option<RefreshScope> {
        self.rx.try_recv().ok()
    }
}

pub fn refresh_channel() -> (RefreshHandle, RefreshQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RefreshHandle { tx }, RefreshQueue { rx })
}

pub struct Refresher {
    api: Arc<dyn ExchangeApi>,
    mirrors: Arc<StateMirrors>,
    sink: Arc<dyn EventSink>,
    observer: Option<RefreshObserver>,
    orders_lock: Mutex<()>,
    positions_lock: Mutex<()>,
    balance_lock: Mutex<()>,
}

impl Refresher {
    pub fn new(
        api: Arc<dyn ExchangeApi>,
        mirrors: Arc<StateMirrors>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            api,
            mirrors,
            sink,
            observer: None,
            orders_lock: Mutex::new(()),
            positions_lock: Mutex::new(()),
            balance_lock: Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: RefreshObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn report(&self, panel: Panel, source: perpdesk_rest::RestError) -> FeedError {
        warn!(%panel, error = %source, "Refresh failed, keeping previous state");
        self.sink.emit(GatewayMessage::error(
            format!("Failed to refresh {panel}: {}", source.user_message()),
            Some(panel.as_str()),
        ));
        FeedError::Refresh {
            panel: panel.as_str(),
            source,
        }
    }

    /// Replace the orders mirror with the open-order list.
    pub async fn refresh_orders(&self) -> FeedResult<usize> {
        let _guard = self.orders_lock.lock().await;
        match self.api.get_open_orders().await {
            Ok(orders) => {
                let count = orders.len();
                self.mirrors.orders.replace_all(orders);
                Ok(count)
            }
            Err(e) => Err(self.report(Panel::Orders, e)),
        }
    }

    /// Replace the positions mirror with every reported position.
    pub async fn refresh_positions(&self) -> FeedResult<usize> {
        let _guard = self.positions_lock.lock().await;
        match self.api.get_positions().await {
            Ok(positions) => {
                let count = positions.len();
                self.mirrors.positions.replace_all(positions);
                Ok(count)
            }
            Err(e) => Err(self.report(Panel::Positions, e)),
        }
    }

    pub async fn refresh_balance(&self) -> FeedResult<()> {
        let _guard = self.balance_lock.lock().await;
        match self.api.get_balance().await {
            Ok(balance) => {
                self.mirrors.balance.replace(balance);
                Ok(())
            }
            Err(e) => Err(self.report(Panel::Balance, e)),
        }
    }

    /// Refresh every panel in scope concurrently. Failures are isolated.
    pub async fn refresh(&self, scope: RefreshScope) -> RefreshOutcome {
        let orders = async {
            if scope.includes(Panel::Orders) {
                Some(self.refresh_orders().await.is_ok())
            } else {
                None
            }
        };
        let positions = async {
            if scope.includes(Panel::Positions) {
                Some(self.refresh_positions().await.is_ok())
            } else {
                None
            }
        };
        let balance = async {
            if scope.includes(Panel::Balance) {
                Some(self.refresh_balance().await.is_ok())
            } else {
                None
            }
        };
        let (orders, positions, balance) = tokio::join!(orders, positions, balance);

        let mut outcome = RefreshOutcome::default();
        for (panel, result) in [
            (Panel::Orders, orders),
            (Panel::Positions, positions),
            (Panel::Balance, balance),
        ] {
            match result {
                Some(true) => outcome.refreshed.push(panel),
                Some(false) => outcome.failed.push(panel),
                None => {}
            }
        }
        outcome
    }

    /// Serve queued requests until shutdown. Requests that pile up while a
    /// pass is running collapse into one.
    pub async fn run(self: Arc<Self>, mut queue: RefreshQueue, shutdown: CancellationToken) {
        info!("Refresh worker started");
        loop {
            let first = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = queue.rx.recv() => match next {
                    Some(scope) => scope,
                    None => break,
                },
            };
            let mut scope = first;
            while let Some(more) = queue.try_next() {
                scope = scope.merge(more);
            }

            let outcome = self.refresh(scope).await;
            debug!(
                ?scope,
                refreshed = outcome.refreshed.len(),
                failed = outcome.failed.len(),
                "Refresh pass complete"
            );
            if let Some(observer) = &self.observer {
                observer(&outcome);
            }
        }
        info!("Refresh worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_merge() {
        let orders = RefreshScope::Only(Panel::Orders);
        assert_eq!(orders.merge(orders), orders);
        assert_eq!(
            orders.merge(RefreshScope::Only(Panel::Balance)),
            RefreshScope::Full
        );
        assert!(RefreshScope::Full.includes(Panel::Positions));
        assert!(!orders.includes(Panel::Positions));
    }

    #[test]
    fn test_handle_outlives_worker() {
        let (handle, queue) = refresh_channel();
        drop(queue);
        handle.request(RefreshScope::Full);
    }
}
