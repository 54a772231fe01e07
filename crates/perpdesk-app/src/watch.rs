//! Watch client: the browser peer as a terminal client.
//!
//! Connects to the gateway's trade socket with the same supervisor,
//! router and mirrors the gateway uses upstream, and refreshes the
//! account tables from the gateway's REST endpoints. The console stands
//! in for the browser UI: price lines with a sparkline of the series,
//! connection banners, and tables printed after every refresh.

use crate::config::AppConfig;
use crate::error::AppResult;
use perpdesk_core::{AccountBalance, Order, Position, PositionSide, PricePoint};
use perpdesk_feed::{
    refresh_channel, EventSink, GatewayDecoder, MessageRouter, Panel, RefreshOutcome, Refresher,
    StateMirrors, StateSync,
};
use perpdesk_rest::GatewayApiClient;
use perpdesk_ws::{
    ConnectionNotice, ConnectionRole, GatewayMessage, GatewaySubscribeCodec, LinkStatus,
    PingStyle, ReconnectSupervisor, SupervisorHandle, SupervisorState, TungsteniteConnector,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Unicode sparkline of a price series, oldest first.
pub fn sparkline(points: &[PricePoint]) -> String {
    let prices: Vec<Decimal> = points.iter().map(|p| p.price.inner()).collect();
    let (Some(min), Some(max)) = (prices.iter().min(), prices.iter().max()) else {
        return String::new();
    };
    let span = *max - *min;
    let top = Decimal::from(SPARK_LEVELS.len() - 1);
    prices
        .iter()
        .map(|price| {
            if span.is_zero() {
                return SPARK_LEVELS[0];
            }
            let level = ((*price - *min) / span * top).round().to_usize().unwrap_or(0);
            SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
        })
        .collect()
}

fn side_label(position: &Position) -> &'static str {
    match position.side() {
        Some(PositionSide::Long) => "LONG",
        Some(PositionSide::Short) => "SHORT",
        None => "FLAT",
    }
}

pub fn render_positions(positions: &[Position]) -> String {
    if positions.is_empty() {
        return "Positions: none".to_string();
    }
    let mut out = format!(
        "Positions:\n  {:<12} {:<6} {:>14} {:>14} {:>14}",
        "SYMBOL", "SIDE", "QTY", "ENTRY", "UPNL"
    );
    for p in positions {
        out.push_str(&format!(
            "\n  {:<12} {:<6} {:>14} {:>14} {:>14}",
            p.symbol,
            side_label(p),
            p.quantity.abs().to_string(),
            p.entry_price.to_string(),
            p.unrealized_pnl.to_string(),
        ));
    }
    out
}

pub fn render_orders(orders: &[Order]) -> String {
    if orders.is_empty() {
        return "Open orders: none".to_string();
    }
    let mut out = format!(
        "Open orders:\n  {:<12} {:<12} {:<5} {:<18} {:>12} {:>14} {:<16}",
        "ID", "SYMBOL", "SIDE", "TYPE", "QTY", "PRICE", "STATUS"
    );
    for o in orders {
        out.push_str(&format!(
            "\n  {:<12} {:<12} {:<5} {:<18} {:>12} {:>14} {:<16}",
            o.order_id.to_string(),
            o.symbol,
            o.side.to_string(),
            o.order_type.to_string(),
            o.quantity.to_string(),
            o.price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            o.status.to_string(),
        ));
    }
    out
}

pub fn render_balance(balance: &AccountBalance) -> String {
    format!(
        "Balance: wallet {} | available {} | unrealized {}",
        balance.total_wallet_balance, balance.available_balance, balance.total_unrealized_pnl
    )
}

/// Exchange link a notice speaks for; `None` means our own gateway link.
fn upstream_label(role: Option<ConnectionRole>) -> Option<&'static str> {
    match role {
        Some(ConnectionRole::MarketFeed) => Some("Exchange market feed"),
        Some(ConnectionRole::UserData) => Some("Exchange user data stream"),
        Some(ConnectionRole::BrowserSession) | None => None,
    }
}

fn connection_banner(notice: &ConnectionNotice) -> String {
    let attempt = notice.attempt.unwrap_or(0);
    let retry_in = notice.retry_in_ms.unwrap_or(0);
    let Some(label) = upstream_label(notice.role) else {
        return match notice.status {
            LinkStatus::Connected => "Connected to gateway".to_string(),
            LinkStatus::Connecting => "Connecting to gateway...".to_string(),
            LinkStatus::Reconnecting => {
                format!("Reconnecting (attempt {attempt}) in {retry_in} ms")
            }
            LinkStatus::Disconnected => "Disconnected from gateway".to_string(),
            LinkStatus::GaveUp => format!("Gave up after {attempt} attempts. Press Enter to retry."),
        };
    };
    match notice.status {
        LinkStatus::Connected => format!("{label} connected"),
        LinkStatus::Connecting => format!("{label} connecting..."),
        LinkStatus::Reconnecting => {
            format!("{label} reconnecting (attempt {attempt}) in {retry_in} ms")
        }
        LinkStatus::Disconnected => format!("{label} disconnected"),
        LinkStatus::GaveUp => format!(
            "{label} gave up after {attempt} attempts. Press Enter to have the gateway retry."
        ),
    }
}

/// Console stand-in for the browser UI.
pub struct ConsoleSink {
    mirrors: Arc<StateMirrors>,
    chart_symbols: Vec<String>,
    /// Upstream links the gateway reported as given up.
    gave_up: Option<mpsc::UnboundedSender<ConnectionRole>>,
}

impl ConsoleSink {
    pub fn new(mirrors: Arc<StateMirrors>, chart_symbols: Vec<String>) -> Self {
        let chart_symbols = chart_symbols
            .iter()
            .map(|s| perpdesk_core::normalize_symbol(s))
            .collect();
        Self {
            mirrors,
            chart_symbols,
            gave_up: None,
        }
    }

    /// Queue every upstream give-up so the retry prompt can act on it.
    pub fn with_retry_queue(mut self, queue: mpsc::UnboundedSender<ConnectionRole>) -> Self {
        self.gave_up = Some(queue);
        self
    }

    fn charts(&self, symbol: &str) -> bool {
        self.chart_symbols.is_empty() || self.chart_symbols.iter().any(|s| s == symbol)
    }

    fn price_line(&self, symbol: &str, price: String, extra: String) -> String {
        let series = self.mirrors.prices.snapshot(symbol);
        format!("{symbol:<12} {price:>14} {extra} {}", sparkline(&series))
    }

    /// Console text for one message, `None` for messages the UI ignores.
    pub fn render(&self, message: &GatewayMessage) -> Option<String> {
        match message {
            GatewayMessage::MiniTicker(t) if self.charts(&t.symbol) => {
                Some(self.price_line(&t.symbol, t.price.to_string(), String::new()))
            }
            GatewayMessage::Ticker(t) if self.charts(&t.symbol) => Some(self.price_line(
                &t.symbol,
                t.price.to_string(),
                format!("{}%", t.price_change_percent),
            )),
            GatewayMessage::MiniTicker(_) | GatewayMessage::Ticker(_) => None,
            GatewayMessage::Kline(k) => Some(format!(
                "{} {} O {} H {} L {} C {}{}",
                k.symbol,
                k.interval,
                k.open,
                k.high,
                k.low,
                k.close,
                if k.is_closed { " (closed)" } else { "" }
            )),
            GatewayMessage::Depth(d) => {
                let bid = d.bids.first().map(|l| l.0.to_string()).unwrap_or_else(|| "-".into());
                let ask = d.asks.first().map(|l| l.0.to_string()).unwrap_or_else(|| "-".into());
                Some(format!("{} book bid {bid} / ask {ask}", d.symbol))
            }
            GatewayMessage::UserData(u) => Some(format!("Account event: {}", u.event_type)),
            GatewayMessage::Error(e) => Some(match &e.panel {
                Some(panel) => format!("[error:{panel}] {}", e.message),
                None => format!("[error] {}", e.message),
            }),
            GatewayMessage::Connection(notice) => Some(connection_banner(notice)),
            GatewayMessage::Pong { .. } => None,
        }
    }

    /// Print the tables a refresh pass replaced.
    pub fn print_tables(&self, outcome: &RefreshOutcome) {
        for panel in &outcome.refreshed {
            let table = match panel {
                Panel::Positions => render_positions(&self.mirrors.positions.open_positions()),
                Panel::Orders => render_orders(&self.mirrors.orders.snapshot()),
                Panel::Balance => match self.mirrors.balance.snapshot() {
                    Some(balance) => render_balance(&balance),
                    None => continue,
                },
            };
            println!("{table}");
        }
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, message: GatewayMessage) {
        if let (GatewayMessage::Connection(notice), Some(queue)) = (&message, &self.gave_up) {
            if notice.status == LinkStatus::GaveUp && upstream_label(notice.role).is_some() {
                if let Some(role) = notice.role {
                    let _ = queue.send(role);
                }
            }
        }
        if let Some(line) = self.render(&message) {
            println!("{line}");
        }
    }
}

async fn wait_until(
    states: &mut watch::Receiver<SupervisorState>,
    predicate: impl FnMut(&SupervisorState) -> bool,
) -> bool {
    states.wait_for(predicate).await.is_ok()
}

/// What Enter should retry.
enum RetryTarget {
    Gateway,
    Upstream(ConnectionRole),
}

/// After a give-up, wait for Enter and retry: our own link directly,
/// an exchange link through the gateway's reset endpoint.
async fn retry_prompt(
    handle: SupervisorHandle,
    api: Arc<GatewayApiClient>,
    mut upstream_gave_up: mpsc::UnboundedReceiver<ConnectionRole>,
    shutdown: CancellationToken,
) {
    let mut states = handle.watch_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let target = tokio::select! {
            _ = shutdown.cancelled() => None,
            reached = wait_until(&mut states, |s| matches!(s, SupervisorState::GaveUp { .. })) => {
                reached.then_some(RetryTarget::Gateway)
            }
            Some(role) = upstream_gave_up.recv() => Some(RetryTarget::Upstream(role)),
        };
        let Some(target) = target else {
            break;
        };

        let retry = tokio::select! {
            _ = shutdown.cancelled() => false,
            line = lines.next_line() => matches!(line, Ok(Some(_))),
        };
        if !retry {
            break;
        }

        match target {
            RetryTarget::Gateway => {
                info!("Manual retry requested");
                handle.reset();
                let left = tokio::select! {
                    _ = shutdown.cancelled() => false,
                    left = wait_until(&mut states, |s| !matches!(s, SupervisorState::GaveUp { .. })) => left,
                };
                if !left {
                    break;
                }
            }
            RetryTarget::Upstream(role) => {
                info!(role = %role, "Manual upstream retry requested");
                match api.reset_stream(role.as_str()).await {
                    Ok(reply) => info!(role = %reply.role, was = %reply.state, "Gateway retrying"),
                    Err(e) => warn!(role = %role, error = %e, "Upstream retry failed"),
                }
            }
        }
    }
}

/// Run the watch client until Ctrl-C or `shutdown`.
pub async fn run_watch(config: AppConfig, shutdown: CancellationToken) -> AppResult<()> {
    let settings = &config.watch;
    let mirrors = Arc::new(StateMirrors::with_price_capacity(
        config.stream.price_series_capacity,
    ));
    let (gave_up_tx, gave_up_rx) = mpsc::unbounded_channel();
    let console = Arc::new(
        ConsoleSink::new(mirrors.clone(), settings.chart_symbols.clone())
            .with_retry_queue(gave_up_tx),
    );
    let sink: Arc<dyn EventSink> = console.clone();

    let api = Arc::new(GatewayApiClient::new(&settings.api_url)?);
    let (refresh, queue) = refresh_channel();
    let tables = console.clone();
    let refresher = Arc::new(
        Refresher::new(api.clone(), mirrors.clone(), sink.clone())
            .with_observer(Arc::new(move |outcome: &RefreshOutcome| tables.print_tables(outcome))),
    );
    let worker = tokio::spawn(refresher.run(queue, shutdown.child_token()));

    info!(url = %settings.socket_url, "Connecting to gateway");
    let supervisor = ReconnectSupervisor::new(
        ConnectionRole::BrowserSession,
        config.stream.supervisor_config(PingStyle::Json),
        TungsteniteConnector::new(&settings.socket_url, ConnectionRole::BrowserSession),
        Arc::new(GatewaySubscribeCodec),
    )
    .with_subscriptions(settings.subscriptions())
    .with_shutdown(&shutdown);
    let handle = supervisor.handle();
    let router = MessageRouter::new(GatewayDecoder::new(), StateSync::new(mirrors, sink, refresh));
    let link = tokio::spawn(supervisor.run(Arc::new(router)));
    let prompt = tokio::spawn(retry_prompt(
        handle.clone(),
        api,
        gave_up_rx,
        shutdown.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
    handle.shutdown();
    prompt.abort();

    if let Err(e) = link.await {
        warn!(error = %e, "Gateway link task ended abnormally");
    }
    if let Err(e) = worker.await {
        warn!(error = %e, "Refresh worker ended abnormally");
    }
    Ok(())
}
