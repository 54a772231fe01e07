//! Application configuration.

use crate::error::{AppError, AppResult};
use perpdesk_feed::PRICE_SERIES_CAPACITY;
use perpdesk_gateway::GatewayConfig;
use perpdesk_rest::{ApiCredentials, BinanceRestConfig, TESTNET_REST_URL};
use perpdesk_ws::{PingStyle, StreamKind, Subscription, SupervisorConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Exchange endpoints and credentials lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Combined-stream endpoint for market data.
    #[serde(default = "default_market_stream_url")]
    pub market_stream_url: String,
    /// Raw-stream base; the listen key is appended as the last path segment.
    #[serde(default = "default_user_stream_url")]
    pub user_stream_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Environment variable holding the API secret.
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    /// Minimum spacing between REST requests (ms).
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Listen key keepalive period (s). The exchange expires keys after 60 minutes.
    #[serde(default = "default_listen_key_keepalive_secs")]
    pub listen_key_keepalive_secs: u64,
}

fn default_rest_url() -> String {
    TESTNET_REST_URL.to_string()
}

fn default_market_stream_url() -> String {
    "wss://stream.binancefuture.com/stream".to_string()
}

fn default_user_stream_url() -> String {
    "wss://stream.binancefuture.com/ws".to_string()
}

fn default_api_key_env() -> String {
    "BINANCE_API_KEY".to_string()
}

fn default_api_secret_env() -> String {
    "BINANCE_API_SECRET".to_string()
}

fn default_recv_window_ms() -> u64 {
    5_000
}

fn default_min_request_interval_ms() -> u64 {
    100
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_listen_key_keepalive_secs() -> u64 {
    30 * 60
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            market_stream_url: default_market_stream_url(),
            user_stream_url: default_user_stream_url(),
            api_key_env: default_api_key_env(),
            api_secret_env: default_api_secret_env(),
            recv_window_ms: default_recv_window_ms(),
            min_request_interval_ms: default_min_request_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            listen_key_keepalive_secs: default_listen_key_keepalive_secs(),
        }
    }
}

/// Reconnect and heartbeat tuning shared by every supervised link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff unit (ms); retry `n` waits `2^n` units.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_max_missed")]
    pub heartbeat_max_missed: u32,
    #[serde(default = "default_price_series_capacity")]
    pub price_series_capacity: usize,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_max_missed() -> u32 {
    2
}

fn default_price_series_capacity() -> usize {
    PRICE_SERIES_CAPACITY
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_max_missed: default_heartbeat_max_missed(),
            price_series_capacity: default_price_series_capacity(),
        }
    }
}

impl StreamConfig {
    pub fn supervisor_config(&self, ping_style: PingStyle) -> SupervisorConfig {
        SupervisorConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            heartbeat_max_missed: self.heartbeat_max_missed,
            ping_style,
        }
    }
}

/// A subscription as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    #[serde(rename = "type")]
    pub kind: StreamKind,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
}

impl SubscriptionSpec {
    pub fn to_subscription(&self) -> Subscription {
        Subscription::new(self.kind, self.symbol.as_deref(), self.interval.as_deref())
    }
}

fn to_subscriptions(specs: &[SubscriptionSpec]) -> Vec<Subscription> {
    specs.iter().map(SubscriptionSpec::to_subscription).collect()
}

fn default_all_mini_tickers() -> Vec<SubscriptionSpec> {
    vec![SubscriptionSpec {
        kind: StreamKind::MiniTicker,
        symbol: None,
        interval: None,
    }]
}

/// Streams the gateway keeps open whether or not a browser asks for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_all_mini_tickers")]
    pub subscriptions: Vec<SubscriptionSpec>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            subscriptions: default_all_mini_tickers(),
        }
    }
}

impl MarketConfig {
    pub fn subscriptions(&self) -> Vec<Subscription> {
        to_subscriptions(&self.subscriptions)
    }
}

/// Watch client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_watch_socket_url")]
    pub socket_url: String,
    #[serde(default = "default_watch_api_url")]
    pub api_url: String,
    #[serde(default = "default_all_mini_tickers")]
    pub subscriptions: Vec<SubscriptionSpec>,
    /// Symbols whose price series the console charts.
    #[serde(default)]
    pub chart_symbols: Vec<String>,
}

fn default_watch_socket_url() -> String {
    "ws://127.0.0.1:8000/ws/trade".to_string()
}

fn default_watch_api_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            socket_url: default_watch_socket_url(),
            api_url: default_watch_api_url(),
            subscriptions: default_all_mini_tickers(),
            chart_symbols: Vec::new(),
        }
    }
}

impl WatchConfig {
    /// Configured streams plus the account stream, which the watch client
    /// always follows.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs = to_subscriptions(&self.subscriptions);
        let user_data = Subscription::user_data();
        if !subs.contains(&user_data) {
            subs.push(user_data);
        }
        subs
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

impl AppConfig {
    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Credentials from the configured environment variables, if both are set.
    pub fn credentials(&self) -> Option<ApiCredentials> {
        ApiCredentials::from_env(&self.exchange.api_key_env, &self.exchange.api_secret_env)
    }

    pub fn rest_config(&self) -> BinanceRestConfig {
        BinanceRestConfig {
            base_url: self.exchange.rest_url.clone(),
            recv_window_ms: self.exchange.recv_window_ms,
            min_request_interval: Duration::from_millis(self.exchange.min_request_interval_ms),
            timeout: Duration::from_millis(self.exchange.request_timeout_ms),
        }
    }

    pub fn listen_key_keepalive(&self) -> Duration {
        Duration::from_secs(self.exchange.listen_key_keepalive_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.stream.max_attempts, 5);
        assert_eq!(config.stream.price_series_capacity, 50);
        assert_eq!(config.exchange.api_key_env, "BINANCE_API_KEY");
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(
            config.market.subscriptions(),
            vec![Subscription::mini_ticker_all()]
        );
    }

    #[test]
    fn test_subscriptions_are_normalized() {
        let config = AppConfig::from_toml(
            r#"
            [[market.subscriptions]]
            type = "kline"
            symbol = "btcusdt"

            [[market.subscriptions]]
            type = "depth"
            symbol = "ethusdt"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.market.subscriptions(),
            vec![
                Subscription::kline("BTCUSDT", "1m"),
                Subscription::depth("ETHUSDT")
            ]
        );
    }

    #[test]
    fn test_watch_always_follows_user_data() {
        let watch = WatchConfig::default();
        let subs = watch.subscriptions();
        assert!(subs.contains(&Subscription::user_data()));
        assert!(subs.contains(&Subscription::mini_ticker_all()));
    }

    #[test]
    fn test_supervisor_config_mapping() {
        let stream = StreamConfig {
            base_delay_ms: 250,
            ..StreamConfig::default()
        };
        let sup = stream.supervisor_config(PingStyle::Json);
        assert_eq!(sup.base_delay, Duration::from_millis(250));
        assert_eq!(sup.ping_style, PingStyle::Json);
        assert_eq!(sup.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        assert!(matches!(
            AppConfig::from_toml("[stream]\nmax_attempts = \"five\""),
            Err(AppError::Config(_))
        ));
    }
}
