//! The shipped configuration file parses and matches the built-in defaults.

use perpdesk_app::AppConfig;
use perpdesk_ws::{PingStyle, Subscription};
use std::time::Duration;

fn shipped_config() -> AppConfig {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
    AppConfig::from_file(path).unwrap()
}

#[test]
fn test_default_toml_parses() {
    let config = shipped_config();
    let defaults = AppConfig::default();

    assert_eq!(config.exchange.rest_url, defaults.exchange.rest_url);
    assert_eq!(config.exchange.user_stream_url, defaults.exchange.user_stream_url);
    assert_eq!(config.gateway.bind_addr(), "0.0.0.0:8000");
    assert_eq!(config.listen_key_keepalive(), Duration::from_secs(1800));
    assert_eq!(
        config.market.subscriptions(),
        vec![Subscription::mini_ticker_all()]
    );
}

#[test]
fn test_watch_section() {
    let config = shipped_config();
    let subs = config.watch.subscriptions();
    assert!(subs.contains(&Subscription::kline("BTCUSDT", "1m")));
    assert!(subs.contains(&Subscription::user_data()));
    assert_eq!(config.watch.chart_symbols, vec!["BTCUSDT", "ETHUSDT"]);

    let supervisor = config.stream.supervisor_config(PingStyle::Json);
    assert_eq!(supervisor.max_attempts, 5);
    assert_eq!(supervisor.base_delay, Duration::from_secs(1));
    assert_eq!(supervisor.ping_style, PingStyle::Json);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let config = AppConfig::load("/nonexistent/perpdesk.toml").unwrap();
    assert_eq!(config.stream.price_series_capacity, 50);
}
