//! Gateway orchestration.
//!
//! Wires one supervisor per exchange link into the shared mirrors and
//! the browser broadcaster:
//! - market feed: always, with the configured default subscriptions
//! - user data: only with API credentials, plus the refresh worker
//! - the gateway server itself

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::instrument::Instrumented;
use crate::user_stream::UserStreamConnector;
use perpdesk_feed::{
    refresh_channel, EventSink, ExchangeDecoder, MessageRouter, RefreshOutcome, Refresher,
    StateMirrors, StateSync,
};
use perpdesk_gateway::{run_server, Broadcaster, ExchangeAccess, GatewayState};
use perpdesk_rest::BinanceRestClient;
use perpdesk_telemetry::Metrics;
use perpdesk_ws::{
    ConnectionRole, ExchangeSubscribeCodec, PingStyle, ReconnectSupervisor, TungsteniteConnector,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn record_refresh(outcome: &RefreshOutcome) {
    for panel in &outcome.refreshed {
        Metrics::refresh(panel.as_str(), true);
    }
    for panel in &outcome.failed {
        Metrics::refresh(panel.as_str(), false);
    }
}

/// Main application.
pub struct Application {
    config: AppConfig,
    shutdown: CancellationToken,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops every task the application started.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until Ctrl-C, shutdown, or the server failing.
    pub async fn run(self) -> AppResult<()> {
        let config = &self.config;
        let mirrors = Arc::new(StateMirrors::with_price_capacity(
            config.stream.price_series_capacity,
        ));
        let broadcaster = Arc::new(Broadcaster::new(config.gateway.session_queue_capacity));
        let sink: Arc<dyn EventSink> = broadcaster.clone();
        let (refresh, queue) = refresh_channel();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let market_subs = config.market.subscriptions();
        info!(
            url = %config.exchange.market_stream_url,
            subscriptions = ?market_subs.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Starting market feed"
        );
        let market = ReconnectSupervisor::new(
            ConnectionRole::MarketFeed,
            config.stream.supervisor_config(PingStyle::Transport),
            TungsteniteConnector::new(&config.exchange.market_stream_url, ConnectionRole::MarketFeed),
            Arc::new(ExchangeSubscribeCodec::new()),
        )
        .with_subscriptions(market_subs)
        .with_shutdown(&self.shutdown);
        let market_handle = market.handle();
        let market_router = Instrumented::new(MessageRouter::new(
            ExchangeDecoder::new(),
            StateSync::new(mirrors.clone(), sink.clone(), refresh.clone()),
        ));
        tasks.push(tokio::spawn(market.run(Arc::new(market_router))));

        let mut state = GatewayState::new(config.gateway.clone(), broadcaster, mirrors.clone())
            .with_market(market_handle)
            .with_shutdown(&self.shutdown);

        match config.credentials() {
            Some(credentials) => {
                let client = Arc::new(BinanceRestClient::new(
                    config.rest_config(),
                    Some(credentials),
                )?);
                let refresher = Arc::new(
                    Refresher::new(client.clone(), mirrors.clone(), sink.clone())
                        .with_observer(Arc::new(record_refresh)),
                );
                tasks.push(tokio::spawn(
                    refresher.clone().run(queue, self.shutdown.child_token()),
                ));

                info!(url = %config.exchange.user_stream_url, "Starting user data stream");
                let user = ReconnectSupervisor::new(
                    ConnectionRole::UserData,
                    config.stream.supervisor_config(PingStyle::Transport),
                    UserStreamConnector::new(
                        client.clone(),
                        &config.exchange.user_stream_url,
                        config.listen_key_keepalive(),
                    ),
                    Arc::new(ExchangeSubscribeCodec::new()),
                )
                .with_shutdown(&self.shutdown);
                let user_router = Instrumented::new(MessageRouter::new(
                    ExchangeDecoder::new(),
                    StateSync::new(mirrors, sink, refresh.clone()),
                ));
                let user_handle = user.handle();
                tasks.push(tokio::spawn(user.run(Arc::new(user_router))));

                state = state
                    .with_user_stream(user_handle)
                    .with_exchange(ExchangeAccess {
                        api: client,
                        refresher,
                        refresh,
                    });
            }
            None => {
                warn!(
                    key_env = %config.exchange.api_key_env,
                    secret_env = %config.exchange.api_secret_env,
                    "No API credentials, running in observation mode (market data only)"
                );
            }
        }

        let mut server = tokio::spawn(run_server(state));
        let finished = tokio::select! {
            joined = &mut server => Some(joined),
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                None
            }
            _ = self.shutdown.cancelled() => None,
        };

        self.shutdown.cancel();
        let joined = match finished {
            Some(joined) => joined,
            None => server.await,
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Task ended abnormally");
            }
        }
        info!("Shutdown complete");

        match joined {
            Ok(result) => result.map_err(AppError::from),
            Err(e) => {
                error!(error = %e, "Gateway task failed");
                Err(AppError::Task(e.to_string()))
            }
        }
    }
}
