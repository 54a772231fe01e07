//! User-data stream connector.
//!
//! Every connect asks for a fresh listen key and opens
//! `<base>/<listenKey>`. While the stream is up a background task keeps
//! the key alive. The task ends with the connection it was started for,
//! and a new connect replaces it.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use perpdesk_rest::UserStreamApi;
use perpdesk_ws::{
    open, ConnectionHandle, ConnectionRole, Connector, StreamConnection, WsError, WsResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct UserStreamConnector {
    api: Arc<dyn UserStreamApi>,
    base_url: String,
    keepalive_interval: Duration,
    keepalive_task: Mutex<Option<JoinHandle<()>>>,
}

impl UserStreamConnector {
    pub fn new(
        api: Arc<dyn UserStreamApi>,
        base_url: impl Into<String>,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            api,
            base_url: base_url.into(),
            keepalive_interval,
            keepalive_task: Mutex::new(None),
        }
    }

    fn stream_url(&self, listen_key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), listen_key)
    }

    fn restart_keepalive(&self, link: ConnectionHandle) {
        let api = self.api.clone();
        let period = self.keepalive_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if !link.is_open() {
                    debug!(connection_id = link.id(), "User data stream gone, keepalive stopped");
                    return;
                }
                match api.keepalive_listen_key().await {
                    Ok(()) => debug!("Listen key extended"),
                    Err(e) => warn!(error = %e, "Listen key keepalive failed"),
                }
            }
        });
        if let Some(previous) = self.keepalive_task.lock().replace(task) {
            previous.abort();
        }
    }
}

impl Connector for UserStreamConnector {
    fn connect(&self) -> BoxFuture<'_, WsResult<StreamConnection>> {
        Box::pin(async move {
            let listen_key = self
                .api
                .create_listen_key()
                .await
                .map_err(|e| WsError::ConnectionFailed(format!("listen key request failed: {e}")))?;
            let connection = open(&self.stream_url(&listen_key), ConnectionRole::UserData).await?;
            info!("User data stream opened");
            self.restart_keepalive(connection.handle.clone());
            Ok(connection)
        })
    }
}

impl Drop for UserStreamConnector {
    fn drop(&mut self) {
        if let Some(task) = self.keepalive_task.lock().take() {
            task.abort();
        }
    }
}
