//! User-data stream connector tests against a mock exchange socket.

mod integration;
use integration::common::mock_ws::MockWsServer;

use futures_util::future::BoxFuture;
use perpdesk_app::user_stream::UserStreamConnector;
use perpdesk_rest::{RestError, RestResult, UserStreamApi};
use perpdesk_ws::{Connector, WsError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Hands out `key-1`, `key-2`, ... and counts keepalives.
#[derive(Default)]
struct FakeListenKeys {
    created: AtomicU32,
    keepalives: AtomicU32,
    refuse: AtomicBool,
}

impl UserStreamApi for FakeListenKeys {
    fn create_listen_key(&self) -> BoxFuture<'_, RestResult<String>> {
        Box::pin(async move {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(RestError::Api {
                    status: 401,
                    code: Some(-2015),
                    message: "Invalid API-key, IP, or permissions for action.".to_string(),
                });
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("key-{n}"))
        })
    }

    fn keepalive_listen_key(&self) -> BoxFuture<'_, RestResult<()>> {
        Box::pin(async move {
            self.keepalives.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

async fn wait_for_keepalives(api: &FakeListenKeys, at_least: u32) -> bool {
    timeout(Duration::from_secs(2), async {
        while api.keepalives.load(Ordering::SeqCst) < at_least {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_connect_opens_stream_under_fresh_listen_key() {
    let server = MockWsServer::start().await;
    let api = Arc::new(FakeListenKeys::default());
    let connector =
        UserStreamConnector::new(api.clone(), format!("{}/ws/", server.url()), Duration::from_secs(60));

    let first = connector.connect().await.unwrap();
    assert!(first.handle.is_open());
    first.handle.close();

    let second = connector.connect().await.unwrap();
    second.handle.close();

    assert_eq!(api.created.load(Ordering::SeqCst), 2);
    assert_eq!(server.paths().await, vec!["/ws/key-1", "/ws/key-2"]);
    server.shutdown().await;
}

#[tokio::test]
async fn test_keepalive_runs_while_connected() {
    let server = MockWsServer::start().await;
    let api = Arc::new(FakeListenKeys::default());
    let connector =
        UserStreamConnector::new(api.clone(), server.url(), Duration::from_millis(50));

    let connection = connector.connect().await.unwrap();
    assert!(wait_for_keepalives(&api, 2).await, "keepalive never ran");

    // Dropping the connector stops the task.
    drop(connector);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let settled = api.keepalives.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(api.keepalives.load(Ordering::SeqCst), settled);

    connection.handle.close();
    server.shutdown().await;
}

#[tokio::test]
async fn test_keepalive_stops_when_stream_is_lost() {
    let server = MockWsServer::start().await;
    let api = Arc::new(FakeListenKeys::default());
    let connector =
        UserStreamConnector::new(api.clone(), server.url(), Duration::from_millis(50));

    let connection = connector.connect().await.unwrap();
    assert!(wait_for_keepalives(&api, 1).await, "keepalive never ran");

    server.drop_all();
    let lost = timeout(Duration::from_secs(2), async {
        while connection.handle.is_open() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(lost.is_ok(), "connection never noticed the drop");

    // At most one tick was already in flight; after that nothing is sent
    // for the dead key even though the connector is still alive.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let settled = api.keepalives.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(api.keepalives.load(Ordering::SeqCst), settled);

    drop(connector);
    server.shutdown().await;
}

#[tokio::test]
async fn test_listen_key_failure_is_a_connect_failure() {
    let server = MockWsServer::start().await;
    let api = Arc::new(FakeListenKeys::default());
    api.refuse.store(true, Ordering::SeqCst);
    let connector = UserStreamConnector::new(api.clone(), server.url(), Duration::from_secs(60));

    let err = connector.connect().await.err().unwrap();
    assert!(matches!(err, WsError::ConnectionFailed(_)));
    assert_eq!(server.connection_count().await, 0);
    server.shutdown().await;
}
