//! Supervisor lifecycle tests against scripted in-memory connections.
//!
//! Time is paused, so backoff and heartbeat periods elapse instantly
//! while keeping their virtual durations observable.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use perpdesk_ws::{
    pair, ConnectionEvent, ConnectionRole, Connector, Disposition, ExchangeSubscribeCodec,
    FrameHandler, GatewaySubscribeCodec, LifecycleState, ReconnectSupervisor, StreamConnection,
    Subscription, SubscriptionCodec, SupervisorConfig, SupervisorState, TransportEnd, WsError,
    WsOutbound, WsResult,
};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy)]
enum Step {
    Refuse,
    Accept,
}

/// Connector that follows a script; refuses once the script runs out.
struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    attempts: Arc<AtomicU32>,
    ends_tx: mpsc::UnboundedSender<TransportEnd>,
}

impl ScriptedConnector {
    fn new(steps: &[Step]) -> (Self, Arc<AtomicU32>, mpsc::UnboundedReceiver<TransportEnd>) {
        let attempts = Arc::new(AtomicU32::new(0));
        let (ends_tx, ends_rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(steps.iter().copied().collect()),
            attempts: attempts.clone(),
            ends_tx,
        };
        (connector, attempts, ends_rx)
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self) -> BoxFuture<'_, WsResult<StreamConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(Step::Refuse);
        Box::pin(async move {
            match step {
                Step::Refuse => Err(WsError::ConnectionFailed("connection refused".to_string())),
                Step::Accept => {
                    let (conn, end) = pair(ConnectionRole::MarketFeed, "mock://exchange");
                    end.mark_open();
                    let _ = self.ends_tx.send(end);
                    Ok(conn)
                }
            }
        })
    }
}

/// Handler that records everything it sees.
#[derive(Default)]
struct Recorder {
    frames: Mutex<Vec<String>>,
    states: Mutex<Vec<SupervisorState>>,
}

impl Recorder {
    fn backoff_delays(&self) -> Vec<u64> {
        self.states
            .lock()
            .iter()
            .filter_map(|s| match s {
                SupervisorState::Backoff { delay, .. } => Some(delay.as_secs()),
                _ => None,
            })
            .collect()
    }
}

impl FrameHandler for Recorder {
    fn on_frame(&self, _role: ConnectionRole, frame: &str) -> Disposition {
        self.frames.lock().push(frame.to_string());
        match serde_json::from_str::<serde_json::Value>(frame) {
            Ok(v) if v["type"] == "pong" => Disposition::HeartbeatReply,
            Ok(_) => Disposition::Handled,
            Err(_) => Disposition::Dropped,
        }
    }

    fn on_state(&self, _role: ConnectionRole, state: &SupervisorState) {
        self.states.lock().push(state.clone());
    }
}

fn supervisor(
    connector: ScriptedConnector,
    codec: Arc<dyn SubscriptionCodec>,
) -> ReconnectSupervisor<ScriptedConnector> {
    ReconnectSupervisor::new(
        ConnectionRole::MarketFeed,
        SupervisorConfig::default(),
        connector,
        codec,
    )
}

/// Drain queued text frames, skipping pings.
fn drain_texts(end: &mut TransportEnd) -> Vec<String> {
    let mut texts = Vec::new();
    while let Some(frame) = end.try_next_outbound() {
        if let WsOutbound::Text(text) = frame {
            texts.push(text);
        }
    }
    texts
}

/// Wait for the next `n` text frames, skipping pings.
async fn collect_texts(end: &mut TransportEnd, n: usize) -> Vec<String> {
    let mut texts = Vec::new();
    while texts.len() < n {
        match end.next_outbound().await {
            Some(WsOutbound::Text(text)) => texts.push(text),
            Some(WsOutbound::Ping) => {}
            None => panic!("connection dropped after {} frames", texts.len()),
        }
    }
    texts
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_then_gives_up() {
    let (connector, attempts, _ends) = ScriptedConnector::new(&[]);
    let sup = supervisor(connector, Arc::new(ExchangeSubscribeCodec::new()));
    let handle = sup.handle();
    let recorder = Arc::new(Recorder::default());
    let task = tokio::spawn(sup.run(recorder.clone()));

    let mut state_rx = handle.watch_state();
    state_rx
        .wait_for(|s| matches!(s, SupervisorState::GaveUp { .. }))
        .await
        .unwrap();

    assert_eq!(recorder.backoff_delays(), vec![2, 4, 8, 16]);
    assert_eq!(handle.state(), SupervisorState::GaveUp { attempts: 5 });

    // No further attempts, however long we wait.
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 5);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_manual_reset_after_give_up_reconnects() {
    let (connector, attempts, mut ends) = ScriptedConnector::new(&[
        Step::Refuse,
        Step::Refuse,
        Step::Refuse,
        Step::Refuse,
        Step::Refuse,
        Step::Accept,
    ]);
    let sup = supervisor(connector, Arc::new(ExchangeSubscribeCodec::new()));
    let handle = sup.handle();
    let recorder = Arc::new(Recorder::default());
    let task = tokio::spawn(sup.run(recorder.clone()));

    let mut state_rx = handle.watch_state();
    state_rx
        .wait_for(|s| matches!(s, SupervisorState::GaveUp { .. }))
        .await
        .unwrap();

    handle.reset();
    state_rx
        .wait_for(|s| *s == SupervisorState::Open)
        .await
        .unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 6);
    let _end = ends.recv().await.unwrap();

    // Counter starts from zero again after the reset.
    assert!(recorder
        .states
        .lock()
        .iter()
        .skip_while(|s| !matches!(s, SupervisorState::GaveUp { .. }))
        .any(|s| *s == SupervisorState::Idle));

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reset_during_backoff_retries_now_with_fresh_counter() {
    let (connector, attempts, mut ends) =
        ScriptedConnector::new(&[Step::Refuse, Step::Refuse, Step::Accept]);
    let sup = supervisor(connector, Arc::new(ExchangeSubscribeCodec::new()));
    let handle = sup.handle();
    let recorder = Arc::new(Recorder::default());
    let task = tokio::spawn(sup.run(recorder.clone()));

    let mut state_rx = handle.watch_state();
    state_rx
        .wait_for(|s| matches!(s, SupervisorState::Backoff { attempt: 1, .. }))
        .await
        .unwrap();

    // Cut the 2s wait short; the retry that follows backs off as a first failure.
    let reset_at = tokio::time::Instant::now();
    handle.reset();
    state_rx
        .wait_for(|s| *s == SupervisorState::Open)
        .await
        .unwrap();
    let _end = ends.recv().await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.backoff_delays(), vec![2, 2]);
    assert!(reset_at.elapsed() >= Duration::from_secs(2));
    assert!(reset_at.elapsed() < Duration::from_secs(4));
    assert!(recorder
        .states
        .lock()
        .iter()
        .skip_while(|s| !matches!(s, SupervisorState::Backoff { .. }))
        .any(|s| *s == SupervisorState::Idle));

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_exactly_recorded_subscriptions() {
    let (connector, _attempts, mut ends) = ScriptedConnector::new(&[Step::Accept, Step::Accept]);
    let btc_ticker = Subscription::ticker("BTCUSDT");
    let eth_kline = Subscription::kline("ETHUSDT", "1m");
    let sol_depth = Subscription::depth("SOLUSDT");

    let sup = supervisor(connector, Arc::new(GatewaySubscribeCodec))
        .with_subscriptions([btc_ticker.clone(), eth_kline.clone()]);
    let handle = sup.handle();
    let task = tokio::spawn(sup.run(Arc::new(Recorder::default())));

    let mut first = ends.recv().await.unwrap();
    let initial: BTreeSet<String> = collect_texts(&mut first, 2).await.into_iter().collect();
    let expected_initial: BTreeSet<String> = GatewaySubscribeCodec
        .subscribe_frames(&[btc_ticker.clone(), eth_kline.clone()])
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(initial, expected_initial);

    // Change the recorded set while open; both changes go out live.
    assert!(handle.subscribe(sol_depth.clone()).await.unwrap());
    assert!(handle.unsubscribe(&btc_ticker).await.unwrap());
    assert_eq!(collect_texts(&mut first, 2).await.len(), 2);

    first
        .finish(ConnectionEvent::Closed {
            code: 1006,
            reason: "peer reset".to_string(),
        })
        .await;

    let mut second = ends.recv().await.unwrap();
    let replayed: BTreeSet<String> = collect_texts(&mut second, 2).await.into_iter().collect();
    let expected: BTreeSet<String> = GatewaySubscribeCodec
        .subscribe_frames(&[eth_kline, sol_depth])
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(replayed, expected);

    tokio::task::yield_now().await;
    assert!(drain_texts(&mut second).is_empty());

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_two_missed_pongs_close_and_back_off() {
    let (connector, _attempts, mut ends) = ScriptedConnector::new(&[Step::Accept]);
    let sup = supervisor(connector, Arc::new(ExchangeSubscribeCodec::new()));
    let handle = sup.handle();
    let started = tokio::time::Instant::now();
    let task = tokio::spawn(sup.run(Arc::new(Recorder::default())));

    let mut end = ends.recv().await.unwrap();
    handle
        .watch_state()
        .wait_for(|s| matches!(s, SupervisorState::Backoff { .. }))
        .await
        .unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(60), "closed after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(61), "closed after {elapsed:?}");
    assert_eq!(
        handle.state(),
        SupervisorState::Backoff {
            attempt: 1,
            delay: Duration::from_secs(2)
        }
    );

    assert!(end.is_close_requested());
    let mut pings = 0;
    while let Some(frame) = end.try_next_outbound() {
        if frame == WsOutbound::Ping {
            pings += 1;
        }
    }
    assert_eq!(pings, 2);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_answered_pings_keep_connection_open() {
    let (connector, _attempts, mut ends) = ScriptedConnector::new(&[Step::Accept]);
    let sup = supervisor(connector, Arc::new(ExchangeSubscribeCodec::new()));
    let handle = sup.handle();
    let task = tokio::spawn(sup.run(Arc::new(Recorder::default())));

    let mut end = ends.recv().await.unwrap();
    let responder = tokio::spawn(async move {
        while let Some(frame) = end.next_outbound().await {
            if frame == WsOutbound::Ping {
                end.deliver_pong().await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(handle.state(), SupervisorState::Open);

    handle.shutdown();
    task.await.unwrap();
    responder.abort();
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_keeps_connection_open() {
    let (connector, attempts, mut ends) = ScriptedConnector::new(&[Step::Accept]);
    let sup = supervisor(connector, Arc::new(ExchangeSubscribeCodec::new()));
    let handle = sup.handle();
    let recorder = Arc::new(Recorder::default());
    let task = tokio::spawn(sup.run(recorder.clone()));

    let end = ends.recv().await.unwrap();
    end.deliver("{not json".to_string()).await;
    end.deliver(r#"{"e":"24hrMiniTicker"}"#.to_string()).await;
    while recorder.frames.lock().len() < 2 {
        tokio::task::yield_now().await;
    }

    assert_eq!(recorder.frames.lock().len(), 2);
    assert_eq!(handle.state(), SupervisorState::Open);
    assert_eq!(end.state(), LifecycleState::Open);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    handle.shutdown();
    task.await.unwrap();
}
