//! Mock exchange WebSocket server for integration tests.
//!
//! Accepts connections, records request paths and received text,
//! answers `SUBSCRIBE`/`UNSUBSCRIBE` the way the exchange does, and can
//! push frames to (or drop) every connected client.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    DropAll,
}

#[derive(Default)]
struct Recorded {
    paths: Vec<String>,
    messages: Vec<String>,
    connections: u32,
}

pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    control_tx: broadcast::Sender<Control>,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockWsServer {
    /// Start a server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (control_tx, _) = broadcast::channel(64);

        let recorded_clone = recorded.clone();
        let control_clone = control_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            recorded_clone.clone(),
                            control_clone.subscribe(),
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            control_tx,
            recorded,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        self.recorded.lock().await.connections
    }

    /// Request paths of every accepted handshake, in order.
    pub async fn paths(&self) -> Vec<String> {
        self.recorded.lock().await.paths.clone()
    }

    pub async fn received_messages(&self) -> Vec<String> {
        self.recorded.lock().await.messages.clone()
    }

    /// Send a text frame to every connected client.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.control_tx.send(Control::Push(text.into()));
    }

    /// Close every open connection from the server side.
    pub fn drop_all(&self) {
        let _ = self.control_tx.send(Control::DropAll);
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    recorded: Arc<Mutex<Recorded>>,
    mut control_rx: broadcast::Receiver<Control>,
) {
    let mut path = String::new();
    let ws_stream = match accept_hdr_async(stream, |req: &Request, resp: Response| {
        path = req.uri().path().to_string();
        Ok(resp)
    })
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    {
        let mut rec = recorded.lock().await;
        rec.connections += 1;
        rec.paths.push(path);
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    recorded.lock().await.messages.push(text.clone());

                    // Acknowledge control requests
                    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) {
                        let method = parsed.get("method").and_then(|m| m.as_str());
                        if matches!(method, Some("SUBSCRIBE") | Some("UNSUBSCRIBE")) {
                            let response = serde_json::json!({
                                "result": null,
                                "id": parsed.get("id").cloned().unwrap_or_default(),
                            });
                            let _ = write.send(Message::Text(response.to_string())).await;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            control = control_rx.recv() => match control {
                Ok(Control::Push(text)) => {
                    let _ = write.send(Message::Text(text)).await;
                }
                Ok(Control::DropAll) | Err(_) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }
}
