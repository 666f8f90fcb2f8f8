//! WebSocket relay
//!
//! A minimal topic fan-out bus: `RelayServer` accepts WebSocket connections
//! and forwards every published payload to the topic's current subscribers;
//! `WsRelay` is the client side implementing [`MessageRelay`]. Lets the
//! engine run against a real bus without an external broker.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::SignalingError;
use super::relay::MessageRelay;

/// Wire frames between relay clients and the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum RelayFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: serde_json::Value },
    Deliver { topic: String, payload: serde_json::Value },
}

type TopicMap = Arc<RwLock<HashMap<String, HashMap<Uuid, mpsc::UnboundedSender<RelayFrame>>>>>;

/// Topic fan-out relay server
#[derive(Default)]
pub struct RelayServer {
    topics: TopicMap,
}

/// A bound, running relay server
pub struct RelayServerHandle {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl RelayServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl Drop for RelayServerHandle {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl RelayServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind and start accepting relay connections
    pub async fn bind(&self, addr: &str) -> Result<RelayServerHandle, SignalingError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Relay server listening on {}", local_addr);

        let topics = self.topics.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        debug!("New relay connection from {}", peer_addr);
                        let topics = topics.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_relay_connection(stream, topics).await {
                                warn!("Relay connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Relay accept error: {}", e);
                    }
                }
            }
        });

        Ok(RelayServerHandle {
            local_addr,
            accept_task,
        })
    }
}

/// Handle a single relay client connection
async fn handle_relay_connection(
    stream: TcpStream,
    topics: TopicMap,
) -> Result<(), SignalingError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| SignalingError::RelayConnection(format!("WebSocket accept failed: {}", e)))?;

    let (mut write, mut read) = ws_stream.split();
    let conn_id = Uuid::new_v4();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RelayFrame>();
    let mut subscribed: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RelayFrame>(&text) {
                            Ok(RelayFrame::Subscribe { topic }) => {
                                topics
                                    .write()
                                    .await
                                    .entry(topic.clone())
                                    .or_default()
                                    .insert(conn_id, out_tx.clone());
                                subscribed.insert(topic);
                            }
                            Ok(RelayFrame::Unsubscribe { topic }) => {
                                remove_subscriber(&topics, &topic, conn_id).await;
                                subscribed.remove(&topic);
                            }
                            Ok(RelayFrame::Publish { topic, payload }) => {
                                let topics_guard = topics.read().await;
                                if let Some(subs) = topics_guard.get(&topic) {
                                    for tx in subs.values() {
                                        let _ = tx.send(RelayFrame::Deliver {
                                            topic: topic.clone(),
                                            payload: payload.clone(),
                                        });
                                    }
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Invalid relay frame: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("Relay WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            frame = out_rx.recv() => {
                if let Some(frame) = frame {
                    if let Ok(json) = serde_json::to_string(&frame) {
                        if write.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    // Clean up this connection's subscriptions
    for topic in subscribed {
        remove_subscriber(&topics, &topic, conn_id).await;
    }

    Ok(())
}

async fn remove_subscriber(topics: &TopicMap, topic: &str, conn_id: Uuid) {
    let mut topics_guard = topics.write().await;
    if let Some(subs) = topics_guard.get_mut(topic) {
        subs.remove(&conn_id);
        if subs.is_empty() {
            topics_guard.remove(topic);
        }
    }
}

type WsSink = SplitSink<WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket-backed [`MessageRelay`] client
pub struct WsRelay {
    writer: tokio::sync::Mutex<WsSink>,
    subs: Arc<parking_lot::Mutex<HashMap<String, mpsc::UnboundedSender<serde_json::Value>>>>,
    read_task: JoinHandle<()>,
}

impl WsRelay {
    /// Connect to a relay server
    pub async fn connect(url: &str) -> Result<Self, SignalingError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| SignalingError::RelayConnection(format!("Connect failed: {}", e)))?;

        debug!("Connected to relay server: {}", url);

        let (write, mut read) = ws_stream.split();
        let subs: Arc<parking_lot::Mutex<HashMap<String, mpsc::UnboundedSender<serde_json::Value>>>> =
            Arc::new(parking_lot::Mutex::new(HashMap::new()));

        let subs_for_read = subs.clone();
        let read_task = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Ok(RelayFrame::Deliver { topic, payload }) =
                            serde_json::from_str(&text)
                        {
                            let mut subs = subs_for_read.lock();
                            let dropped = match subs.get(&topic) {
                                Some(tx) => tx.send(payload).is_err(),
                                None => false,
                            };
                            if dropped {
                                subs.remove(&topic);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        warn!("Relay receive failed: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            writer: tokio::sync::Mutex::new(write),
            subs,
            read_task,
        })
    }

    async fn send_frame(&self, frame: &RelayFrame) -> Result<(), SignalingError> {
        let json = serde_json::to_string(frame)?;
        self.writer
            .lock()
            .await
            .send(Message::Text(json))
            .await
            .map_err(|e| SignalingError::RelayConnection(format!("Send failed: {}", e)))
    }
}

#[async_trait]
impl MessageRelay for WsRelay {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), SignalingError> {
        self.send_frame(&RelayFrame::Publish {
            topic: topic.to_string(),
            payload,
        })
        .await
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<serde_json::Value>, SignalingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subs.lock().insert(topic.to_string(), tx);
        self.send_frame(&RelayFrame::Subscribe {
            topic: topic.to_string(),
        })
        .await
        .map_err(|e| SignalingError::SubscribeFailed(e.to_string()))?;
        Ok(rx)
    }
}

impl Drop for WsRelay {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}
