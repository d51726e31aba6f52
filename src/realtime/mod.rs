//! Push channel to dashboard clients.
//!
//! Clients connect to `/ws` and send `{"event": "join-trading", "data":
//! {"userId": ".."}}` to subscribe to their room. Server pushes use the same
//! `{event, data}` frame shape.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket, Ws};
use warp::Filter;

use crate::metrics::{REALTIME_CONNECTIONS, REALTIME_DROPPED, REALTIME_EVENTS};
use crate::types::Quote;

pub const TRADE_UPDATE: &str = "trade-update";
pub const BOT_UPDATE: &str = "bot-update";
pub const MARKET_UPDATE: &str = "market-update";

pub type ConnectionId = u64;

/// Frames buffered per connection before new ones are dropped for it
pub const OUTBOUND_QUEUE: usize = 256;

pub fn room_name(user_id: &str) -> String {
    format!("trading-{}", user_id)
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomRequest {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct ServerFrame<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
}

/// Queues a frame without waiting. A client that stops reading loses frames
/// instead of growing its queue.
fn deliver(tx: &mpsc::Sender<String>, frame: &str, event: &str) -> bool {
    match tx.try_send(frame.to_string()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            REALTIME_DROPPED.with_label_values(&[event]).inc();
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

pub struct RealtimeHub {
    next_id: AtomicU64,
    queue_capacity: usize,
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<String>>>,
    rooms: RwLock<HashMap<String, HashSet<ConnectionId>>>,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::with_queue_capacity(OUTBOUND_QUEUE)
    }
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            queue_capacity: queue_capacity.max(1),
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a connection; frames for it arrive on the returned receiver
    pub async fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.connections.write().await.insert(id, tx);
        REALTIME_CONNECTIONS.inc();
        debug!(connection = id, "Client connected");
        (id, rx)
    }

    pub async fn join(&self, id: ConnectionId, user_id: &str) {
        let room = room_name(user_id);
        self.rooms
            .write()
            .await
            .entry(room.clone())
            .or_default()
            .insert(id);
        info!(connection = id, room = %room, "Joined trading room");
    }

    pub async fn leave(&self, id: ConnectionId, user_id: &str) {
        let room = room_name(user_id);
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&room) {
            members.remove(&id);
            if members.is_empty() {
                rooms.remove(&room);
            }
        }
        info!(connection = id, room = %room, "Left trading room");
    }

    /// Drops the connection from the registry and every room
    pub async fn disconnect(&self, id: ConnectionId) {
        if self.connections.write().await.remove(&id).is_some() {
            REALTIME_CONNECTIONS.dec();
        }
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
        debug!(connection = id, "Client disconnected");
    }

    pub async fn room_size(&self, user_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(&room_name(user_id))
            .map_or(0, HashSet::len)
    }

    fn encode<T: Serialize>(event: &str, data: &T) -> Option<String> {
        match serde_json::to_string(&ServerFrame { event, data }) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(event = event, error = %e, "Failed to encode realtime event");
                None
            }
        }
    }

    /// Sends an event to every connection in the user's room. Returns how
    /// many connections it reached.
    pub async fn emit_to_user<T: Serialize>(&self, user_id: &str, event: &str, data: &T) -> usize {
        let Some(frame) = Self::encode(event, data) else {
            return 0;
        };
        let members: Vec<ConnectionId> = match self.rooms.read().await.get(&room_name(user_id)) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        let connections = self.connections.read().await;
        let delivered = members
            .iter()
            .filter_map(|id| connections.get(id))
            .filter(|tx| deliver(tx, &frame, event))
            .count();
        REALTIME_EVENTS.with_label_values(&[event]).inc_by(delivered as f64);
        delivered
    }

    pub async fn broadcast<T: Serialize>(&self, event: &str, data: &T) -> usize {
        let Some(frame) = Self::encode(event, data) else {
            return 0;
        };
        let delivered = self
            .connections
            .read()
            .await
            .values()
            .filter(|tx| deliver(tx, &frame, event))
            .count();
        REALTIME_EVENTS.with_label_values(&[event]).inc_by(delivered as f64);
        delivered
    }

    /// Applies one client frame. Only room membership events are understood.
    pub async fn handle_client_message(&self, id: ConnectionId, text: &str) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(connection = id, error = %e, "Ignoring malformed client frame");
                return;
            }
        };

        let room_request = || serde_json::from_value::<RoomRequest>(frame.data.clone());
        match frame.event.as_str() {
            "join-trading" | "leave-trading" => match room_request() {
                Ok(req) if frame.event == "join-trading" => self.join(id, &req.user_id).await,
                Ok(req) => self.leave(id, &req.user_id).await,
                Err(e) => debug!(connection = id, error = %e, "Room event without userId"),
            },
            other => debug!(connection = id, event = other, "Ignoring unknown client event"),
        }
    }
}

async fn client_connection(socket: WebSocket, hub: Arc<RealtimeHub>) {
    let (mut sink, mut stream) = socket.split();
    let (id, mut outbound) = hub.register().await;

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(msg) if msg.is_text() => {
                if let Ok(text) = msg.to_str() {
                    hub.handle_client_message(id, text).await;
                }
            }
            Ok(msg) if msg.is_close() => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = id, error = %e, "Websocket error");
                break;
            }
        }
    }

    hub.disconnect(id).await;
    writer.abort();
}

fn with_hub(
    hub: Arc<RealtimeHub>,
) -> impl Filter<Extract = (Arc<RealtimeHub>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&hub))
}

pub fn routes(
    hub: Arc<RealtimeHub>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_hub(hub))
        .map(|ws: Ws, hub: Arc<RealtimeHub>| {
            ws.on_upgrade(move |socket| client_connection(socket, hub))
        })
}

/// Fans live quotes out to every connected client until the sender closes
pub async fn forward_quotes(hub: Arc<RealtimeHub>, mut quotes: mpsc::Receiver<Quote>) {
    while let Some(quote) = quotes.recv().await {
        hub.broadcast(MARKET_UPDATE, &quote).await;
    }
    debug!("Quote feed closed");
}
