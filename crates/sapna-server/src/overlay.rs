// WebSocket feed for the browser-extension rankings overlay.
//
// A client subscribes to one room at a time and receives that room's rankings
// immediately and again whenever the match poller publishes a new snapshot.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use futures_util::stream::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use sapna_core::model::Room;
use sapna_feed::poller::{FeedSnapshot, SnapshotReceiver};

use crate::state::{rank_room, AppState};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Messages sent by the overlay client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    Unsubscribe,
}

/// Messages pushed to the overlay client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Rankings {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "roomName")]
        room_name: String,
        slug: String,
        #[serde(rename = "refreshedAt")]
        refreshed_at: Option<DateTime<Utc>>,
        rankings: Vec<OverlayRanking>,
    },
    RoomNotFound {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    Error {
        message: String,
    },
}

/// Compact ranking row; the overlay does not need per-player breakdowns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayRanking {
    pub rank: usize,
    pub name: String,
    pub points: f64,
}

pub fn decode_client_message(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn rankings_message(room: &Room, snapshot: Option<&FeedSnapshot>) -> ServerMessage {
    let rankings = rank_room(room, snapshot)
        .into_iter()
        .map(|ranked| OverlayRanking {
            rank: ranked.rank,
            name: ranked.team.name,
            points: ranked.points,
        })
        .collect();

    ServerMessage::Rankings {
        room_id: room.id.clone(),
        room_name: room.name.clone(),
        slug: room.slug.clone(),
        refreshed_at: snapshot.map(|s| s.refreshed_at),
        rankings,
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub async fn bind(bind_addr: &str, port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(format!("{bind_addr}:{port}")).await?;
    Ok(listener)
}

/// Accept overlay connections forever, one task per connection.
pub async fn run(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("overlay WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => serve_connection(ws, state, addr).await,
                Err(e) => warn!("overlay handshake failed for {addr}: {e}"),
            }
        });
    }
}

async fn serve_connection<S>(ws: WebSocketStream<S>, state: AppState, addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let addr = addr.to_string();
    info!("overlay client connected: {addr}");

    let (write, read) = ws.split();
    let (tx, rx) = mpsc::channel(32);
    let writer = tokio::spawn(forward_outgoing(write, rx));

    let _ = process_message_stream(read, &state, &tx, &addr).await;

    drop(tx);
    if let Err(e) = writer.await {
        error!("overlay writer task for {addr} failed: {e}");
    }
    info!("overlay client disconnected: {addr}");
}

/// Serialise queued messages onto the socket until the queue closes or the
/// socket fails.
async fn forward_outgoing<Si>(mut sink: Si, mut rx: mpsc::Receiver<ServerMessage>)
where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(message) = rx.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                error!("failed to encode overlay message: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            debug!("overlay send failed: {e}");
            break;
        }
    }
    let _ = sink.close().await;
}

// ---------------------------------------------------------------------------
// Connection logic
// ---------------------------------------------------------------------------

struct Subscription {
    room_id: String,
    snapshots: SnapshotReceiver,
}

/// Resolves when the subscribed match publishes a new snapshot. Never
/// resolves without a subscription. Returns false once the poller is gone.
async fn next_snapshot(subscription: &mut Option<Subscription>) -> bool {
    match subscription {
        Some(sub) => sub.snapshots.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

/// Drive one overlay connection: handle client messages from `stream` and
/// push rankings for the current subscription through `tx`.
///
/// Returns `Err(())` if `tx` is closed. Generic over the stream so it can be
/// tested without opening sockets.
pub async fn process_message_stream<St>(
    mut stream: St,
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut subscription: Option<Subscription> = None;

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_client_text(state, text.as_str(), &mut subscription);
                    if let Some(reply) = reply {
                        tx.send(reply).await.map_err(|_| ())?;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("overlay client {addr} sent close frame");
                    break;
                }
                Some(Err(e)) => {
                    warn!("overlay WebSocket error from {addr}: {e}");
                    break;
                }
                None => break,
                Some(Ok(_)) => {
                    // Binary, Ping, Pong, Frame
                }
            },
            alive = next_snapshot(&mut subscription) => {
                if !alive {
                    // Poller stopped; re-subscribing starts a new one.
                    subscription = None;
                    continue;
                }
                if let Some(sub) = subscription.as_mut() {
                    let snapshot = sub.snapshots.borrow_and_update().clone();
                    let message = current_rankings(state, &sub.room_id, snapshot.as_deref());
                    tx.send(message).await.map_err(|_| ())?;
                }
            }
        }
    }
    Ok(())
}

/// Apply one client message. Returns the reply to send, if any.
fn handle_client_text(
    state: &AppState,
    text: &str,
    subscription: &mut Option<Subscription>,
) -> Option<ServerMessage> {
    let message = match decode_client_message(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("undecodable overlay message: {e}");
            return Some(ServerMessage::Error {
                message: format!("invalid message: {e}"),
            });
        }
    };

    match message {
        ClientMessage::Unsubscribe => {
            *subscription = None;
            None
        }
        ClientMessage::Subscribe { room_id } => match state.store.get_room(&room_id) {
            Ok(Some(room)) => {
                let mut snapshots = state.pollers.ensure(&room.slug);
                let snapshot = snapshots.borrow_and_update().clone();
                let reply = rankings_message(&room, snapshot.as_deref());
                *subscription = Some(Subscription { room_id, snapshots });
                Some(reply)
            }
            Ok(None) => {
                *subscription = None;
                Some(ServerMessage::RoomNotFound { room_id })
            }
            Err(e) => {
                warn!("overlay subscribe to {room_id} failed: {e}");
                Some(ServerMessage::Error {
                    message: e.to_string(),
                })
            }
        },
    }
}

/// Re-read the room so newly added teams show up, then rank it.
fn current_rankings(state: &AppState, room_id: &str, snapshot: Option<&FeedSnapshot>) -> ServerMessage {
    match state.store.get_room(room_id) {
        Ok(Some(room)) => rankings_message(&room, snapshot),
        Ok(None) => ServerMessage::RoomNotFound {
            room_id: room_id.to_string(),
        },
        Err(e) => ServerMessage::Error {
            message: e.to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
