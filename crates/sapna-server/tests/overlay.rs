// Overlay WebSocket tests: the connection logic over in-memory streams, plus
// one round trip through a real socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::{stream, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use sapna_core::db::RoomStore;
use sapna_core::model::{LeaderboardPlayer, MatchPlayer, NewRoom, Team, UpcomingMatch};
use sapna_feed::protocol::MiniScorecard;
use sapna_feed::{FeedError, FeedResult, MatchFeed, PollOptions};
use sapna_server::overlay::{self, process_message_stream, ServerMessage};
use sapna_server::AppState;

struct OnePlayerFeed;

#[async_trait]
impl MatchFeed for OnePlayerFeed {
    async fn fetch_match_players(&self, _slug: &str) -> FeedResult<Vec<MatchPlayer>> {
        Ok(vec![])
    }

    async fn fetch_leaderboard(&self, _slug: &str) -> FeedResult<Vec<LeaderboardPlayer>> {
        Ok(vec![LeaderboardPlayer {
            pid: "1".into(),
            name: "A".into(),
            raw_points: "12.5".into(),
            ..Default::default()
        }])
    }

    async fn fetch_scorecard(&self, _slug: &str) -> FeedResult<MiniScorecard> {
        Err(FeedError::Unsuccessful { url: "test".into() })
    }

    async fn fetch_upcoming_matches(&self) -> FeedResult<Vec<UpcomingMatch>> {
        Ok(vec![])
    }
}

/// State with one open room holding a single team captained by "A".
fn state_with_room() -> (AppState, String) {
    let store = RoomStore::open(":memory:").unwrap();
    let now = Utc::now();
    let room = store
        .create_room(&NewRoom {
            name: "Office league".into(),
            slug: "nz-vs-ban".into(),
            start_time: now,
            end_time: now + ChronoDuration::hours(1),
        })
        .unwrap();

    let mut players = vec!["A".to_string(), "B".to_string()];
    players.extend((0..9).map(|i| format!("bench {i}")));
    store
        .add_team(
            &room.id,
            &Team {
                name: "Kiwis".into(),
                captain: "A".into(),
                vice_captain: "B".into(),
                players,
            },
            now,
        )
        .unwrap();

    let state = AppState::new(store, Arc::new(OnePlayerFeed), PollOptions::default());
    (state, room.id)
}

/// Run the connection logic over `messages` followed by an idle client.
fn spawn_connection(state: AppState, messages: Vec<&str>) -> mpsc::Receiver<ServerMessage> {
    let items: Vec<Result<Message, WsError>> = messages
        .into_iter()
        .map(|m| Ok(Message::Text(m.to_string().into())))
        .collect();
    let input = stream::iter(items).chain(stream::pending());
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let _ = process_message_stream(input, &state, &tx, "test").await;
    });
    rx
}

async fn recv(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for overlay message")
        .expect("overlay connection ended")
}

#[tokio::test]
async fn unknown_room_is_reported_distinctly() {
    let (state, _) = state_with_room();
    let mut rx = spawn_connection(state, vec![r#"{"type":"subscribe","roomId":"missing"}"#]);

    assert_eq!(
        recv(&mut rx).await,
        ServerMessage::RoomNotFound {
            room_id: "missing".into()
        }
    );
}

#[tokio::test]
async fn malformed_message_gets_error_reply() {
    let (state, _) = state_with_room();
    let mut rx = spawn_connection(state, vec!["{not json"]);

    assert!(matches!(recv(&mut rx).await, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn subscriber_receives_scored_rankings() {
    let (state, room_id) = state_with_room();
    let subscribe = format!(r#"{{"type":"subscribe","roomId":"{room_id}"}}"#);
    let mut rx = spawn_connection(state, vec![subscribe.as_str()]);

    // The first reply may predate the first leaderboard fetch; keep reading
    // until the scored push arrives.
    loop {
        let ServerMessage::Rankings {
            room_id: got,
            refreshed_at,
            rankings,
            ..
        } = recv(&mut rx).await
        else {
            panic!("expected rankings");
        };
        assert_eq!(got, room_id);
        assert_eq!(rankings.len(), 1);
        assert_eq!(rankings[0].name, "Kiwis");
        if refreshed_at.is_some() {
            assert_eq!(rankings[0].points, 25.0);
            break;
        }
        assert_eq!(rankings[0].points, 0.0);
    }
}

#[tokio::test]
async fn close_frame_ends_connection() {
    let (state, _) = state_with_room();
    let input = stream::iter(vec![
        Ok(Message::Close(None)),
        Ok(Message::Text(r#"{"type":"subscribe","roomId":"x"}"#.into())),
    ]);
    let (tx, mut rx) = mpsc::channel(16);

    process_message_stream(input, &state, &tx, "test").await.unwrap();
    drop(tx);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn round_trip_over_socket() {
    let (state, room_id) = state_with_room();
    let listener = overlay::bind("127.0.0.1", 0).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(overlay::run(listener, state));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    ws.send(Message::Text(
        format!(r#"{{"type":"subscribe","roomId":"{room_id}"}}"#).into(),
    ))
    .await
    .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = match reply {
        Message::Text(text) => text,
        other => panic!("expected a text frame, got {other:?}"),
    };
    let json: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(json["type"], "rankings");
    assert_eq!(json["roomId"], room_id.as_str());
    assert_eq!(json["rankings"][0]["name"], "Kiwis");
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_lets_match_poller_go_idle() {
    let (state, room_id) = state_with_room();
    let (client_tx, client_rx) = mpsc::channel::<Result<Message, WsError>>(4);
    let input = stream::unfold(client_rx, |mut rx| async move {
        rx.recv().await.map(|message| (message, rx))
    });
    let (tx, mut rx) = mpsc::channel(64);
    let connection_state = state.clone();
    tokio::spawn(async move {
        let _ = process_message_stream(Box::pin(input), &connection_state, &tx, "test").await;
    });

    client_tx
        .send(Ok(Message::Text(
            format!(r#"{{"type":"subscribe","roomId":"{room_id}"}}"#).into(),
        )))
        .await
        .unwrap();
    recv(&mut rx).await;

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(state.pollers.active_slugs(), vec!["nz-vs-ban"]);

    client_tx
        .send(Ok(Message::Text(r#"{"type":"unsubscribe"}"#.into())))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(state.pollers.active_slugs().is_empty());
}
