/// Integration test: run the server on loopback and follow a room over a
/// real WebSocket while posting and voting through HTTP.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use ripple_api::identity::{IdentityPool, TokenService};
use ripple_api::rate_limit::RateLimiter;
use ripple_api::{AppStateInner, RoomCoordinator, router};
use ripple_db::Database;
use ripple_gateway::Dispatcher;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, Arc<RoomCoordinator>) {
    let coordinator = Arc::new(RoomCoordinator::new(
        Arc::new(Database::open_in_memory().unwrap()),
        IdentityPool::default(),
        TokenService::new("live-test-secret"),
        RateLimiter::default(),
        Dispatcher::new(),
        ChronoDuration::hours(1),
    ));
    let app = router(Arc::new(AppStateInner {
        coordinator: coordinator.clone(),
        secure_cookies: false,
    }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, coordinator)
}

/// Next JSON event, skipping heartbeat frames.
async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn next_close_code(socket: &mut Socket) -> u16 {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for close")
            .expect("socket ended without a close frame")
            .unwrap();
        match frame {
            Message::Close(Some(close)) => return u16::from(close.code),
            Message::Close(None) => panic!("close frame without a code"),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn live_room_sees_posts_and_votes() {
    let (addr, _coordinator) = spawn_server().await;
    let http = reqwest::Client::new();
    let base = format!("http://{addr}");

    let created: Value = http
        .post(format!("{base}/api/rooms"))
        .json(&json!({"topic": "live"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let room_id = created["room"]["id"].as_str().unwrap().to_string();
    let token = created["session_token"].as_str().unwrap().to_string();

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/rooms/{room_id}/ws?token={token}"))
        .await
        .unwrap();

    let joined = next_event(&mut socket).await;
    assert_eq!(joined["type"], "participant_joined");
    assert_eq!(joined["data"]["anonymous_id"], created["anonymous_id"]);
    assert_eq!(joined["data"]["participant_count"], 1);

    let post: Value = http
        .post(format!("{base}/api/rooms/{room_id}/posts"))
        .bearer_auth(&token)
        .json(&json!({"content": "hello live"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let event = next_event(&mut socket).await;
    assert_eq!(event["type"], "new_post");
    assert_eq!(event["data"]["id"], post["id"]);
    assert_eq!(event["data"]["content"], "hello live");

    let post_id = post["id"].as_str().unwrap();
    let response = http
        .post(format!("{base}/api/posts/{post_id}/vote"))
        .bearer_auth(&token)
        .json(&json!({"vote_type": "up"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let event = next_event(&mut socket).await;
    assert_eq!(event["type"], "new_vote");
    assert_eq!(event["data"]["new_score"], 1);
}

#[tokio::test]
async fn unknown_room_closes_with_4004() {
    let (addr, _coordinator) = spawn_server().await;
    let room_id = uuid::Uuid::new_v4();

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/rooms/{room_id}/ws"))
        .await
        .unwrap();
    assert_eq!(next_close_code(&mut socket).await, 4004);
}

#[tokio::test]
async fn closed_room_disconnects_followers() {
    let (addr, coordinator) = spawn_server().await;
    let (room, _grant) = coordinator
        .create_room(None, ChronoDuration::hours(1), 5)
        .unwrap();

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/rooms/{}/ws", room.id))
        .await
        .unwrap();
    assert_eq!(next_event(&mut socket).await["type"], "participant_joined");

    coordinator.close_room(room.id).await.unwrap();

    let expired = next_event(&mut socket).await;
    assert_eq!(expired["type"], "room_expired");
    assert_eq!(expired["data"]["room_id"], room.id.to_string());
    assert_eq!(next_close_code(&mut socket).await, 1000);

    // The room no longer admits anyone
    let (mut late, _) = connect_async(format!("ws://{addr}/api/rooms/{}/ws", room.id))
        .await
        .unwrap();
    assert_eq!(next_close_code(&mut late).await, 4003);
}
