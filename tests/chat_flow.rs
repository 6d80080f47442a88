use std::time::Duration;

use backchat::{AppState, auth::TokenVerifier, db};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use serde::Serialize;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use uuid::Uuid;

const SECRET: &str = "integration-secret";

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Serialize)]
struct Claims {
    user_id: Uuid,
    exp: u64,
}

fn token_for(user: &db::User) -> String {
    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    jsonwebtoken::encode(
        &Header::default(),
        &Claims {
            user_id: user.uuid,
            exp,
        },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn spawn_app() -> (String, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_schema(&pool).await.unwrap();

    let verifier = TokenVerifier::new(pool.clone(), SECRET);
    let app = backchat::router(AppState::new(pool.clone(), verifier));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, pool)
}

async fn connect(addr: &str, room: &str, token: &str) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/r/{room}/ws?token={token}"))
        .await
        .unwrap();
    ws
}

async fn send_content(ws: &mut WsClient, content: &str) {
    ws.send(Message::text(
        serde_json::json!({"content": content}).to_string(),
    ))
    .await
    .unwrap();
}

async fn recv_event(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn expect_close(ws: &mut WsClient, code: u16) {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), code);
                return;
            }
            Some(Ok(Message::Close(None))) | None => panic!("closed without a code"),
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("transport error instead of close: {e}"),
        }
    }
}

async fn fetch_history(addr: &str, room: &str) -> Vec<serde_json::Value> {
    reqwest::get(format!("http://{addr}/r/{room}/messages"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn two_users_exchange_messages() {
    let (addr, pool) = spawn_app().await;
    let u1 = db::create_user(&pool, Uuid::now_v7(), "U1").await.unwrap();
    let u2 = db::create_user(&pool, Uuid::now_v7(), "U2").await.unwrap();

    // U2 joins first and proves it is live via its own echo.
    let mut ws2 = connect(&addr, "general", &token_for(&u2)).await;
    send_content(&mut ws2, "ping").await;
    let ping = recv_event(&mut ws2).await;
    assert_eq!(ping["content"], "ping");
    assert_eq!(ping["user"]["username"], "U2");

    let mut ws1 = connect(&addr, "general", &token_for(&u1)).await;
    send_content(&mut ws1, "hi").await;

    // The sender hears its own message back — that is the delivery receipt.
    let echo = recv_event(&mut ws1).await;
    assert_eq!(echo["content"], "hi");
    assert_eq!(echo["user"]["username"], "U1");
    assert_eq!(echo["user"]["id"], u1.uuid.to_string());
    assert!(echo["timestamp"].is_string());

    let relayed = recv_event(&mut ws2).await;
    assert_eq!(relayed["content"], "hi");
    assert_eq!(relayed["user"]["username"], "U1");
    assert_eq!(relayed["id"], echo["id"]);

    let history = fetch_history(&addr, "general").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["content"], "ping");
    assert_eq!(history[1]["content"], "hi");
}

#[tokio::test]
async fn missing_token_is_closed_with_policy_violation() {
    let (addr, _pool) = spawn_app().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/r/general/ws"))
        .await
        .unwrap();
    expect_close(&mut ws, 1008).await;

    // The room was never created: the handshake failed before room setup.
    let response = reqwest::get(format!("http://{addr}/r/general/messages"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn garbage_token_is_closed_with_policy_violation() {
    let (addr, _pool) = spawn_app().await;
    let mut ws = connect(&addr, "general", "garbage").await;
    expect_close(&mut ws, 1008).await;
}

#[tokio::test]
async fn expired_token_is_closed_with_policy_violation() {
    let (addr, pool) = spawn_app().await;
    let user = db::create_user(&pool, Uuid::now_v7(), "late").await.unwrap();

    let token = jsonwebtoken::encode(
        &Header::default(),
        &Claims {
            user_id: user.uuid,
            exp: 1,
        },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    let mut ws = connect(&addr, "general", &token).await;
    expect_close(&mut ws, 1008).await;
}

#[tokio::test]
async fn room_setup_failure_is_closed_with_internal_error() {
    let (addr, pool) = spawn_app().await;
    let user = db::create_user(&pool, Uuid::now_v7(), "ada").await.unwrap();

    // Auth still works, room setup cannot.
    sqlx::query("DROP TABLE rooms").execute(&pool).await.unwrap();

    let mut ws = connect(&addr, "general", &token_for(&user)).await;
    expect_close(&mut ws, 1011).await;
}

#[tokio::test]
async fn invalid_room_name_is_closed_with_policy_violation() {
    let (addr, pool) = spawn_app().await;
    let user = db::create_user(&pool, Uuid::now_v7(), "ada").await.unwrap();

    let mut ws = connect(&addr, "not-a-word", &token_for(&user)).await;
    expect_close(&mut ws, 1008).await;
}

#[tokio::test]
async fn blank_content_is_dropped_silently() {
    let (addr, pool) = spawn_app().await;
    let user = db::create_user(&pool, Uuid::now_v7(), "ada").await.unwrap();

    let mut ws = connect(&addr, "general", &token_for(&user)).await;
    send_content(&mut ws, "").await;
    send_content(&mut ws, "   ").await;
    ws.send(Message::text(r#"{"no_content_at_all":true}"#))
        .await
        .unwrap();
    send_content(&mut ws, "real").await;

    // The only event that ever comes back is the real one.
    let event = recv_event(&mut ws).await;
    assert_eq!(event["content"], "real");

    let history = fetch_history(&addr, "general").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["content"], "real");
}

#[tokio::test]
async fn malformed_frames_do_not_close_the_channel() {
    let (addr, pool) = spawn_app().await;
    let user = db::create_user(&pool, Uuid::now_v7(), "ada").await.unwrap();

    let mut ws = connect(&addr, "general", &token_for(&user)).await;
    ws.send(Message::text("this is not json")).await.unwrap();
    ws.send(Message::text(r#"{"type":"presence","content":"x"}"#))
        .await
        .unwrap();
    send_content(&mut ws, "still here").await;

    let event = recv_event(&mut ws).await;
    assert_eq!(event["content"], "still here");

    let history = fetch_history(&addr, "general").await;
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn rooms_do_not_cross_deliver() {
    let (addr, pool) = spawn_app().await;
    let u1 = db::create_user(&pool, Uuid::now_v7(), "U1").await.unwrap();
    let u2 = db::create_user(&pool, Uuid::now_v7(), "U2").await.unwrap();

    let mut alpha = connect(&addr, "alpha", &token_for(&u1)).await;
    let mut beta = connect(&addr, "beta", &token_for(&u2)).await;

    send_content(&mut alpha, "for alpha").await;
    let alpha_event = recv_event(&mut alpha).await;
    assert_eq!(alpha_event["content"], "for alpha");

    // Beta's next event is its own message, not anything from alpha.
    send_content(&mut beta, "for beta").await;
    let beta_event = recv_event(&mut beta).await;
    assert_eq!(beta_event["content"], "for beta");
    assert_eq!(beta_event["user"]["username"], "U2");

    assert_eq!(fetch_history(&addr, "alpha").await.len(), 1);
    assert_eq!(fetch_history(&addr, "beta").await.len(), 1);
}

#[tokio::test]
async fn per_room_order_is_stable_for_every_member() {
    let (addr, pool) = spawn_app().await;
    let u1 = db::create_user(&pool, Uuid::now_v7(), "U1").await.unwrap();
    let u2 = db::create_user(&pool, Uuid::now_v7(), "U2").await.unwrap();

    let mut ws2 = connect(&addr, "general", &token_for(&u2)).await;
    send_content(&mut ws2, "ready").await;
    recv_event(&mut ws2).await;

    let mut ws1 = connect(&addr, "general", &token_for(&u1)).await;
    for i in 0..5 {
        send_content(&mut ws1, &format!("msg {i}")).await;
    }

    for i in 0..5 {
        let own = recv_event(&mut ws1).await;
        assert_eq!(own["content"], format!("msg {i}"));
        let relayed = recv_event(&mut ws2).await;
        assert_eq!(relayed["content"], format!("msg {i}"));
    }

    let history = fetch_history(&addr, "general").await;
    assert_eq!(history.len(), 6);
    for (i, entry) in history.iter().skip(1).enumerate() {
        assert_eq!(entry["content"], format!("msg {i}"));
    }
}

#[tokio::test]
async fn history_for_unknown_room_is_not_found() {
    let (addr, _pool) = spawn_app().await;
    let response = reqwest::get(format!("http://{addr}/r/nowhere/messages"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn room_creation_endpoint_is_idempotent() {
    let (addr, _pool) = spawn_app().await;
    let client = reqwest::Client::new();

    let first: serde_json::Value = client
        .post(format!("http://{addr}/r/new"))
        .json(&serde_json::json!({"name": "made_up_front"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second: serde_json::Value = client
        .post(format!("http://{addr}/r/new"))
        .json(&serde_json::json!({"name": "made_up_front"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["name"], "made_up_front");

    let bad = client
        .post(format!("http://{addr}/r/new"))
        .json(&serde_json::json!({"name": "not a word"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn disconnected_member_stops_receiving() {
    let (addr, pool) = spawn_app().await;
    let u1 = db::create_user(&pool, Uuid::now_v7(), "U1").await.unwrap();
    let u2 = db::create_user(&pool, Uuid::now_v7(), "U2").await.unwrap();

    let mut stayer = connect(&addr, "general", &token_for(&u1)).await;
    send_content(&mut stayer, "warmup").await;
    recv_event(&mut stayer).await;

    let mut leaver = connect(&addr, "general", &token_for(&u2)).await;
    send_content(&mut leaver, "here then gone").await;
    recv_event(&mut leaver).await;
    recv_event(&mut stayer).await;
    leaver.close(None).await.unwrap();

    // Broadcasts keep flowing to the remaining member once the other side
    // has left; if the leaver's slot leaked, delivery into its dead channel
    // would be attempted and cleaned up without disturbing this send.
    send_content(&mut stayer, "after the exit").await;
    let event = recv_event(&mut stayer).await;
    assert_eq!(event["content"], "after the exit");

    let history = fetch_history(&addr, "general").await;
    assert_eq!(history.len(), 3);
}
