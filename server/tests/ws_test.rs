//! End-to-end tests: WebSocket joins, date snapshots, and change-batch fan-out.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use livebox_server::config::Config;
use livebox_server::db::models::GameRow;
use livebox_server::games::GameStore;
use livebox_server::subscriptions::{Registry, SqliteSubscriptions};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    base_url: String,
    /// Second handle on the same database for inspecting subscriptions
    subscriptions: SqliteSubscriptions,
}

/// Helper: start the server on a random port backed by a temp data dir.
async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = livebox_server::db::init_db(&data_dir).expect("Failed to init DB");
    let config = Config::parse_from(["livebox-server", "--data-dir", data_dir.as_str()]);
    let connections = livebox_server::ws::new_connection_registry();
    let state = livebox_server::state::AppState::build(db.clone(), connections, &config)
        .expect("Failed to build state");

    seed_games(state.games.as_ref()).await;

    let app = livebox_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        addr,
        base_url: format!("http://{}", addr),
        subscriptions: SqliteSubscriptions::new(db, 25),
    }
}

async fn seed_games(games: &dyn GameStore) {
    for (id, start) in [("0022300501", "19:30"), ("0022300500", "19:00")] {
        games
            .upsert_game(GameRow {
                id: id.to_string(),
                homescore: Some(0),
                awayscore: Some(0),
                hometeam: "BOS".to_string(),
                awayteam: "NYK".to_string(),
                starttime: Some(start.to_string()),
                clock: None,
                status: Some("Scheduled".to_string()),
                date: "2024-01-15".to_string(),
                homerecord: Some("30-10".to_string()),
                awayrecord: Some("25-15".to_string()),
            })
            .await
            .unwrap();
    }
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

async fn send_json(ws: &mut WsStream, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Wait for the next text frame and parse it as JSON.
async fn next_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Poll until the connection count for `entity_key` reaches `expected`.
async fn wait_for_subscribers(
    store: &SqliteSubscriptions,
    registry: Registry,
    entity_key: &str,
    expected: usize,
) {
    for _ in 0..50 {
        if store.subscriber_count(registry, entity_key).await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "{} {} never reached {} subscribers",
        registry, entity_key, expected
    );
}

async fn post_changes(base_url: &str, records: serde_json::Value) -> serde_json::Value {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/changes", base_url))
        .json(&json!({ "records": records }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let server = start_test_server().await;
    let resp = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_join_date_replies_with_snapshot() {
    let server = start_test_server().await;
    let mut ws = connect(server.addr).await;

    // Front end subscribes with the follow* action names
    send_json(&mut ws, json!({ "action": "followDate", "date": "2024-01-15" })).await;
    let snapshot = next_json(&mut ws).await;

    assert_eq!(snapshot["type"], "date");
    let games = snapshot["data"].as_array().unwrap();
    assert_eq!(games.len(), 2);
    assert_eq!(games[0]["id"], "0022300500");
    assert_eq!(games[1]["id"], "0022300501");
    assert_eq!(games[0]["hometeam"], "BOS");
    assert_eq!(games[0]["homerecord"], "30-10");

    wait_for_subscribers(&server.subscriptions, Registry::Date, "2024-01-15", 1).await;
}

#[tokio::test]
async fn test_join_date_with_no_games_sends_empty_snapshot() {
    let server = start_test_server().await;
    let mut ws = connect(server.addr).await;

    send_json(&mut ws, json!({ "action": "joinDate", "date": "2024-02-01" })).await;
    let snapshot = next_json(&mut ws).await;

    assert_eq!(snapshot, json!({ "type": "date", "data": [] }));
}

#[tokio::test]
async fn test_invalid_date_gets_error_reply() {
    let server = start_test_server().await;
    let mut ws = connect(server.addr).await;

    send_json(&mut ws, json!({ "action": "joinDate", "date": "2024-13-45" })).await;
    let reply = next_json(&mut ws).await;

    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("date"));
    wait_for_subscribers(&server.subscriptions, Registry::Date, "2024-13-45", 0).await;
}

#[tokio::test]
async fn test_malformed_frame_gets_error_reply() {
    let server = start_test_server().await;
    let mut ws = connect(server.addr).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    let reply = next_json(&mut ws).await;

    assert_eq!(reply["type"], "error");
}

#[tokio::test]
async fn test_schedule_change_pushes_date_update() {
    let server = start_test_server().await;
    let mut ws = connect(server.addr).await;

    send_json(&mut ws, json!({ "action": "joinDate", "date": "2024-01-15" })).await;
    let _snapshot = next_json(&mut ws).await;

    let report = post_changes(
        &server.base_url,
        json!([{ "path": "schedule/2024-01-15.json.gz", "versionMarker": "\"abc\"" }]),
    )
    .await;

    let update = next_json(&mut ws).await;
    assert_eq!(update, json!({ "type": "date_update", "date": "2024-01-15" }));

    assert_eq!(report["events"][0]["registry"], "date");
    assert_eq!(report["events"][0]["entity_key"], "2024-01-15");
    assert_eq!(report["events"][0]["delivered"], 1);
}

#[tokio::test]
async fn test_game_change_pushes_game_payload() {
    let server = start_test_server().await;
    let mut ws = connect(server.addr).await;

    send_json(&mut ws, json!({ "action": "followGame", "gameId": "0022300500" })).await;
    wait_for_subscribers(&server.subscriptions, Registry::Game, "0022300500", 1).await;

    post_changes(
        &server.base_url,
        json!([{ "path": "data/gamepack/0022300500.json", "versionMarker": "\"etag-7\"" }]),
    )
    .await;

    let update = next_json(&mut ws).await;
    assert_eq!(
        update,
        json!({
            "gameId": "0022300500",
            "key": "data/gamepack/0022300500.json",
            "version": "etag-7"
        })
    );
}

#[tokio::test]
async fn test_change_feed_row_notifies_date_subscribers() {
    let server = start_test_server().await;
    let mut ws = connect(server.addr).await;

    send_json(&mut ws, json!({ "action": "joinDate", "date": "2024-01-15" })).await;
    let _snapshot = next_json(&mut ws).await;

    post_changes(
        &server.base_url,
        json!([
            { "eventName": "MODIFY", "newImage": { "date": "2024-01-15" } },
            { "eventName": "REMOVE", "newImage": { "date": "2024-01-15" } }
        ]),
    )
    .await;

    let update = next_json(&mut ws).await;
    assert_eq!(update["type"], "date_update");
    let extra = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(extra.is_err(), "Expected a single update for the date");
}

#[tokio::test]
async fn test_unfollow_game_stops_updates() {
    let server = start_test_server().await;
    let mut ws = connect(server.addr).await;

    send_json(&mut ws, json!({ "action": "joinGame", "gameId": "g1" })).await;
    wait_for_subscribers(&server.subscriptions, Registry::Game, "g1", 1).await;
    send_json(&mut ws, json!({ "action": "unfollowGame" })).await;
    wait_for_subscribers(&server.subscriptions, Registry::Game, "g1", 0).await;

    let report = post_changes(
        &server.base_url,
        json!([{ "path": "data/gameStats/g1.json", "versionMarker": "v" }]),
    )
    .await;

    assert_eq!(report["events"][0]["attempted"], 0);
}

#[tokio::test]
async fn test_disconnect_removes_subscriptions() {
    let server = start_test_server().await;
    let mut ws = connect(server.addr).await;

    send_json(&mut ws, json!({ "action": "joinGame", "gameId": "g1" })).await;
    send_json(&mut ws, json!({ "action": "joinDate", "date": "2024-01-15" })).await;
    let _snapshot = next_json(&mut ws).await;
    wait_for_subscribers(&server.subscriptions, Registry::Game, "g1", 1).await;

    ws.close(None).await.unwrap();

    wait_for_subscribers(&server.subscriptions, Registry::Game, "g1", 0).await;
    wait_for_subscribers(&server.subscriptions, Registry::Date, "2024-01-15", 0).await;
}

#[tokio::test]
async fn test_unmatched_records_report_no_events() {
    let server = start_test_server().await;

    let report = post_changes(
        &server.base_url,
        json!([{ "path": "logs/today.txt", "versionMarker": "x" }]),
    )
    .await;

    assert_eq!(report, json!({ "events": [] }));
}

#[tokio::test]
async fn test_malformed_record_does_not_drop_its_batch() {
    let server = start_test_server().await;
    let mut ws = connect(server.addr).await;

    send_json(&mut ws, json!({ "action": "joinDate", "date": "2024-01-15" })).await;
    let _snapshot = next_json(&mut ws).await;

    let report = post_changes(
        &server.base_url,
        json!([
            { "eventName": "MODIFY", "newImage": { "date": { "N": "20240115" } } },
            { "path": 123 },
            {},
            { "path": "schedule/2024-01-15.json", "versionMarker": "\"v\"" }
        ]),
    )
    .await;

    let update = next_json(&mut ws).await;
    assert_eq!(update, json!({ "type": "date_update", "date": "2024-01-15" }));
    assert_eq!(report["events"].as_array().unwrap().len(), 1);
    assert_eq!(report["events"][0]["delivered"], 1);
}
