//! Connection lifecycle against a live game server

use std::time::Duration;

use serde_json::json;

use hangman_client::{channels, ClientEvent, ClientEventKind, ReadyState, WsClient};

use crate::ws_test_harness::{fast_options, next_event, record_events, GameServer};

#[tokio::test]
async fn test_connect_assigns_server_identity() {
    let server = GameServer::start().await.unwrap();
    let client = WsClient::new(server.url(), fast_options()).unwrap();
    let mut events = record_events(&client);

    client.connect();
    next_event(&mut events, ClientEventKind::Connecting, 1000).await.unwrap();
    next_event(&mut events, ClientEventKind::Connect, 5000).await.unwrap();

    let identities = server.identities().await;
    assert_eq!(identities.len(), 1);
    assert_eq!(client.id(), Some(identities[0].clone()));
    assert_eq!(client.ready_state(), ReadyState::Open);

    client.shutdown();
}

#[tokio::test]
async fn test_start_connects_eagerly() {
    let server = GameServer::start().await.unwrap();
    let client = WsClient::start(server.url(), fast_options()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), client.wait_for_connect())
        .await
        .unwrap()
        .unwrap();
    assert!(client.id().is_some());
}

#[tokio::test]
async fn test_sent_frames_reach_server() {
    let server = GameServer::start().await.unwrap();
    let client = WsClient::start(server.url(), fast_options()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), client.wait_for_connect())
        .await
        .unwrap()
        .unwrap();
    let id = client.id().unwrap();

    client.send(channels::FIND, "abc").unwrap();
    client
        .send(&channels::chat("g1"), &json!({"text": "hello"}))
        .unwrap();
    client.send_empty(&channels::leave("g1"));

    let messages = server.wait_for_messages(3, 5000).await.unwrap();
    assert_eq!(
        messages,
        vec![
            json!(["game/find", id, "abc"]).to_string(),
            json!(["game/g1/chat", id, {"text": "hello"}]).to_string(),
            json!(["game/g1/leave", id]).to_string(),
        ]
    );
}

#[tokio::test]
async fn test_server_frames_become_messages() {
    let server = GameServer::start().await.unwrap();
    let client = WsClient::new(server.url(), fast_options()).unwrap();
    let mut events = record_events(&client);

    client.connect();
    next_event(&mut events, ClientEventKind::Connect, 5000).await.unwrap();

    server.broadcast(r#"["game/connect","server",{"gameId":"g1","word":"____"}]"#);
    let event = next_event(&mut events, ClientEventKind::Message, 5000).await.unwrap();
    assert_eq!(
        event,
        ClientEvent::Message {
            channel: "game/connect".to_string(),
            sender: Some("server".to_string()),
            payload: Some(json!({"gameId": "g1", "word": "____"})),
        }
    );
}

#[tokio::test]
async fn test_heartbeat_reaches_server() {
    let server = GameServer::start().await.unwrap();
    let options = fast_options().with_ping_interval(Duration::from_millis(50));
    let client = WsClient::start(server.url(), options).unwrap();
    tokio::time::timeout(Duration::from_secs(5), client.wait_for_connect())
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(server.heartbeats().await >= 2);
    assert!(server.messages().await.is_empty());
}

#[tokio::test]
async fn test_client_close_completes_handshake() {
    let server = GameServer::start().await.unwrap();
    let client = WsClient::new(server.url(), fast_options()).unwrap();
    let mut events = record_events(&client);

    client.connect();
    next_event(&mut events, ClientEventKind::Connect, 5000).await.unwrap();

    client.close();
    let event = next_event(&mut events, ClientEventKind::Close, 5000).await.unwrap();
    assert_eq!(
        event,
        ClientEvent::Close {
            reason: "Normal Closure".to_string(),
            code: 1000,
            was_clean: true,
        }
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connections(), 1);
    assert_eq!(client.ready_state(), ReadyState::Closed);
}

#[tokio::test]
async fn test_send_while_closed_is_dropped() {
    let server = GameServer::start().await.unwrap();
    let client = WsClient::new(server.url(), fast_options()).unwrap();
    let mut events = record_events(&client);

    client.send(channels::FIND, &json!({})).unwrap();
    let event = next_event(&mut events, ClientEventKind::Error, 1000).await.unwrap();
    assert!(matches!(event, ClientEvent::Error { .. }));

    client.connect();
    next_event(&mut events, ClientEventKind::Connect, 5000).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.messages().await.is_empty());
}

#[tokio::test]
async fn test_without_identity_stays_connecting() {
    let server = GameServer::start_silent().await.unwrap();
    let client = WsClient::start(server.url(), fast_options()).unwrap();

    server.wait_for_connections(1, 5000).await.unwrap();
    let waited = tokio::time::timeout(Duration::from_millis(300), client.wait_for_connect()).await;
    assert!(waited.is_err());
    assert_eq!(client.ready_state(), ReadyState::Connecting);
    assert_eq!(client.id(), None);

    client.send(channels::FIND, "abc").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.messages().await.is_empty());
}
