//! Reconnect behavior against a live game server

use std::time::Duration;

use hangman_client::{
    ClientEvent, ClientEventKind, ConnectionStatus, ReadyState, StatusTracker, WsClient,
};

use crate::ws_test_harness::{
    fast_options, next_event, record_events, unused_address, GameServer,
};

#[tokio::test]
async fn test_server_going_away_triggers_reconnect() {
    let server = GameServer::start().await.unwrap();
    let client = WsClient::new(server.url(), fast_options()).unwrap();
    let mut events = record_events(&client);

    client.connect();
    next_event(&mut events, ClientEventKind::Connect, 5000).await.unwrap();
    let first_id = client.id().unwrap();

    server.close_all(1001, "");
    let event = next_event(&mut events, ClientEventKind::Close, 5000).await.unwrap();
    assert_eq!(
        event,
        ClientEvent::Close {
            reason: "Going Away".to_string(),
            code: 1001,
            was_clean: true,
        }
    );

    next_event(&mut events, ClientEventKind::Connecting, 5000).await.unwrap();
    next_event(&mut events, ClientEventKind::Connect, 5000).await.unwrap();

    assert_eq!(server.connections(), 2);
    let second_id = client.id().unwrap();
    assert_ne!(first_id, second_id);
    assert_eq!(server.identities().await, vec![first_id, second_id]);
    assert_eq!(client.reconnect_attempts(), 0);
}

#[tokio::test]
async fn test_normal_closure_from_server_is_final() {
    let server = GameServer::start().await.unwrap();
    let client = WsClient::new(server.url(), fast_options()).unwrap();
    let mut events = record_events(&client);

    client.connect();
    next_event(&mut events, ClientEventKind::Connect, 5000).await.unwrap();

    server.close_all(1000, "Game over");
    let event = next_event(&mut events, ClientEventKind::Close, 5000).await.unwrap();
    assert_eq!(
        event,
        ClientEvent::Close {
            reason: "Game over".to_string(),
            code: 1000,
            was_clean: true,
        }
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.connections(), 1);
    assert!(!client.is_reconnect_pending());
    assert_eq!(client.ready_state(), ReadyState::Closed);
}

#[tokio::test]
async fn test_refused_connection_reports_abnormal_closure() {
    let addr = unused_address().await.unwrap();
    let client = WsClient::new(format!("ws://{}", addr), fast_options()).unwrap();
    let mut events = record_events(&client);

    client.connect();
    let error = next_event(&mut events, ClientEventKind::Error, 5000).await.unwrap();
    assert!(matches!(error, ClientEvent::Error { .. }));
    let event = next_event(&mut events, ClientEventKind::Close, 5000).await.unwrap();
    assert_eq!(
        event,
        ClientEvent::Close {
            reason: "Abnormal Closure".to_string(),
            code: 1006,
            was_clean: false,
        }
    );
    assert!(client.is_reconnect_pending());

    client.shutdown();
    assert!(!client.is_reconnect_pending());
}

#[tokio::test]
async fn test_gives_up_when_server_stays_down() {
    let addr = unused_address().await.unwrap();
    let options = fast_options().with_max_reconnect_attempts(Some(2));
    let client = WsClient::new(format!("ws://{}", addr), options).unwrap();
    let tracker = StatusTracker::attach(&client);
    let mut events = record_events(&client);

    client.connect();
    let mut codes = Vec::new();
    for _ in 0..4 {
        match next_event(&mut events, ClientEventKind::Close, 5000).await.unwrap() {
            ClientEvent::Close { code, .. } => codes.push(code),
            other => panic!("expected close, got {:?}", other),
        }
    }

    assert_eq!(codes, vec![1006, 1006, 1006, 1013]);
    assert_eq!(tracker.status(), ConnectionStatus::Failed);
    assert!(!client.is_reconnect_pending());
    assert_eq!(client.ready_state(), ReadyState::Closed);
}

#[tokio::test]
async fn test_service_restart_reconnects() {
    let server = GameServer::start().await.unwrap();
    let client = WsClient::new(server.url(), fast_options()).unwrap();
    let tracker = StatusTracker::attach(&client);
    let mut events = record_events(&client);

    client.connect();
    next_event(&mut events, ClientEventKind::Connect, 5000).await.unwrap();
    assert_eq!(tracker.status(), ConnectionStatus::Connected);

    server.close_all(1012, "");
    next_event(&mut events, ClientEventKind::Close, 5000).await.unwrap();
    next_event(&mut events, ClientEventKind::Connect, 5000).await.unwrap();
    assert_eq!(tracker.status(), ConnectionStatus::Connected);
    assert_eq!(server.connections(), 2);
}
