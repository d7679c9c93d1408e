mod common;

use chain_session_sdk::{ConnectionEvent, ConnectionState, SdkError, Transport, TxOptions};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_failover_exhaustion_counts_every_open() {
    init_tracing();
    let connector = MockConnector::new();
    for url in ["ws://a", "ws://b", "ws://c"] {
        connector.set(url, Behavior::Fail);
    }
    let client = client(&connector, &["ws://a", "ws://b", "ws://c"], 2);

    let err = client.connect().await.unwrap_err();
    match &err {
        SdkError::NoEndpointReachable { attempts, last } => {
            assert_eq!(*attempts, 9);
            assert!(matches!(**last, SdkError::Connection(_)));
        }
        other => panic!("unexpected error {:?}", other),
    }

    assert_eq!(connector.opens().len(), 9);
    let status = client.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.reconnect_attempts, 9);
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_round_delay_skipped_after_final_round() {
    let connector = MockConnector::new();
    connector.set("ws://a", Behavior::Fail);
    let client = client(&connector, &["ws://a"], 2);

    let started = Instant::now();
    client.connect().await.unwrap_err();
    // Two inter-round delays of 50ms, none after the last round
    assert_eq!(started.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_each_open_respects_timeout() {
    let connector = MockConnector::new();
    connector.set("ws://a", Behavior::Hang);
    connector.set("ws://b", Behavior::Hang);
    let client = client(&connector, &["ws://a", "ws://b"], 1);

    let started = Instant::now();
    let err = client.connect().await.unwrap_err();

    // 4 opens of 100ms each plus one 50ms round delay
    assert_eq!(started.elapsed(), Duration::from_millis(450));
    assert_eq!(connector.opens().len(), 4);
    assert!(matches!(
        err.root_cause(),
        SdkError::ConnectionTimeout(d) if *d == Duration::from_millis(100)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_fails_over_to_second_endpoint() {
    let connector = MockConnector::new();
    connector.set("ws://x", Behavior::Fail);
    connector.set("ws://y", Behavior::SucceedAfter(Duration::from_millis(50)));
    let client = client(&connector, &["ws://x", "ws://y"], 3);

    let session = client.connect().await.unwrap();

    assert_eq!(session.endpoint().url(), "ws://y");
    assert_eq!(session.chain().chain, "Testnet");
    assert_eq!(session.chain().token_decimals(), Some(12));
    let status = client.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.endpoint.as_deref(), Some("ws://y"));
    assert_eq!(status.reconnect_attempts, 0);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_endpoint_is_skipped_after_timeout() {
    let connector = MockConnector::new();
    connector.set("ws://a", Behavior::Hang);
    let client = client(&connector, &["ws://a", "ws://b"], 0);

    let started = Instant::now();
    let session = client.connect().await.unwrap();
    assert_eq!(session.endpoint().url(), "ws://b");
    assert_eq!(started.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_attempt() {
    let connector = MockConnector::new();
    connector.set("ws://a", Behavior::SucceedAfter(Duration::from_millis(50)));
    let client = client(&connector, &["ws://a"], 0);

    let (first, second) = tokio::join!(client.connect(), client.connect());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.id(), second.id());
    assert_eq!(connector.opens(), vec!["ws://a".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_failure() {
    let connector = MockConnector::new();
    connector.set("ws://a", Behavior::Fail);
    connector.set("ws://b", Behavior::Fail);
    let client = client(&connector, &["ws://a", "ws://b"], 1);

    let (first, second) = tokio::join!(client.connect(), client.connect());

    assert!(matches!(first, Err(SdkError::NoEndpointReachable { attempts: 4, .. })));
    assert!(matches!(second, Err(SdkError::NoEndpointReachable { attempts: 4, .. })));
    assert_eq!(connector.opens().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_connect_returns_live_session() {
    let connector = MockConnector::new();
    let client = client(&connector, &["ws://a"], 0);

    let first = client.connect().await.unwrap();
    let second = client.connect().await.unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(connector.opens().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_rotates_failed_endpoint_last() {
    init_tracing();
    let connector = MockConnector::new();
    let client = client(&connector, &["ws://a", "ws://b", "ws://c"], 0);
    let mut events = client.subscribe_events();

    client.connect().await.unwrap();
    assert!(matches!(next_event(&mut events).await, ConnectionEvent::Connected { .. }));

    connector.set("ws://b", Behavior::Fail);
    connector.set("ws://c", Behavior::Fail);
    connector.transport("ws://a").drop_connection();

    match next_event(&mut events).await {
        ConnectionEvent::Disconnected { endpoint } => assert_eq!(endpoint, "ws://a"),
        other => panic!("unexpected event {:?}", other),
    }
    match next_event(&mut events).await {
        ConnectionEvent::Connected { endpoint, .. } => assert_eq!(endpoint, "ws://a"),
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(connector.opens(), vec!["ws://a", "ws://b", "ws://c", "ws://a"]);
    assert!(client.is_connected());
    assert_eq!(client.status().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_waits_settle_delay() {
    let connector = MockConnector::new();
    let client = client(&connector, &["ws://a", "ws://b"], 0);
    let mut events = client.subscribe_events();
    client.connect().await.unwrap();
    next_event(&mut events).await;

    let dropped_at = Instant::now();
    connector.transport("ws://a").drop_connection();
    next_event(&mut events).await;

    match next_event(&mut events).await {
        ConnectionEvent::Connected { endpoint, .. } => assert_eq!(endpoint, "ws://b"),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(dropped_at.elapsed() >= Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_refreshes_chain_info() {
    let connector = MockConnector::new();
    let client = client(&connector, &["ws://a", "ws://b"], 0);
    let mut events = client.subscribe_events();

    let before = client.connect().await.unwrap();
    assert_eq!(before.runtime().spec_version, 100);
    next_event(&mut events).await;

    connector.set_spec_version(101);
    connector.transport("ws://a").drop_connection();
    next_event(&mut events).await;
    next_event(&mut events).await;

    let after = client.session().unwrap();
    assert_ne!(after.id(), before.id());
    assert_eq!(after.runtime().spec_version, 101);
    assert!(!before.is_live());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_failure_is_reported() {
    let connector = MockConnector::new();
    let client = client(&connector, &["ws://a", "ws://b"], 1);
    let mut events = client.subscribe_events();
    client.connect().await.unwrap();
    next_event(&mut events).await;

    connector.set("ws://a", Behavior::Fail);
    connector.set("ws://b", Behavior::Fail);
    connector.transport("ws://a").drop_connection();

    assert!(matches!(next_event(&mut events).await, ConnectionEvent::Disconnected { .. }));
    match next_event(&mut events).await {
        ConnectionEvent::ReconnectFailed { error } => {
            assert!(matches!(error, SdkError::NoEndpointReachable { attempts: 4, .. }));
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(client.status().state, ConnectionState::Disconnected);
    assert!(!client.is_connected());

    // No further attempts until the next call
    let opens = connector.opens().len();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.opens().len(), opens);
}

#[tokio::test(start_paused = true)]
async fn test_next_call_reconnects_after_failed_recovery() {
    let connector = MockConnector::new();
    let client = client(&connector, &["ws://a"], 0);
    let mut events = client.subscribe_events();
    client.connect().await.unwrap();
    next_event(&mut events).await;

    connector.set("ws://a", Behavior::Fail);
    connector.transport("ws://a").drop_connection();
    next_event(&mut events).await;
    assert!(matches!(next_event(&mut events).await, ConnectionEvent::ReconnectFailed { .. }));

    connector.set("ws://a", Behavior::SucceedAfter(Duration::ZERO));
    let result = client
        .execute(&TestCall::transfer(), &TestSigner::new(), TxOptions::default())
        .await
        .unwrap();

    assert!(result.success);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_close_suppresses_reconnection() {
    let connector = MockConnector::new();
    let client = client(&connector, &["ws://a", "ws://b"], 0);
    let mut events = client.subscribe_events();
    client.connect().await.unwrap();
    next_event(&mut events).await;

    client.close().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(connector.opens().len(), 1);
    assert!(!client.is_connected());
    assert!(events.try_recv().is_err());

    let err = client
        .execute(&TestCall::transfer(), &TestSigner::new(), TxOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::NotConnected));
    assert!(matches!(client.reconnect().await, Err(SdkError::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_moves_to_next_endpoint() {
    let connector = MockConnector::new();
    let client = client(&connector, &["ws://a", "ws://b"], 0);

    let first = client.connect().await.unwrap();
    assert_eq!(first.endpoint().url(), "ws://a");

    let second = client.reconnect().await.unwrap();
    assert_eq!(second.endpoint().url(), "ws://b");
    assert!(!first.is_live());
    assert_eq!(client.status().endpoint.as_deref(), Some("ws://b"));

    // The replaced session's disconnect must not trigger recovery
    settle().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(connector.opens(), vec!["ws://a", "ws://b"]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_while_connecting_is_rejected() {
    let connector = MockConnector::new();
    connector.set("ws://a", Behavior::SucceedAfter(Duration::from_millis(50)));
    let client = Arc::new(client(&connector, &["ws://a"], 0));

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.connect().await })
    };
    settle().await;

    assert!(matches!(client.reconnect().await, Err(SdkError::AlreadyConnecting)));
    assert_eq!(client.status().state, ConnectionState::Connecting);

    pending.await.unwrap().unwrap();
    assert_eq!(connector.opens().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_during_settle_delay_is_kept() {
    let connector = MockConnector::new();
    let client = client(&connector, &["ws://a", "ws://b"], 0);
    let mut events = client.subscribe_events();
    client.connect().await.unwrap();
    next_event(&mut events).await;

    connector.transport("ws://a").drop_connection();
    assert!(matches!(next_event(&mut events).await, ConnectionEvent::Disconnected { .. }));

    // Still inside the 50ms settle delay
    tokio::time::sleep(Duration::from_millis(20)).await;
    let restored = client.connect().await.unwrap();
    assert_eq!(restored.endpoint().url(), "ws://b");

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(connector.opens(), vec!["ws://a", "ws://b"]);
    assert!(restored.is_live());
    assert_eq!(client.session().unwrap().id(), restored.id());
    assert!(matches!(next_event(&mut events).await, ConnectionEvent::Connected { .. }));
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_client_disconnects_session() {
    let connector = MockConnector::new();
    let client = client(&connector, &["ws://a"], 0);
    client.connect().await.unwrap();
    let transport = connector.transport("ws://a");
    assert!(transport.is_connected());

    drop(client);
    settle().await;

    assert!(!transport.is_connected());
    assert_eq!(connector.opens().len(), 1);
}
