#![allow(missing_docs)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analysis_notifier::{
    ConnectionManager, ConnectionState, NotificationRouter, PushConnector, ReconnectPolicy,
    TransportError,
};

use common::{ScriptedConnector, Step, completion_frame};

fn manager_for(connector: &Arc<ScriptedConnector>) -> (ConnectionManager, Arc<NotificationRouter>) {
    let router = Arc::new(NotificationRouter::default());
    let connector: Arc<dyn PushConnector> = Arc::clone(connector) as Arc<dyn PushConnector>;
    let manager = ConnectionManager::new(connector, Arc::clone(&router), ReconnectPolicy::default());
    (manager, router)
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_double_then_stop_at_budget() {
    let connector = ScriptedConnector::always_failing();
    let (manager, _router) = manager_for(&connector);
    let mut status = manager.watch();

    manager.open();
    let snapshot = *tokio::time::timeout(
        Duration::from_secs(300),
        status.wait_for(|snapshot| snapshot.exhausted),
    )
    .await
    .expect("exhausted before deadline")
    .expect("status channel open");

    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.reconnect_attempts, 5);
    assert_eq!(connector.connect_count(), 6);
    assert_eq!(
        connector.connect_gaps_ms(),
        vec![2_000, 4_000, 8_000, 16_000, 30_000]
    );

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.connect_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn successful_connect_resets_the_counter() {
    let connector =
        ScriptedConnector::scripted([Step::Fail, Step::Fail, Step::Fail, Step::Accept]);
    let (manager, _router) = manager_for(&connector);
    let mut status = manager.watch();

    manager.open();
    let before_success = *tokio::time::timeout(
        Duration::from_secs(60),
        status.wait_for(|snapshot| snapshot.reconnect_attempts == 3),
    )
    .await
    .expect("three failures recorded")
    .expect("status channel open");
    assert_eq!(before_success.state, ConnectionState::Disconnected);

    assert!(manager.wait_until_connected(Duration::from_secs(60)).await);
    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(connector.connect_count(), 4);
    assert_eq!(connector.connect_gaps_ms(), vec![2_000, 4_000, 8_000]);

    drop(connector.take_latest_channel());
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(connector.connect_count(), 5);
    assert_eq!(connector.connect_gaps_ms(), vec![2_000, 4_000, 8_000, 2_000]);
}

#[tokio::test(start_paused = true)]
async fn stream_error_counts_as_a_drop() {
    let connector = ScriptedConnector::scripted([Step::Accept, Step::Accept]);
    let (manager, _router) = manager_for(&connector);

    manager.open();
    assert!(manager.wait_until_connected(Duration::from_secs(5)).await);
    connector
        .take_latest_channel()
        .send(Err(TransportError::Closed))
        .expect("send close");

    let mut status = manager.watch();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|snapshot| snapshot.state != ConnectionState::Connected),
    )
    .await
    .expect("drop observed")
    .expect("status channel open");
    assert!(manager.wait_until_connected(Duration::from_secs(5)).await);
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(connector.connect_gaps_ms(), vec![2_000]);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_keep_connection_and_fire_nothing() {
    let connector = ScriptedConnector::scripted([Step::Accept]);
    let (manager, router) = manager_for(&connector);
    let calls = Arc::new(AtomicUsize::new(0));
    let delivered = Arc::new(Mutex::new(None));
    let counter = Arc::clone(&calls);
    let sink = Arc::clone(&delivered);
    router
        .register_once("p-1", move |notification| {
            counter.fetch_add(1, Ordering::SeqCst);
            *sink.lock().expect("sink lock") = Some(notification.issues_found);
        })
        .expect("register");
    let mut bus = router.subscribe();

    manager.open();
    assert!(manager.wait_until_connected(Duration::from_secs(5)).await);
    let frames = connector.take_latest_channel();
    for raw in [
        "not json".to_string(),
        r#"{"project_id":"p-1","scan_type":"full","issues_found":1,"timestamp":1}"#.to_string(),
        r#"{"type":"scan_started","project_id":"p-1"}"#.to_string(),
        r#"{"type":"analysis_complete","project_id":"p-1"}"#.to_string(),
        completion_frame("p-1", 7),
    ] {
        frames.send(Ok(raw)).expect("send frame");
    }

    let routed = bus.recv().await.expect("valid frame routed");
    assert_eq!(routed.task_id, "p-1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*delivered.lock().expect("sink lock"), Some(7));
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn close_cancels_pending_retry() {
    let connector = ScriptedConnector::always_failing();
    let (manager, _router) = manager_for(&connector);

    manager.open();
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(connector.connect_count(), 2);

    manager.close();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.connect_count(), 2);

    manager.close();
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn reopen_after_exhaustion_starts_a_fresh_budget() {
    let connector = ScriptedConnector::always_failing();
    let (manager, _router) = manager_for(&connector);
    let mut status = manager.watch();

    manager.open();
    tokio::time::timeout(
        Duration::from_secs(300),
        status.wait_for(|snapshot| snapshot.exhausted),
    )
    .await
    .expect("exhausted")
    .expect("status channel open");

    manager.open();
    let snapshot = manager.snapshot();
    assert!(!snapshot.exhausted);
    assert_eq!(snapshot.reconnect_attempts, 0);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(connector.connect_count(), 8);
    assert_eq!(manager.reconnect_attempts(), 2);
}

#[tokio::test]
async fn ingest_routes_without_a_live_channel() {
    let connector = ScriptedConnector::always_failing();
    let (manager, router) = manager_for(&connector);
    router.register_once("p-9", |_| {}).expect("register");

    assert!(manager.ingest("garbage").is_none());
    let outcome = manager.ingest(&completion_frame("p-9", 0)).expect("parsed");
    assert!(outcome.is_delivered());
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn reopen_then_close_leaves_no_loop_running() {
    let connector = ScriptedConnector::always_failing();
    let (manager, _router) = manager_for(&connector);

    manager.open();
    manager.open();
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    // Only the second loop ever connects: its initial attempt plus one retry.
    assert_eq!(connector.connect_count(), 2);

    manager.close();
    let after_close = connector.connect_count();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.connect_count(), after_close);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_leave_a_single_closable_loop() {
    let connector = ScriptedConnector::always_failing();
    let router = Arc::new(NotificationRouter::default());
    let manager = Arc::new(ConnectionManager::new(
        Arc::clone(&connector) as Arc<dyn PushConnector>,
        router,
        ReconnectPolicy {
            max_attempts: u32::MAX,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
        },
    ));

    let openers: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.open() })
        })
        .collect();
    for opener in openers {
        opener.await.expect("open task");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = connector.connect_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(connector.connect_count(), settled);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}
