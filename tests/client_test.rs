use deribit_rpc::transport::memory::{self, RemotePeer};
use deribit_rpc::{
    AnomalyPolicy, ClientConfig, Credentials, Notification, Request, Response, RpcClient, RpcError, Topic,
    TransportError,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn connect(config: ClientConfig) -> (RpcClient, RemotePeer) {
    deribit_rpc::init_tracing();
    let (sink, source, peer) = memory::pair(64);
    let client = RpcClient::new(sink, source, config).unwrap();
    (client, peer)
}

/// Answer every request with its own action name as the result
fn spawn_echo(mut peer: RemotePeer) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(req) = peer.next_request().await {
            let _ = peer.reply(&Response::ok(req.id, json!(req.action))).await;
        }
    })
}

#[tokio::test]
async fn test_responses_matched_regardless_of_arrival_order() {
    let (client, mut peer) = connect(ClientConfig::default());

    let a = client.submit(Request::new("getcurrencies")).await.unwrap();
    let b = client.submit(Request::new("getinstruments")).await.unwrap();

    let req_a = peer.next_request().await.unwrap();
    let req_b = peer.next_request().await.unwrap();
    assert_eq!(req_a.id, a.id());
    assert_eq!(req_b.id, b.id());

    // B's response arrives first
    peer.reply(&Response::ok(req_b.id, json!("B"))).await.unwrap();
    peer.reply(&Response::ok(req_a.id, json!("A"))).await.unwrap();

    let (res_a, res_b) = tokio::join!(a.wait(), b.wait());
    assert_eq!(res_a.unwrap().result, json!("A"));
    assert_eq!(res_b.unwrap().result, json!("B"));
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn test_concurrent_calls_each_get_their_own_response() {
    let (client, peer) = connect(ClientConfig::default());
    let client = Arc::new(client);
    let _echo = spawn_echo(peer);

    let mut tasks = Vec::new();
    for i in 0..50 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let action = format!("action_{}", i);
            let response = client.call(Request::new(action.clone())).await.unwrap();
            assert_eq!(response.result, json!(action));
            response.id.unwrap()
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 50);
    assert_eq!(client.stats().completed.load(Ordering::Relaxed), 50);
}

#[tokio::test]
async fn test_ids_strictly_increase() {
    let (client, _peer) = connect(ClientConfig::default());

    let mut last = 0;
    let mut pending = Vec::new();
    for _ in 0..5 {
        let call = client.submit(Request::new("ping")).await.unwrap();
        assert!(call.id() > last);
        last = call.id();
        pending.push(call);
    }
    assert_eq!(client.pending_count().await, 5);
}

#[tokio::test(start_paused = true)]
async fn test_call_times_out_after_configured_window() {
    let (client, mut peer) = connect(ClientConfig::default());

    let started = tokio::time::Instant::now();
    let err = client.call(Request::new("getsummary")).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, RpcError::Timeout { .. }));
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(2100));
    assert_eq!(client.pending_count().await, 0);
    assert_eq!(client.stats().timeouts.load(Ordering::Relaxed), 1);

    // The late response is dropped without disturbing the connection
    let late = peer.next_request().await.unwrap();
    peer.reply(&Response::ok(late.id, json!("late"))).await.unwrap();

    let next = client.submit(Request::new("ping")).await.unwrap();
    let req = peer.next_request().await.unwrap();
    peer.reply(&Response::ok(req.id, json!("pong"))).await.unwrap();
    assert_eq!(next.wait().await.unwrap().result, json!("pong"));

    assert_eq!(client.stats().late_responses.load(Ordering::Relaxed), 1);
    assert_eq!(client.stats().anomalies.load(Ordering::Relaxed), 0);
    assert!(!client.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_custom_timeout() {
    let config = ClientConfig {
        call_timeout: Duration::from_millis(250),
        ..Default::default()
    };
    let (client, _peer) = connect(config);

    let started = tokio::time::Instant::now();
    let err = client.call(Request::new("getsummary")).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout { timeout, .. } if timeout == Duration::from_millis(250)));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_server_error_carries_message() {
    let (client, mut peer) = connect(ClientConfig::default());

    let call = client.submit(Request::new("cancel").arg("orderId", 12)).await.unwrap();
    let req = peer.next_request().await.unwrap();
    peer.reply(&Response::failed(req.id, 10004, "order_not_found")).await.unwrap();

    let err = call.wait().await.unwrap_err();
    assert_eq!(
        err,
        RpcError::Server {
            code: 10004,
            message: "order_not_found".into()
        }
    );
    assert_eq!(client.stats().server_errors.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_transport_failure_resolves_every_pending_call_once() {
    let (mut client, mut peer) = connect(ClientConfig::default());
    let mut errors = client.take_errors().unwrap();

    let mut calls = Vec::new();
    for _ in 0..3 {
        calls.push(client.submit(Request::new("positions")).await.unwrap());
    }
    for _ in 0..3 {
        peer.next_request().await.unwrap();
    }
    drop(peer);

    for call in calls {
        let err = call.wait().await.unwrap_err();
        assert_eq!(err, RpcError::TransportRead(TransportError::Closed));
    }
    assert_eq!(client.stats().failed.load(Ordering::Relaxed), 3);
    assert_eq!(errors.recv().await, Some(RpcError::TransportRead(TransportError::Closed)));

    // The dead connection refuses new work immediately
    let err = client.submit(Request::new("positions")).await.unwrap_err();
    assert_eq!(err, RpcError::TransportRead(TransportError::Closed));
}

#[tokio::test]
async fn test_write_failure_leaves_no_registration() {
    let (client, mut peer) = connect(ClientConfig::default());
    peer.stop_reading();

    let err = client.submit(Request::new("buy")).await.unwrap_err();
    assert_eq!(err, RpcError::TransportWrite(TransportError::Closed));
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn test_notification_delivered_unmodified() {
    let (client, peer) = connect(ClientConfig::default());
    let mut book = client.subscribe("book.BTC-PERP").await;

    peer.send_raw(r#"{"notifications":[{"message":"book.BTC-PERP","result":{"bids":[[100.0,5]]}}]}"#)
        .await
        .unwrap();

    let payload = book.recv().await.unwrap();
    assert_eq!(payload, json!({"bids": [[100.0, 5]]}));
    assert_eq!(client.stats().notifications.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_notifications_and_responses_interleave() {
    let (client, mut peer) = connect(ClientConfig::default());
    let mut trades = client.subscribe(Topic::from("trade_event")).await;

    let call = client.submit(Request::new("getlasttrades")).await.unwrap();
    let req = peer.next_request().await.unwrap();

    peer.notify(vec![
        Notification::new("trade_event", json!({"tradeId": 1})),
        Notification::new("trade_event", json!({"tradeId": 2})),
    ])
    .await
    .unwrap();
    peer.reply(&Response::ok(req.id, json!([]))).await.unwrap();

    assert_eq!(call.wait().await.unwrap().result, json!([]));
    assert_eq!(trades.recv().await.unwrap(), json!({"tradeId": 1}));
    assert_eq!(trades.recv().await.unwrap(), json!({"tradeId": 2}));
}

#[tokio::test]
async fn test_unroutable_notification_reported_and_loop_continues() {
    let (mut client, mut peer) = connect(ClientConfig::default());
    let mut errors = client.take_errors().unwrap();

    peer.notify(vec![Notification::new("order_event", json!({}))]).await.unwrap();
    assert_eq!(
        errors.recv().await,
        Some(RpcError::UnroutableNotification(Topic::from("order_event")))
    );

    let call = client.submit(Request::new("ping")).await.unwrap();
    let req = peer.next_request().await.unwrap();
    peer.reply(&Response::ok(req.id, json!("pong"))).await.unwrap();
    assert!(call.wait().await.is_ok());
    assert_eq!(client.stats().anomalies.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_fail_fast_on_unroutable_notification() {
    let config = ClientConfig {
        anomaly_policy: AnomalyPolicy::FailFast,
        ..Default::default()
    };
    let (client, mut peer) = connect(config);

    let call = client.submit(Request::new("ping")).await.unwrap();
    peer.next_request().await.unwrap();
    peer.notify(vec![Notification::new("order_event", json!({}))]).await.unwrap();

    let err = call.wait().await.unwrap_err();
    assert_eq!(err, RpcError::UnroutableNotification(Topic::from("order_event")));
    assert!(client.submit(Request::new("ping")).await.is_err());
}

#[tokio::test]
async fn test_fail_fast_on_unmatched_response() {
    let config = ClientConfig {
        anomaly_policy: AnomalyPolicy::FailFast,
        ..Default::default()
    };
    let (client, mut peer) = connect(config);

    let call = client.submit(Request::new("ping")).await.unwrap();
    peer.next_request().await.unwrap();
    peer.reply(&Response::ok(99, json!(null))).await.unwrap();

    assert_eq!(call.wait().await.unwrap_err(), RpcError::UnmatchedResponse(99));
}

#[tokio::test]
async fn test_malformed_frame_reported() {
    let (mut client, peer) = connect(ClientConfig::default());
    let mut errors = client.take_errors().unwrap();

    peer.send_raw(r#"{"success": true}"#).await.unwrap();
    assert_eq!(errors.recv().await, Some(RpcError::MalformedFrame));
    assert!(!client.is_closed());
}

#[tokio::test]
async fn test_undecodable_frame_reported_and_loop_continues() {
    let (mut client, mut peer) = connect(ClientConfig::default());
    let mut errors = client.take_errors().unwrap();

    let call = client.submit(Request::new("ping")).await.unwrap();
    let req = peer.next_request().await.unwrap();

    peer.send_raw(r#"{"id":"abc","success":true}"#).await.unwrap();
    assert_eq!(errors.recv().await, Some(RpcError::MalformedFrame));

    peer.reply(&Response::ok(req.id, json!("pong"))).await.unwrap();
    assert_eq!(call.wait().await.unwrap().result, json!("pong"));
    assert!(!client.is_closed());
    assert_eq!(client.stats().anomalies.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_fail_fast_on_undecodable_frame() {
    let config = ClientConfig {
        anomaly_policy: AnomalyPolicy::FailFast,
        ..Default::default()
    };
    let (client, mut peer) = connect(config);

    let call = client.submit(Request::new("ping")).await.unwrap();
    peer.next_request().await.unwrap();
    peer.send_raw("not json").await.unwrap();

    assert_eq!(call.wait().await.unwrap_err(), RpcError::MalformedFrame);
}

#[tokio::test]
async fn test_private_call_requires_credentials() {
    let (client, _peer) = connect(ClientConfig::default());
    let err = client.call_private(Request::new("account")).await.unwrap_err();
    assert_eq!(err, RpcError::MissingCredentials("account".into()));
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn test_private_call_is_signed() {
    let config = ClientConfig::default().with_credentials(Credentials::new("k1", "s1"));
    let (client, mut peer) = connect(config);
    let client = Arc::new(client);

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.call_private(Request::new("account")).await })
    };

    let req = peer.next_request().await.unwrap();
    let sig = req.sig.clone().unwrap();
    assert!(sig.starts_with("k1."));
    assert_eq!(sig.split('.').count(), 3);
    peer.reply(&Response::ok(req.id, json!({"equity": 1.0}))).await.unwrap();

    let response = caller.await.unwrap().unwrap();
    assert_eq!(response.result["equity"], json!(1.0));
}

#[tokio::test]
async fn test_shutdown_resolves_pending_calls() {
    let (client, _peer) = connect(ClientConfig::default());
    let mut rx = client.subscribe("trade_event").await;

    let call = client.submit(Request::new("ping")).await.unwrap();
    assert!(client.shutdown().await.is_ok());

    assert_eq!(call.wait().await.unwrap_err(), RpcError::Closed);
    // Subscribers see end of stream
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_shutdown_with_stalled_subscriber() {
    let config = ClientConfig {
        subscription_buffer: 1,
        ..Default::default()
    };
    let (client, mut peer) = connect(config);
    // Never read, so the second notification finds the buffer full
    let _book = client.subscribe("book.BTC-PERP").await;

    let call = client.submit(Request::new("ping")).await.unwrap();
    peer.next_request().await.unwrap();
    peer.notify(vec![
        Notification::new("book.BTC-PERP", json!({"seq": 1})),
        Notification::new("book.BTC-PERP", json!({"seq": 2})),
        Notification::new("book.BTC-PERP", json!({"seq": 3})),
    ])
    .await
    .unwrap();
    while client.stats().notifications.load(Ordering::Relaxed) < 1 {
        tokio::task::yield_now().await;
    }

    let stopped = tokio::time::timeout(Duration::from_secs(3), client.shutdown()).await;
    assert!(matches!(stopped, Ok(Ok(()))));
    assert_eq!(call.wait().await.unwrap_err(), RpcError::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_calls_leave_no_registration() {
    let (client, mut peer) = connect(ClientConfig::default());

    let dropped = client.submit(Request::new("getcurrencies")).await.unwrap();
    drop(dropped);

    let cancelled = tokio::time::timeout(Duration::from_millis(100), client.call(Request::new("getsummary"))).await;
    assert!(cancelled.is_err());
    tokio::task::yield_now().await;
    assert_eq!(client.pending_count().await, 0);

    // Their responses arrive late and are dropped quietly
    for _ in 0..2 {
        let req = peer.next_request().await.unwrap();
        peer.reply(&Response::ok(req.id, json!("late"))).await.unwrap();
    }
    let next = client.submit(Request::new("ping")).await.unwrap();
    let req = peer.next_request().await.unwrap();
    peer.reply(&Response::ok(req.id, json!("pong"))).await.unwrap();
    assert_eq!(next.wait().await.unwrap().result, json!("pong"));

    assert_eq!(client.stats().late_responses.load(Ordering::Relaxed), 2);
    assert_eq!(client.stats().anomalies.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_unsubscribe() {
    let (mut client, peer) = connect(ClientConfig::default());
    let mut errors = client.take_errors().unwrap();
    let _rx = client.subscribe("trade_event").await;

    assert!(client.unsubscribe("trade_event").await);
    peer.notify(vec![Notification::new("trade_event", json!({}))]).await.unwrap();
    assert_eq!(
        errors.recv().await,
        Some(RpcError::UnroutableNotification(Topic::from("trade_event")))
    );
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let (sink, source, _peer) = memory::pair(1);
    let config = ClientConfig {
        call_timeout: Duration::ZERO,
        ..Default::default()
    };
    assert!(matches!(
        RpcClient::new(sink, source, config),
        Err(RpcError::Config(_))
    ));
}
