//! Change-feed poller tests for the OpenIAP Rust SDK.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use openiap::loopback::{Fault, Loopback};
use openiap::{
  Client, ClientOptions, Error, InsertSpec, NativeApi, PollerConfig, PollerExit, Subscription,
  WatchSpec,
};
use serde_json::json;
use tokio::time::{timeout, Instant};

const CADENCE: Duration = Duration::from_millis(200);

fn connected() -> (Arc<Loopback>, Client) {
  let api = Arc::new(Loopback::new());
  let client = Client::create(api.clone()).unwrap();
  client.connect("").unwrap();
  (api, client)
}

#[tokio::test(start_paused = true)]
async fn test_burst_is_delivered_in_order() {
  let (api, client) = connected();
  let mut sub = client.subscribe(&WatchSpec::collection("entities")).unwrap();

  for seq in 0..25 {
    assert!(api.push_event(sub.watch_id(), "update", json!({"seq": seq})));
  }

  for seq in 0..25 {
    let event = sub.next().await.unwrap().unwrap();
    assert_eq!(event.operation, "update");
    let doc: serde_json::Value = event.document_as().unwrap();
    assert_eq!(doc["seq"], json!(seq));
  }

  assert_eq!(sub.stop().await, PollerExit::Stopped);
  assert_eq!(api.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_backlog_drains_without_waiting() {
  let (api, client) = connected();
  let id = client.watch(&WatchSpec::collection("entities")).unwrap();
  for seq in 0..10 {
    api.push_event(&id, "insert", json!({"seq": seq}));
  }

  let shared: Arc<dyn NativeApi> = api.clone();
  let mut sub = Subscription::spawn(shared, id, PollerConfig::default()).unwrap();
  let start = Instant::now();
  for _ in 0..10 {
    sub.next().await.unwrap().unwrap();
  }
  assert!(start.elapsed() < CADENCE);
  sub.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_insert_yields_one_event_within_cadence() {
  let (_api, client) = connected();
  let mut sub = client.subscribe(&WatchSpec::collection("entities")).unwrap();

  // Let the poller find the queue empty and go to sleep.
  tokio::time::sleep(Duration::from_millis(10)).await;

  let stored = client
    .insert_one(&InsertSpec::new("entities", json!({"name": "Test least"})))
    .unwrap();

  let event = timeout(CADENCE + Duration::from_millis(50), sub.next())
    .await
    .expect("event within one poll interval")
    .unwrap()
    .unwrap();
  assert_eq!(event.operation, "insert");
  assert_eq!(event.document, stored);

  assert!(timeout(Duration::from_secs(1), sub.next()).await.is_err());
  sub.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_event_ends_subscription() {
  let (api, client) = connected();
  let mut sub = client.subscribe(&WatchSpec::collection("entities")).unwrap();
  api.inject(Fault::Fail("corrupt".to_string()));

  match sub.next().await {
    Some(Err(Error::Watch(_))) => {}
    other => panic!("Expected Watch error, got {:?}", other),
  }
  assert!(sub.next().await.is_none());
  assert_eq!(sub.stop().await, PollerExit::Failed);
  assert_eq!(api.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_synchronous() {
  let (api, client) = connected();
  let mut sub = client.subscribe(&WatchSpec::collection("entities")).unwrap();

  assert_eq!(sub.stop().await, PollerExit::Stopped);
  assert!(sub.is_finished());

  api.push_event(sub.watch_id(), "insert", json!({"late": true}));
  tokio::time::sleep(CADENCE * 5).await;
  assert!(sub.try_next().is_none());
  assert!(sub.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_subscription_is_a_stream() {
  let (api, client) = connected();
  let sub = client.subscribe(&WatchSpec::collection("entities")).unwrap();
  for op in ["insert", "update", "delete"] {
    api.push_event(sub.watch_id(), op, json!({}));
  }

  let ops: Vec<String> = sub
    .take(3)
    .map(|event| event.unwrap().operation)
    .collect()
    .await;
  assert_eq!(ops, ["insert", "update", "delete"]);
}

#[tokio::test(start_paused = true)]
async fn test_custom_cadence() {
  let (api, client) = connected();
  let config = PollerConfig {
    interval: Duration::from_secs(2),
  };
  let mut sub = client
    .subscribe_with(&WatchSpec::collection("entities"), config)
    .unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;

  api.push_event(sub.watch_id(), "insert", json!({}));
  assert!(timeout(Duration::from_secs(1), sub.next()).await.is_err());
  assert!(timeout(Duration::from_secs(2), sub.next()).await.is_ok());
  sub.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unwatch_after_stop() {
  let (api, client) = connected();
  let mut sub = client.subscribe(&WatchSpec::collection("entities")).unwrap();
  sub.stop().await;
  client.unwatch(sub.watch_id()).unwrap();
  assert!(!api.has_watch(sub.watch_id()));
}

#[tokio::test(start_paused = true)]
async fn test_zero_cadence_is_rejected() {
  let (_api, client) = connected();
  let config = PollerConfig {
    interval: Duration::ZERO,
  };
  assert!(matches!(
    client.subscribe_with(&WatchSpec::collection("entities"), config),
    Err(Error::InvalidArgument { field: "interval", .. })
  ));

  let api = Arc::new(Loopback::new());
  let client = Client::connect_with_options(
    api.clone(),
    ClientOptions::new("").with_poll_interval(Duration::ZERO),
  )
  .unwrap();
  assert!(matches!(
    client.subscribe(&WatchSpec::collection("entities")),
    Err(Error::InvalidArgument { field: "interval", .. })
  ));
}
