//! Observable gauge tests for the OpenIAP Rust SDK.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use openiap::loopback::Loopback;
use openiap::{Error, GaugeKind, GaugeRegistry, GaugeValue, DEFAULT_GAUGE_INTERVAL};

/// 42.7 on the first reading, then 1.0, 2.0, 3.0, ...
fn seeded(calls: Arc<AtomicU64>) -> impl Fn() -> GaugeValue + Send + Sync + 'static {
  move || match calls.fetch_add(1, Ordering::SeqCst) {
    0 => GaugeValue::F64(42.7),
    n => GaugeValue::F64(n as f64),
  }
}

#[tokio::test(start_paused = true)]
async fn test_activate_sets_value_immediately() {
  let api = Arc::new(Loopback::new());
  let gauges = GaugeRegistry::new(api.clone());

  let value = gauges
    .activate("test_f64", "test", || GaugeValue::F64(42.7))
    .await
    .unwrap();
  assert_eq!(value, GaugeValue::F64(42.7));

  let published = api.gauge("test_f64").unwrap();
  assert_eq!(published.value, GaugeValue::F64(42.7));
  assert_eq!(published.description, "test");
  assert!(gauges.is_active("test_f64").await);
  gauges.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_activate_twice_is_rejected() {
  let api = Arc::new(Loopback::new());
  let gauges = GaugeRegistry::new(api.clone());
  gauges
    .activate("test_u64", "test", || GaugeValue::U64(42))
    .await
    .unwrap();

  match gauges.activate("test_u64", "test", || GaugeValue::U64(7)).await {
    Err(Error::GaugeActive(name)) => assert_eq!(name, "test_u64"),
    other => panic!("Expected GaugeActive error, got {:?}", other),
  }
  assert_eq!(api.gauge_history("test_u64"), vec![GaugeValue::U64(42)]);

  tokio::time::sleep(DEFAULT_GAUGE_INTERVAL * 2 + Duration::from_secs(1)).await;
  assert_eq!(
    api.gauge_history("test_u64"),
    vec![GaugeValue::U64(42), GaugeValue::U64(42), GaugeValue::U64(42)]
  );
  gauges.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_is_rejected() {
  let api = Arc::new(Loopback::new());
  match GaugeRegistry::with_interval(api.clone(), Duration::ZERO) {
    Err(Error::InvalidArgument { field, .. }) => assert_eq!(field, "interval"),
    Err(other) => panic!("Expected InvalidArgument error, got {:?}", other),
    Ok(_) => panic!("Expected InvalidArgument error, got a registry"),
  }
  assert!(api.gauge_history("g").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reactivate_reports_fresh_value() {
  let api = Arc::new(Loopback::new());
  let gauges = GaugeRegistry::new(api.clone());
  let calls = Arc::new(AtomicU64::new(0));

  gauges
    .activate("test_f64", "test", seeded(calls.clone()))
    .await
    .unwrap();
  assert_eq!(api.gauge("test_f64").unwrap().value, GaugeValue::F64(42.7));

  assert!(gauges.deactivate("test_f64").await.unwrap());
  assert!(api.gauge("test_f64").is_none());
  assert!(!gauges.is_active("test_f64").await);

  tokio::time::sleep(DEFAULT_GAUGE_INTERVAL * 3).await;
  assert_eq!(api.gauge_history("test_f64").len(), 1);

  let value = gauges
    .activate("test_f64", "test", seeded(calls.clone()))
    .await
    .unwrap();
  assert_eq!(value, GaugeValue::F64(1.0));
  assert_eq!(api.gauge("test_f64").unwrap().value, GaugeValue::F64(1.0));
  gauges.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_periodic_republish() {
  let api = Arc::new(Loopback::new());
  let gauges = GaugeRegistry::new(api.clone());
  let calls = Arc::new(AtomicU64::new(0));
  gauges
    .activate("test_f64", "test", seeded(calls.clone()))
    .await
    .unwrap();

  tokio::time::sleep(Duration::from_secs(29)).await;
  assert_eq!(api.gauge_history("test_f64").len(), 1);

  tokio::time::sleep(Duration::from_secs(2)).await;
  assert_eq!(
    api.gauge_history("test_f64"),
    vec![GaugeValue::F64(42.7), GaugeValue::F64(1.0)]
  );

  tokio::time::sleep(DEFAULT_GAUGE_INTERVAL).await;
  assert_eq!(api.gauge_history("test_f64").len(), 3);
  assert_eq!(api.gauge("test_f64").unwrap().value, GaugeValue::F64(2.0));

  gauges.deactivate("test_f64").await.unwrap();
  tokio::time::sleep(DEFAULT_GAUGE_INTERVAL * 4).await;
  assert_eq!(api.gauge_history("test_f64").len(), 3);
  assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_custom_interval() {
  let api = Arc::new(Loopback::new());
  let gauges = GaugeRegistry::with_interval(api.clone(), Duration::from_secs(1)).unwrap();
  assert_eq!(gauges.interval(), Duration::from_secs(1));
  gauges
    .activate("test_i64", "test", || GaugeValue::I64(-3))
    .await
    .unwrap();
  tokio::time::sleep(Duration::from_millis(3500)).await;
  assert_eq!(api.gauge_history("test_i64").len(), 4);
  gauges.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_toggle() {
  let api = Arc::new(Loopback::new());
  let gauges = GaugeRegistry::new(api.clone());

  let started = gauges
    .toggle("test_u64", "test", || GaugeValue::U64(42))
    .await
    .unwrap();
  assert_eq!(started, Some(GaugeValue::U64(42)));
  assert!(api.gauge("test_u64").is_some());

  let stopped = gauges
    .toggle("test_u64", "test", || GaugeValue::U64(42))
    .await
    .unwrap();
  assert_eq!(stopped, None);
  assert!(api.gauge("test_u64").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_gauges_are_independent() {
  let api = Arc::new(Loopback::new());
  let gauges = GaugeRegistry::new(api.clone());
  gauges.activate("test_i64", "test", || GaugeValue::I64(42)).await.unwrap();
  gauges.activate("test_f64", "test", || GaugeValue::F64(42.7)).await.unwrap();
  gauges.activate("test_u64", "test", || GaugeValue::U64(42)).await.unwrap();

  assert_eq!(gauges.active_names().await, ["test_f64", "test_i64", "test_u64"]);
  assert_eq!(gauges.kind_of("test_i64").await, Some(GaugeKind::I64));

  gauges.deactivate("test_f64").await.unwrap();
  assert!(api.gauge("test_f64").is_none());
  assert!(api.gauge("test_i64").is_some());
  assert!(api.gauge("test_u64").is_some());

  gauges.shutdown().await.unwrap();
  assert!(gauges.active_names().await.is_empty());
  assert!(api.gauge("test_i64").is_none());
}
