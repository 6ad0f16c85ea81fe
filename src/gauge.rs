//! Observable gauge reporting.
//!
//! Gauges live in a process-wide table inside the native library, keyed by
//! name. [`GaugeRegistry`] is the only writer on the SDK side: activating a
//! gauge publishes one reading straight away and then starts a task that
//! republishes a fresh reading every interval; deactivating stops that task and
//! removes the gauge from the exporter. Registry operations are serialized, so
//! a name never has two reporters.
//!
//! Dropping the registry ends its reporter tasks but leaves the last values
//! published; call [`GaugeRegistry::shutdown`] to unregister them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ffi::NativeApi;
use crate::marshal::MarshaledString;
use crate::protocol::{GaugeKind, GaugeValue, DEFAULT_GAUGE_INTERVAL};

struct Reporter {
  kind: GaugeKind,
  shutdown: watch::Sender<bool>,
  task: JoinHandle<()>,
}

/// Name-keyed set of periodically reported gauges.
pub struct GaugeRegistry {
  api: Arc<dyn NativeApi>,
  interval: Duration,
  active: Mutex<HashMap<String, Reporter>>,
}

impl GaugeRegistry {
  pub fn new(api: Arc<dyn NativeApi>) -> Self {
    Self {
      api,
      interval: DEFAULT_GAUGE_INTERVAL,
      active: Mutex::new(HashMap::new()),
    }
  }

  /// A registry republishing every `interval`, which must be non-zero.
  pub fn with_interval(api: Arc<dyn NativeApi>, interval: Duration) -> Result<Self> {
    if interval.is_zero() {
      return Err(Error::InvalidArgument {
        field: "interval",
        reason: "must be non-zero".to_string(),
      });
    }
    Ok(Self {
      interval,
      ..Self::new(api)
    })
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  /// Publish `producer()` now and every interval until deactivated.
  ///
  /// The gauge's kind is fixed by the first reading; later readings of a
  /// different kind are skipped. `producer` runs while the registry is locked
  /// and must not call back into it.
  pub async fn activate<F>(&self, name: &str, description: &str, producer: F) -> Result<GaugeValue>
  where
    F: Fn() -> GaugeValue + Send + Sync + 'static,
  {
    let runtime = tokio::runtime::Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;
    let c_name = MarshaledString::new("name", name)?;
    let c_description = MarshaledString::new("description", description)?;

    let mut active = self.active.lock().await;
    if active.contains_key(name) {
      return Err(Error::GaugeActive(name.to_string()));
    }

    let value = producer();
    publish(self.api.as_ref(), &c_name, value, &c_description);
    info!(gauge = %name, %value, kind = %value.kind(), "gauge activated");

    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = runtime.spawn(report_loop(
      self.api.clone(),
      c_name,
      c_description,
      value.kind(),
      self.interval,
      producer,
      shutdown_rx,
    ));
    active.insert(
      name.to_string(),
      Reporter {
        kind: value.kind(),
        shutdown,
        task,
      },
    );
    Ok(value)
  }

  /// Stop reporting `name` and unregister it. Waits for the reporter task to
  /// exit. Returns `false` if the gauge was not active.
  pub async fn deactivate(&self, name: &str) -> Result<bool> {
    let mut active = self.active.lock().await;
    let Some(reporter) = active.remove(name) else {
      return Ok(false);
    };
    let c_name = MarshaledString::new("name", name)?;

    let _ = reporter.shutdown.send(true);
    if let Err(e) = reporter.task.await {
      warn!(gauge = %name, error = %e, "gauge reporter aborted");
    }
    // SAFETY: the name buffer outlives the call.
    unsafe { self.api.disable_observable_gauge(c_name.as_ptr()) };
    info!(gauge = %name, "gauge deactivated");
    Ok(true)
  }

  /// Activate `name` if inactive, otherwise deactivate it. Returns the first
  /// reading when the gauge was started.
  pub async fn toggle<F>(&self, name: &str, description: &str, producer: F) -> Result<Option<GaugeValue>>
  where
    F: Fn() -> GaugeValue + Send + Sync + 'static,
  {
    if self.deactivate(name).await? {
      return Ok(None);
    }
    self.activate(name, description, producer).await.map(Some)
  }

  pub async fn is_active(&self, name: &str) -> bool {
    self.active.lock().await.contains_key(name)
  }

  pub async fn kind_of(&self, name: &str) -> Option<GaugeKind> {
    self.active.lock().await.get(name).map(|r| r.kind)
  }

  pub async fn active_names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.active.lock().await.keys().cloned().collect();
    names.sort();
    names
  }

  /// Deactivate every gauge.
  pub async fn shutdown(&self) -> Result<()> {
    for name in self.active_names().await {
      self.deactivate(&name).await?;
    }
    Ok(())
  }
}

fn publish(api: &dyn NativeApi, name: &MarshaledString, value: GaugeValue, description: &MarshaledString) {
  // SAFETY: both buffers outlive the call.
  unsafe {
    match value {
      GaugeValue::F64(v) => api.set_f64_observable_gauge(name.as_ptr(), v, description.as_ptr()),
      GaugeValue::U64(v) => api.set_u64_observable_gauge(name.as_ptr(), v, description.as_ptr()),
      GaugeValue::I64(v) => api.set_i64_observable_gauge(name.as_ptr(), v, description.as_ptr()),
    }
  }
}

async fn report_loop<F>(
  api: Arc<dyn NativeApi>,
  name: MarshaledString,
  description: MarshaledString,
  kind: GaugeKind,
  interval: Duration,
  producer: F,
  mut shutdown: watch::Receiver<bool>,
) where
  F: Fn() -> GaugeValue + Send + Sync + 'static,
{
  let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      biased;
      changed = shutdown.changed() => {
        if changed.is_err() || *shutdown.borrow() {
          return;
        }
      }
      _ = ticker.tick() => {
        let value = producer();
        if value.kind() != kind {
          warn!(expected = %kind, got = %value.kind(), "gauge reading of wrong kind skipped");
          continue;
        }
        debug!(%value, "gauge republished");
        publish(api.as_ref(), &name, value, &description);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loopback::Loopback;
  use std::sync::atomic::{AtomicU64, Ordering};

  #[tokio::test(start_paused = true)]
  async fn test_activate_publishes_immediately() {
    let api = Arc::new(Loopback::new());
    let registry = GaugeRegistry::new(api.clone());
    let value = registry.activate("g", "test", || GaugeValue::U64(7)).await.unwrap();
    assert_eq!(value, GaugeValue::U64(7));
    let published = api.gauge("g").unwrap();
    assert_eq!(published.value, GaugeValue::U64(7));
    assert_eq!(published.description, "test");
    assert_eq!(registry.kind_of("g").await, Some(GaugeKind::U64));
    registry.shutdown().await.unwrap();
    assert!(api.gauge("g").is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_wrong_kind_is_skipped() {
    let api = Arc::new(Loopback::new());
    let registry = GaugeRegistry::with_interval(api.clone(), Duration::from_secs(1)).unwrap();
    let calls = Arc::new(AtomicU64::new(0));
    let counter = calls.clone();
    registry
      .activate("g", "test", move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
          GaugeValue::I64(1)
        } else {
          GaugeValue::F64(2.0)
        }
      })
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(api.gauge_history("g"), vec![GaugeValue::I64(1)]);
    registry.shutdown().await.unwrap();
  }

  #[test]
  fn test_zero_interval_is_rejected() {
    let result = GaugeRegistry::with_interval(Arc::new(Loopback::new()), Duration::ZERO);
    assert!(matches!(result, Err(Error::InvalidArgument { field: "interval", .. })));
  }

  #[test]
  fn test_activate_outside_runtime_fails() {
    let registry = GaugeRegistry::new(Arc::new(Loopback::new()));
    let result = futures::executor::block_on(registry.activate("g", "test", || GaugeValue::U64(1)));
    assert!(matches!(result, Err(Error::NoRuntime(_))));
  }

  #[tokio::test]
  async fn test_deactivate_unknown() {
    let registry = GaugeRegistry::new(Arc::new(Loopback::new()));
    assert!(!registry.deactivate("nope").await.unwrap());
  }

  #[tokio::test]
  async fn test_rejects_nul_in_name() {
    let registry = GaugeRegistry::new(Arc::new(Loopback::new()));
    let result = registry.activate("a\0b", "test", || GaugeValue::F64(1.0)).await;
    assert!(matches!(result, Err(Error::InvalidArgument { field: "name", .. })));
  }
}
