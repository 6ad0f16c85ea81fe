//! Values exchanged with the native library and their defaults.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Agent name reported to the platform unless overridden.
pub const DEFAULT_AGENT_NAME: &str = "rust";

/// Cadence of the change-feed poller when its queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Cadence at which an active gauge is recomputed.
pub const DEFAULT_GAUGE_INTERVAL: Duration = Duration::from_secs(30);

/// One change delivered by a watch subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
  /// Subscription identifier the event belongs to.
  pub id: String,
  /// `insert`, `update`, `replace` or `delete`, as reported by the server.
  pub operation: String,
  /// The changed document as JSON text.
  pub document: String,
}

impl WatchEvent {
  pub fn document_as<T: DeserializeOwned>(&self) -> crate::Result<T> {
    Ok(serde_json::from_str(&self.document)?)
  }
}

/// Numeric kind of an observable gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GaugeKind {
  F64,
  U64,
  I64,
}

impl fmt::Display for GaugeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GaugeKind::F64 => write!(f, "f64"),
      GaugeKind::U64 => write!(f, "u64"),
      GaugeKind::I64 => write!(f, "i64"),
    }
  }
}

/// A gauge reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum GaugeValue {
  F64(f64),
  U64(u64),
  I64(i64),
}

impl GaugeValue {
  pub fn kind(&self) -> GaugeKind {
    match self {
      GaugeValue::F64(_) => GaugeKind::F64,
      GaugeValue::U64(_) => GaugeKind::U64,
      GaugeValue::I64(_) => GaugeKind::I64,
    }
  }
}

impl fmt::Display for GaugeValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GaugeValue::F64(v) => write!(f, "{}", v),
      GaugeValue::U64(v) => write!(f, "{}", v),
      GaugeValue::I64(v) => write!(f, "{}", v),
    }
  }
}

impl From<f64> for GaugeValue {
  fn from(v: f64) -> Self {
    GaugeValue::F64(v)
  }
}

impl From<u64> for GaugeValue {
  fn from(v: u64) -> Self {
    GaugeValue::U64(v)
  }
}

impl From<i64> for GaugeValue {
  fn from(v: i64) -> Self {
    GaugeValue::I64(v)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_gauge_value_kind() {
    assert_eq!(GaugeValue::from(42.7).kind(), GaugeKind::F64);
    assert_eq!(GaugeValue::from(42u64).kind(), GaugeKind::U64);
    assert_eq!(GaugeValue::from(-42i64).kind(), GaugeKind::I64);
  }

  #[test]
  fn test_gauge_value_serde() {
    let json = serde_json::to_value(GaugeValue::U64(7)).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "u64", "value": 7}));
  }

  #[test]
  fn test_event_document_as() {
    #[derive(Deserialize)]
    struct Entity {
      name: String,
    }
    let event = WatchEvent {
      id: "w1".to_string(),
      operation: "insert".to_string(),
      document: r#"{"name":"Test"}"#.to_string(),
    };
    let entity: Entity = event.document_as().unwrap();
    assert_eq!(entity.name, "Test");
  }
}
