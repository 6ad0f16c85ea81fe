//! Typed request specifications.
//!
//! Filters, projections and orderings are structured text (JSON). Builders take
//! [`serde_json::Value`]s and render them once, so the marshaler only deals in
//! strings.

use serde::{Deserialize, Serialize};

/// Parameters of a `query` call.
///
/// # Example
/// ```
/// use openiap::QuerySpec;
/// use serde_json::json;
///
/// let spec = QuerySpec::collection("entities")
///   .filter(json!({"_type": "test"}))
///   .projection(json!({"name": 1}))
///   .order_by(json!({"_created": -1}))
///   .top(10);
/// assert_eq!(spec.projection, r#"{"name":1}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
  pub collection: String,
  pub filter: String,
  pub projection: String,
  pub orderby: String,
  pub skip: u32,
  pub top: u32,
  pub queryas: String,
  pub explain: bool,
}

impl QuerySpec {
  pub fn collection(name: impl Into<String>) -> Self {
    Self {
      collection: name.into(),
      ..Default::default()
    }
  }

  pub fn filter(mut self, filter: serde_json::Value) -> Self {
    self.filter = filter.to_string();
    self
  }

  pub fn projection(mut self, projection: serde_json::Value) -> Self {
    self.projection = projection.to_string();
    self
  }

  pub fn order_by(mut self, orderby: serde_json::Value) -> Self {
    self.orderby = orderby.to_string();
    self
  }

  pub fn skip(mut self, n: u32) -> Self {
    self.skip = n;
    self
  }

  pub fn top(mut self, n: u32) -> Self {
    self.top = n;
    self
  }

  /// Run the query with the permissions of another user or role id.
  pub fn query_as(mut self, id: impl Into<String>) -> Self {
    self.queryas = id.into();
    self
  }

  pub fn explain(mut self, explain: bool) -> Self {
    self.explain = explain;
    self
  }
}

/// Parameters of an `insert_one` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertSpec {
  pub collection: String,
  pub item: String,
  /// Write concern.
  pub w: i32,
  /// Wait for the journal.
  pub j: bool,
}

impl InsertSpec {
  pub fn new(collection: impl Into<String>, item: serde_json::Value) -> Self {
    Self {
      collection: collection.into(),
      item: item.to_string(),
      w: 1,
      j: false,
    }
  }

  /// Build from any serializable document.
  pub fn from_document<T: Serialize>(collection: impl Into<String>, item: &T) -> crate::Result<Self> {
    Ok(Self::new(collection, serde_json::to_value(item)?))
  }

  pub fn write_concern(mut self, w: i32) -> Self {
    self.w = w;
    self
  }

  pub fn journal(mut self, j: bool) -> Self {
    self.j = j;
    self
  }
}

/// Parameters of a `watch` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchSpec {
  pub collection: String,
  /// Only report changes touching these paths. Empty means every change.
  pub paths: Vec<String>,
}

impl WatchSpec {
  pub fn collection(name: impl Into<String>) -> Self {
    Self {
      collection: name.into(),
      paths: Vec::new(),
    }
  }

  pub fn path(mut self, path: impl Into<String>) -> Self {
    self.paths.push(path.into());
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_query_defaults() {
    let spec = QuerySpec::collection("entities");
    assert_eq!(spec.collection, "entities");
    assert!(spec.filter.is_empty());
    assert_eq!(spec.top, 0);
    assert!(!spec.explain);
  }

  #[test]
  fn test_query_builder_renders_json() {
    let spec = QuerySpec::collection("entities")
      .filter(json!({"name": "Test"}))
      .skip(5)
      .top(10)
      .query_as("users")
      .explain(true);
    assert_eq!(spec.filter, r#"{"name":"Test"}"#);
    assert_eq!(spec.skip, 5);
    assert_eq!(spec.top, 10);
    assert_eq!(spec.queryas, "users");
    assert!(spec.explain);
  }

  #[test]
  fn test_insert_defaults_to_acknowledged_write() {
    let spec = InsertSpec::new("entities", json!({"name": "Test"}));
    assert_eq!(spec.w, 1);
    assert!(!spec.j);
    assert_eq!(spec.item, r#"{"name":"Test"}"#);
  }

  #[test]
  fn test_insert_from_document() {
    #[derive(Serialize)]
    struct Entity {
      name: &'static str,
    }
    let spec = InsertSpec::from_document("entities", &Entity { name: "x" })
      .unwrap()
      .journal(true)
      .write_concern(2);
    assert_eq!(spec.item, r#"{"name":"x"}"#);
    assert_eq!(spec.w, 2);
    assert!(spec.j);
  }

  #[test]
  fn test_watch_paths() {
    let spec = WatchSpec::collection("entities").path("name").path("_type");
    assert_eq!(spec.paths, vec!["name".to_string(), "_type".to_string()]);
  }
}
