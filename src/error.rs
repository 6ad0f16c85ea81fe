//! Error types for the OpenIAP client SDK.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
  #[error("Failed to create client: {0}")]
  ConnectionInit(String),

  #[error("Connection error: {0}")]
  Connection(String),

  #[error("Query failed: {0}")]
  Query(String),

  #[error("Insert failed: {0}")]
  Insert(String),

  #[error("Watch failed: {0}")]
  Watch(String),

  #[error("Unwatch failed: {0}")]
  Unwatch(String),

  #[error("Client has been released")]
  UseAfterRelease,

  #[error("Invalid argument `{field}`: {reason}")]
  InvalidArgument { field: &'static str, reason: String },

  #[error("Gauge already active: {0}")]
  GaugeActive(String),

  #[error("No tokio runtime: {0}")]
  NoRuntime(String),

  #[error("Serialization error: {0}")]
  Serialization(String),
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Self::Serialization(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
