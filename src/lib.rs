//! OpenIAP Rust Client SDK
//!
//! A thin, safe layer over the native OpenIAP client library. Requests are
//! marshaled into the library's C structs, every response is freed through its
//! paired call, and failures come back as typed [`Error`]s.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use openiap::loopback::Loopback;
//! use openiap::{Client, InsertSpec, QuerySpec, WatchSpec};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> openiap::Result<()> {
//!   // Build against the in-process library; use `Client::native()` with the
//!   // `native` feature to talk to a real server.
//!   let client = Client::create(Arc::new(Loopback::new()))?;
//!   client.connect("")?;
//!
//!   // Watch for changes
//!   let mut sub = client.subscribe(&WatchSpec::collection("entities"))?;
//!
//!   // Insert a document
//!   let doc = client.insert_one(&InsertSpec::new("entities", json!({"name": "Test least"})))?;
//!   println!("Inserted: {}", doc);
//!
//!   // Query documents
//!   let found = client.query(&QuerySpec::collection("entities").projection(json!({"name": 1})).top(10))?;
//!   println!("Found: {}", found);
//!
//!   if let Some(event) = sub.next().await {
//!     println!("Change: {:?}", event?);
//!   }
//!   sub.stop().await;
//!   Ok(())
//! }
//! ```

mod client;
mod error;
pub mod ffi;
mod gauge;
mod handle;
pub mod loopback;
mod marshal;
pub mod protocol;
mod request;
mod response;
mod watch;

pub use client::{enable_native_tracing, Client, ClientOptions};
pub use error::{Error, Result};
#[cfg(feature = "native")]
pub use ffi::NativeLibrary;
pub use ffi::NativeApi;
pub use gauge::GaugeRegistry;
pub use handle::ClientHandle;
pub use protocol::{
  GaugeKind, GaugeValue, WatchEvent, DEFAULT_AGENT_NAME, DEFAULT_GAUGE_INTERVAL,
  DEFAULT_POLL_INTERVAL,
};
pub use request::{InsertSpec, QuerySpec, WatchSpec};
pub use watch::{PollerConfig, PollerExit, Subscription};
