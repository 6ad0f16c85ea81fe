//! Client facade over the native library.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::ffi::{ClientWrapper, NativeApi};
use crate::handle::ClientHandle;
use crate::marshal::{MarshaledInsert, MarshaledQuery, MarshaledString, MarshaledWatch};
use crate::protocol::{WatchEvent, DEFAULT_AGENT_NAME, DEFAULT_POLL_INTERVAL};
use crate::request::{InsertSpec, QuerySpec, WatchSpec};
use crate::response::{required_string, NativeResponse, Releasable, Status};
use crate::watch::{self, PollerConfig, Subscription};

/// Connection settings applied by [`Client::connect_with_options`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
  /// Server url. Empty lets the native library discover it from its own
  /// environment.
  pub url: String,
  pub agent_name: String,
  pub default_timeout: Option<Duration>,
  /// Poller cadence used by [`Client::subscribe`].
  pub poll_interval: Duration,
}

impl Default for ClientOptions {
  fn default() -> Self {
    Self {
      url: String::new(),
      agent_name: DEFAULT_AGENT_NAME.to_string(),
      default_timeout: None,
      poll_interval: DEFAULT_POLL_INTERVAL,
    }
  }
}

impl ClientOptions {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      ..Self::default()
    }
  }

  pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
    self.agent_name = name.into();
    self
  }

  pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
    self.default_timeout = Some(timeout);
    self
  }

  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  /// Read `OPENIAP_URL`, `OPENIAP_AGENT` and `OPENIAP_TIMEOUT` (whole seconds).
  /// Unset variables keep their defaults.
  pub fn from_env() -> Result<Self> {
    let mut options = Self::new(std::env::var("OPENIAP_URL").unwrap_or_default());
    if let Ok(agent) = std::env::var("OPENIAP_AGENT") {
      if !agent.is_empty() {
        options.agent_name = agent;
      }
    }
    if let Ok(timeout) = std::env::var("OPENIAP_TIMEOUT") {
      let secs: u64 = timeout.trim().parse().map_err(|_| Error::InvalidArgument {
        field: "OPENIAP_TIMEOUT",
        reason: format!("`{}` is not a number of seconds", timeout),
      })?;
      options.default_timeout = Some(Duration::from_secs(secs));
    }
    Ok(options)
  }
}

/// A connection to an OpenIAP server through the native client library.
///
/// Every operation blocks until the library answers. Calls made after
/// [`release`](Client::release) fail with [`Error::UseAfterRelease`].
#[derive(Debug)]
pub struct Client {
  handle: ClientHandle,
  poll_interval: Duration,
}

impl Client {
  /// Create an unconnected client reporting the default agent name.
  pub fn create(api: Arc<dyn NativeApi>) -> Result<Self> {
    let client = Self {
      handle: ClientHandle::create(api)?,
      poll_interval: DEFAULT_POLL_INTERVAL,
    };
    client.set_agent_name(DEFAULT_AGENT_NAME)?;
    Ok(client)
  }

  /// Create a client backed by the linked native library.
  #[cfg(feature = "native")]
  pub fn native() -> Result<Self> {
    Self::create(Arc::new(crate::ffi::NativeLibrary))
  }

  /// Create, configure and connect a client in one step.
  pub fn connect_with_options(api: Arc<dyn NativeApi>, options: ClientOptions) -> Result<Self> {
    let mut client = Self::create(api)?;
    client.poll_interval = options.poll_interval;
    if options.agent_name != DEFAULT_AGENT_NAME {
      client.set_agent_name(&options.agent_name)?;
    }
    if let Some(timeout) = options.default_timeout {
      client.set_default_timeout(timeout)?;
    }
    client.connect(&options.url)?;
    Ok(client)
  }

  #[instrument(skip(self))]
  pub fn connect(&self, url: &str) -> Result<()> {
    let url = MarshaledString::new("url", url)?;
    self.call(
      Error::Connection,
      "connect",
      |api, client| unsafe { api.client_connect(client, url.as_ptr()) },
      |_| Ok(()),
    )?;
    debug!("connected");
    Ok(())
  }

  /// Run a query and return the result set as JSON text.
  #[instrument(skip_all, fields(collection = %spec.collection))]
  pub fn query(&self, spec: &QuerySpec) -> Result<String> {
    let request = MarshaledQuery::new(spec)?;
    let raw = request.raw();
    self.call(
      Error::Query,
      "query",
      |api, client| unsafe { api.query(client, raw.as_ptr()) },
      |response| unsafe { required_string(response.results, "results", Error::Query) },
    )
  }

  /// Run a query and deserialize each result.
  pub fn query_as<T: DeserializeOwned>(&self, spec: &QuerySpec) -> Result<Vec<T>> {
    let results = self.query(spec)?;
    Ok(serde_json::from_str(&results)?)
  }

  /// Insert one document and return the stored document as JSON text.
  #[instrument(skip_all, fields(collection = %spec.collection))]
  pub fn insert_one(&self, spec: &InsertSpec) -> Result<String> {
    let request = MarshaledInsert::new(spec)?;
    let raw = request.raw();
    self.call(
      Error::Insert,
      "insert_one",
      |api, client| unsafe { api.insert_one(client, raw.as_ptr()) },
      |response| unsafe { required_string(response.result, "result", Error::Insert) },
    )
  }

  pub fn insert_one_as<T: DeserializeOwned>(&self, spec: &InsertSpec) -> Result<T> {
    let stored = self.insert_one(spec)?;
    Ok(serde_json::from_str(&stored)?)
  }

  /// Register a change-feed subscription and return its id. Events are read
  /// with [`next_watch_event`](Self::next_watch_event) or through
  /// [`subscribe`](Self::subscribe).
  #[instrument(skip_all, fields(collection = %spec.collection))]
  pub fn watch(&self, spec: &WatchSpec) -> Result<String> {
    let request = MarshaledWatch::new(spec)?;
    let raw = request.raw();
    let id = self.call(
      Error::Watch,
      "watch",
      |api, client| unsafe { api.watch(client, raw.as_ptr()) },
      |response| unsafe { required_string(response.watchid, "watchid", Error::Watch) },
    )?;
    debug!(watch_id = %id, "watch registered");
    Ok(id)
  }

  /// The next queued event for `watch_id`, or `None` if nothing is pending.
  pub fn next_watch_event(&self, watch_id: &str) -> Result<Option<WatchEvent>> {
    self.handle.get()?;
    let id = MarshaledString::new("watchid", watch_id)?;
    watch::next_event(self.handle.api().as_ref(), &id)
  }

  #[instrument(skip(self))]
  pub fn unwatch(&self, watch_id: &str) -> Result<()> {
    let id = MarshaledString::new("watchid", watch_id)?;
    self.call(
      Error::Unwatch,
      "unwatch",
      |api, client| unsafe { api.unwatch(client, id.as_ptr()) },
      |_| Ok(()),
    )
  }

  /// Register a watch and start polling it at the client's cadence.
  pub fn subscribe(&self, spec: &WatchSpec) -> Result<Subscription> {
    self.subscribe_with(
      spec,
      PollerConfig {
        interval: self.poll_interval,
      },
    )
  }

  pub fn subscribe_with(&self, spec: &WatchSpec, config: PollerConfig) -> Result<Subscription> {
    let id = self.watch(spec)?;
    match Subscription::spawn(self.handle.api().clone(), id.clone(), config) {
      Ok(subscription) => Ok(subscription),
      Err(e) => {
        if let Err(unwatch) = self.unwatch(&id) {
          warn!(watch_id = %id, error = %unwatch, "could not unwatch after failed subscribe");
        }
        Err(e)
      }
    }
  }

  /// Set the agent name reported to the server.
  pub fn set_agent_name(&self, name: &str) -> Result<()> {
    let client = self.handle.get()?;
    let name = MarshaledString::new("agent_name", name)?;
    // SAFETY: live client; the name buffer outlives the call.
    unsafe { self.handle.api().client_set_agent_name(client, name.as_ptr()) };
    Ok(())
  }

  /// Set the timeout the library applies to each request. The library counts
  /// whole seconds; a fractional timeout is rounded up.
  pub fn set_default_timeout(&self, timeout: Duration) -> Result<()> {
    let client = self.handle.get()?;
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    let secs = i32::try_from(secs).unwrap_or(i32::MAX);
    // SAFETY: live client.
    unsafe { self.handle.api().client_set_default_timeout(client, secs) };
    Ok(())
  }

  pub fn default_timeout(&self) -> Result<Duration> {
    let client = self.handle.get()?;
    // SAFETY: live client.
    let secs = unsafe { self.handle.api().client_get_default_timeout(client) };
    Ok(Duration::from_secs(u64::try_from(secs).unwrap_or(0)))
  }

  pub fn poll_interval(&self) -> Duration {
    self.poll_interval
  }

  pub fn api(&self) -> &Arc<dyn NativeApi> {
    self.handle.api()
  }

  pub fn is_released(&self) -> bool {
    self.handle.is_released()
  }

  /// Free the native client. Repeated calls are no-ops. Running subscriptions
  /// are not stopped; stop them first.
  pub fn release(&mut self) {
    self.handle.release();
  }

  /// One request/response round trip. The response is freed before this
  /// returns, whatever the outcome.
  fn call<T, R>(
    &self,
    error: fn(String) -> Error,
    operation: &str,
    invoke: impl FnOnce(&dyn NativeApi, *mut ClientWrapper) -> *mut T,
    read: impl FnOnce(&T) -> Result<R>,
  ) -> Result<R>
  where
    T: Releasable + Status,
  {
    let client = self.handle.get()?;
    let api = self.handle.api().as_ref();
    let raw = invoke(api, client);
    // SAFETY: `raw` was just returned by `api`.
    let Some(response) = (unsafe { NativeResponse::from_raw(api, raw) }) else {
      return Err(error(format!("{} failed: no response", operation)));
    };
    let ok = response.check(error)?;
    read(ok)
  }
}

/// Configure the native library's own log output.
pub fn enable_native_tracing(api: &dyn NativeApi, rust_log: &str, span_events: &str) -> Result<()> {
  let rust_log = MarshaledString::new("rust_log", rust_log)?;
  let span_events = MarshaledString::new("span_events", span_events)?;
  // SAFETY: both buffers outlive the call.
  unsafe { api.enable_tracing(rust_log.as_ptr(), span_events.as_ptr()) };
  Ok(())
}
