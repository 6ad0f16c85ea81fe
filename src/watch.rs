//! Change-feed polling.
//!
//! The native library queues watch events per subscription id and exposes
//! them through `next_watch_event`. A [`Subscription`] owns one background task
//! that drains that queue: while events are available it delivers them back to
//! back, and once the queue is empty it waits one [`PollerConfig::interval`]
//! before asking again. A malformed event is delivered as an error and ends the
//! subscription.
//!
//! Events go through an unbounded channel, so a slow consumer does not slow
//! the poller down.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ffi::{NativeApi, WatchEventWrapper};
use crate::marshal::MarshaledString;
use crate::protocol::{WatchEvent, DEFAULT_POLL_INTERVAL};
use crate::response::{copy_string, required_string, NativeResponse};

/// Poller settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollerConfig {
  /// Wait between polls while the queue is empty.
  pub interval: Duration,
}

impl Default for PollerConfig {
  fn default() -> Self {
    Self {
      interval: DEFAULT_POLL_INTERVAL,
    }
  }
}

/// Why a poller task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
  /// `stop` was called or the subscription was dropped.
  Stopped,
  /// The receiving side went away.
  ConsumerGone,
  /// An error was delivered and polling ended.
  Failed,
}

/// Fetch the next queued event for `watchid`. `Ok(None)` means the queue is
/// empty.
pub(crate) fn next_event(api: &dyn NativeApi, watchid: &MarshaledString) -> Result<Option<WatchEvent>> {
  // SAFETY: the id buffer outlives the call; the response comes from `api`.
  let raw = unsafe { api.next_watch_event(watchid.as_ptr()) };
  let Some(response) = (unsafe { NativeResponse::<WatchEventWrapper>::from_raw(api, raw) }) else {
    return Ok(None);
  };
  let event = response.get();
  if event.id.is_null() {
    return Ok(None);
  }
  // SAFETY: strings live as long as `response`.
  unsafe {
    Ok(Some(WatchEvent {
      id: required_string(event.id, "id", Error::Watch)?,
      operation: required_string(event.operation, "operation", Error::Watch)?,
      document: copy_string(event.document).unwrap_or_default(),
    }))
  }
}

/// A live change-feed subscription.
///
/// Dropping a subscription signals its poller to stop without waiting for it;
/// use [`Subscription::stop`] to wait.
pub struct Subscription {
  watch_id: String,
  events: mpsc::UnboundedReceiver<Result<WatchEvent>>,
  shutdown: watch::Sender<bool>,
  task: Option<JoinHandle<PollerExit>>,
}

impl Subscription {
  /// Start polling `watch_id` on the current tokio runtime. The poll
  /// interval must be non-zero.
  pub fn spawn(api: Arc<dyn NativeApi>, watch_id: String, config: PollerConfig) -> Result<Self> {
    if config.interval.is_zero() {
      return Err(Error::InvalidArgument {
        field: "interval",
        reason: "must be non-zero".to_string(),
      });
    }
    let runtime = tokio::runtime::Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;
    let id = MarshaledString::new("watchid", &watch_id)?;
    let (tx, events) = mpsc::unbounded_channel();
    let (shutdown, shutdown_rx) = watch::channel(false);

    debug!(watch_id = %watch_id, interval = ?config.interval, "start poller");
    let task = runtime.spawn(poll_loop(api, id, config.interval, tx, shutdown_rx));

    Ok(Self {
      watch_id,
      events,
      shutdown,
      task: Some(task),
    })
  }

  pub fn watch_id(&self) -> &str {
    &self.watch_id
  }

  /// Next event, in the order retrieved. `None` once the poller has ended and
  /// every delivered event has been read.
  pub async fn next(&mut self) -> Option<Result<WatchEvent>> {
    self.events.recv().await
  }

  /// Next event if one has already been delivered.
  pub fn try_next(&mut self) -> Option<Result<WatchEvent>> {
    self.events.try_recv().ok()
  }

  pub fn is_finished(&self) -> bool {
    self.task.as_ref().map_or(true, JoinHandle::is_finished)
  }

  /// Stop the poller and wait until it has exited. Events delivered before the
  /// stop remain readable through [`next`](Self::next).
  pub async fn stop(&mut self) -> PollerExit {
    let _ = self.shutdown.send(true);
    let Some(task) = self.task.take() else {
      return PollerExit::Stopped;
    };
    match task.await {
      Ok(exit) => exit,
      Err(e) => {
        warn!(watch_id = %self.watch_id, error = %e, "poller task aborted");
        PollerExit::Failed
      }
    }
  }
}

impl Stream for Subscription {
  type Item = Result<WatchEvent>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.events.poll_recv(cx)
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    let _ = self.shutdown.send(true);
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("watch_id", &self.watch_id)
      .field("finished", &self.is_finished())
      .finish()
  }
}

async fn poll_loop(
  api: Arc<dyn NativeApi>,
  watch_id: MarshaledString,
  interval: Duration,
  tx: mpsc::UnboundedSender<Result<WatchEvent>>,
  mut shutdown: watch::Receiver<bool>,
) -> PollerExit {
  loop {
    if *shutdown.borrow() {
      return PollerExit::Stopped;
    }

    match next_event(api.as_ref(), &watch_id) {
      Ok(Some(event)) => {
        if tx.send(Ok(event)).is_err() {
          return PollerExit::ConsumerGone;
        }
        // Drain the backlog without waiting, but stay cooperative.
        tokio::task::yield_now().await;
        continue;
      }
      Ok(None) => {}
      Err(e) => {
        warn!(error = %e, "watch poll failed, stopping subscription");
        let _ = tx.send(Err(e));
        return PollerExit::Failed;
      }
    }

    tokio::select! {
      _ = tokio::time::sleep(interval) => {}
      changed = shutdown.changed() => {
        if changed.is_err() {
          return PollerExit::Stopped;
        }
      }
      _ = tx.closed() => return PollerExit::ConsumerGone,
    }
  }
}
