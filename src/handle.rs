//! Ownership of the native connection resource.

use std::ptr::NonNull;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::ffi::{ClientWrapper, NativeApi};
use crate::response::copy_string;

/// Owns one native `ClientWrapper` and releases it exactly once.
pub struct ClientHandle {
  api: Arc<dyn NativeApi>,
  ptr: Option<NonNull<ClientWrapper>>,
}

// SAFETY: the native client is internally synchronized and not bound to the
// thread that created it. Release requires `&mut self`, so it cannot overlap
// an in-flight call made through `&self`.
unsafe impl Send for ClientHandle {}
unsafe impl Sync for ClientHandle {}

impl ClientHandle {
  /// Allocate a native client.
  pub fn create(api: Arc<dyn NativeApi>) -> Result<Self> {
    let raw = api.create_client();
    let Some(ptr) = NonNull::new(raw) else {
      return Err(Error::ConnectionInit("native library returned no client".to_string()));
    };

    // SAFETY: non-null pointer freshly returned by create_client.
    let wrapper = unsafe { ptr.as_ref() };
    if !wrapper.success {
      // SAFETY: the error string lives as long as the wrapper.
      let message = unsafe { copy_string(wrapper.error) }.unwrap_or_else(|| "unknown error".to_string());
      // SAFETY: ownership of the failed wrapper is ours and ends here.
      unsafe { api.free_client(ptr.as_ptr()) };
      return Err(Error::ConnectionInit(message));
    }

    debug!("native client created");
    Ok(Self { api, ptr: Some(ptr) })
  }

  /// The live client pointer, or `UseAfterRelease`.
  pub(crate) fn get(&self) -> Result<*mut ClientWrapper> {
    self.ptr.map(NonNull::as_ptr).ok_or(Error::UseAfterRelease)
  }

  pub(crate) fn api(&self) -> &Arc<dyn NativeApi> {
    &self.api
  }

  pub fn is_released(&self) -> bool {
    self.ptr.is_none()
  }

  /// Free the native client. Repeated calls are no-ops.
  pub fn release(&mut self) {
    if let Some(ptr) = self.ptr.take() {
      // SAFETY: taken out of `self`, so this is the only free.
      unsafe { self.api.free_client(ptr.as_ptr()) };
      debug!("native client released");
    }
  }
}

impl Drop for ClientHandle {
  fn drop(&mut self) {
    self.release();
  }
}

impl std::fmt::Debug for ClientHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ClientHandle")
      .field("released", &self.is_released())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loopback::{Fault, Loopback};

  #[test]
  fn test_release_twice_is_noop() {
    let api = Arc::new(Loopback::new());
    let mut handle = ClientHandle::create(api.clone()).unwrap();
    assert_eq!(api.live_clients(), 1);
    handle.release();
    handle.release();
    assert!(handle.is_released());
    assert_eq!(api.live_clients(), 0);
    assert!(matches!(handle.get(), Err(Error::UseAfterRelease)));
  }

  #[test]
  fn test_drop_releases() {
    let api = Arc::new(Loopback::new());
    {
      let _handle = ClientHandle::create(api.clone()).unwrap();
      assert_eq!(api.live_clients(), 1);
    }
    assert_eq!(api.live_clients(), 0);
  }

  #[test]
  fn test_create_failure_frees_wrapper() {
    let api = Arc::new(Loopback::new());
    api.inject(Fault::Fail("out of handles".to_string()));
    match ClientHandle::create(api.clone()) {
      Err(Error::ConnectionInit(message)) => assert_eq!(message, "out of handles"),
      other => panic!("expected ConnectionInit, got {:?}", other),
    }
    assert_eq!(api.live_clients(), 0);
  }

  #[test]
  fn test_create_null() {
    let api = Arc::new(Loopback::new());
    api.inject(Fault::Null);
    assert!(matches!(ClientHandle::create(api), Err(Error::ConnectionInit(_))));
  }
}
