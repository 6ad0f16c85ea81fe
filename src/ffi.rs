//! C ABI of the native OpenIAP client library.
//!
//! The `#[repr(C)]` structs below mirror `clib_openiap.h`. Every boundary call
//! goes through the [`NativeApi`] trait so the SDK can run against either the
//! linked library ([`NativeLibrary`], feature `native`) or the in-process
//! [`Loopback`](crate::loopback::Loopback).
//!
//! # Ownership
//!
//! * Request structs are owned by the caller and only borrowed for the
//!   duration of the call.
//! * Every `*mut ...ResponseWrapper` returned by the library is owned by the
//!   library until it is handed back to its paired `free_*` call.

use std::os::raw::c_char;

/// Native connection wrapper. Only the status prefix is visible; the rest of
/// the allocation belongs to the library.
#[repr(C)]
pub struct ClientWrapper {
  pub success: bool,
  pub error: *const c_char,
  pub(crate) _opaque: [u8; 0],
}

#[repr(C)]
pub struct ConnectResponseWrapper {
  pub success: bool,
  pub error: *const c_char,
  pub request_id: i32,
}

#[repr(C)]
pub struct QueryRequestWrapper {
  pub collectionname: *const c_char,
  pub query: *const c_char,
  pub projection: *const c_char,
  pub orderby: *const c_char,
  pub queryas: *const c_char,
  pub explain: bool,
  pub skip: i32,
  pub top: i32,
  pub request_id: i32,
}

#[repr(C)]
pub struct QueryResponseWrapper {
  pub success: bool,
  pub results: *const c_char,
  pub error: *const c_char,
  pub request_id: i32,
}

#[repr(C)]
pub struct InsertOneRequestWrapper {
  pub collectionname: *const c_char,
  pub item: *const c_char,
  pub w: i32,
  pub j: bool,
  pub request_id: i32,
}

#[repr(C)]
pub struct InsertOneResponseWrapper {
  pub success: bool,
  pub result: *const c_char,
  pub error: *const c_char,
  pub request_id: i32,
}

#[repr(C)]
pub struct WatchRequestWrapper {
  pub collectionname: *const c_char,
  pub paths: *const c_char,
  pub request_id: i32,
}

#[repr(C)]
pub struct WatchResponseWrapper {
  pub success: bool,
  pub watchid: *const c_char,
  pub error: *const c_char,
  pub request_id: i32,
}

/// A queued change event. All pointers null means the queue was empty.
#[repr(C)]
pub struct WatchEventWrapper {
  pub id: *const c_char,
  pub operation: *const c_char,
  pub document: *const c_char,
  pub request_id: i32,
}

#[repr(C)]
pub struct UnWatchResponseWrapper {
  pub success: bool,
  pub error: *const c_char,
  pub request_id: i32,
}

/// The boundary calls the SDK consumes.
///
/// # Safety
///
/// Implementations must return pointers that stay valid until passed to the
/// matching `free_*` method, and must tolerate being called from any thread.
/// Callers must pass pointers obtained from this same implementation.
pub unsafe trait NativeApi: Send + Sync {
  fn create_client(&self) -> *mut ClientWrapper;
  unsafe fn free_client(&self, client: *mut ClientWrapper);

  unsafe fn client_set_agent_name(&self, client: *mut ClientWrapper, name: *const c_char);
  unsafe fn client_set_default_timeout(&self, client: *mut ClientWrapper, seconds: i32);
  unsafe fn client_get_default_timeout(&self, client: *mut ClientWrapper) -> i32;

  unsafe fn enable_tracing(&self, rust_log: *const c_char, tracing: *const c_char);

  unsafe fn client_connect(
    &self,
    client: *mut ClientWrapper,
    url: *const c_char,
  ) -> *mut ConnectResponseWrapper;
  unsafe fn free_connect_response(&self, response: *mut ConnectResponseWrapper);

  unsafe fn query(
    &self,
    client: *mut ClientWrapper,
    options: *const QueryRequestWrapper,
  ) -> *mut QueryResponseWrapper;
  unsafe fn free_query_response(&self, response: *mut QueryResponseWrapper);

  unsafe fn insert_one(
    &self,
    client: *mut ClientWrapper,
    options: *const InsertOneRequestWrapper,
  ) -> *mut InsertOneResponseWrapper;
  unsafe fn free_insert_one_response(&self, response: *mut InsertOneResponseWrapper);

  unsafe fn watch(
    &self,
    client: *mut ClientWrapper,
    options: *const WatchRequestWrapper,
  ) -> *mut WatchResponseWrapper;
  unsafe fn free_watch_response(&self, response: *mut WatchResponseWrapper);

  unsafe fn next_watch_event(&self, watchid: *const c_char) -> *mut WatchEventWrapper;
  unsafe fn free_watch_event(&self, event: *mut WatchEventWrapper);

  unsafe fn unwatch(
    &self,
    client: *mut ClientWrapper,
    watchid: *const c_char,
  ) -> *mut UnWatchResponseWrapper;
  unsafe fn free_unwatch_response(&self, response: *mut UnWatchResponseWrapper);

  unsafe fn set_f64_observable_gauge(&self, name: *const c_char, value: f64, description: *const c_char);
  unsafe fn set_u64_observable_gauge(&self, name: *const c_char, value: u64, description: *const c_char);
  unsafe fn set_i64_observable_gauge(&self, name: *const c_char, value: i64, description: *const c_char);
  unsafe fn disable_observable_gauge(&self, name: *const c_char);
}

#[cfg(feature = "native")]
mod linked {
  use super::*;

  extern "C" {
    fn create_client() -> *mut ClientWrapper;
    fn free_client(client: *mut ClientWrapper);
    fn client_set_agent_name(client: *mut ClientWrapper, name: *const c_char);
    fn client_set_default_timeout(client: *mut ClientWrapper, timeout: i32);
    fn client_get_default_timeout(client: *mut ClientWrapper) -> i32;
    fn enable_tracing(rust_log: *const c_char, tracing: *const c_char);
    fn client_connect(client: *mut ClientWrapper, url: *const c_char) -> *mut ConnectResponseWrapper;
    fn free_connect_response(response: *mut ConnectResponseWrapper);
    fn query(client: *mut ClientWrapper, options: *const QueryRequestWrapper) -> *mut QueryResponseWrapper;
    fn free_query_response(response: *mut QueryResponseWrapper);
    fn insert_one(
      client: *mut ClientWrapper,
      options: *const InsertOneRequestWrapper,
    ) -> *mut InsertOneResponseWrapper;
    fn free_insert_one_response(response: *mut InsertOneResponseWrapper);
    fn watch(client: *mut ClientWrapper, options: *const WatchRequestWrapper) -> *mut WatchResponseWrapper;
    fn free_watch_response(response: *mut WatchResponseWrapper);
    fn next_watch_event(watchid: *const c_char) -> *mut WatchEventWrapper;
    fn free_watch_event(event: *mut WatchEventWrapper);
    fn unwatch(client: *mut ClientWrapper, watchid: *const c_char) -> *mut UnWatchResponseWrapper;
    fn free_unwatch_response(response: *mut UnWatchResponseWrapper);
    fn set_f64_observable_gauge(name: *const c_char, value: f64, description: *const c_char);
    fn set_u64_observable_gauge(name: *const c_char, value: u64, description: *const c_char);
    fn set_i64_observable_gauge(name: *const c_char, value: i64, description: *const c_char);
    fn disable_observable_gauge(name: *const c_char);
  }

  /// The pre-built `libopeniap` linked at build time.
  #[derive(Debug, Default, Clone, Copy)]
  pub struct NativeLibrary;

  // SAFETY: the library allocates every response with `Box::into_raw` and
  // releases it in the matching free call; its client is internally
  // synchronized and usable from any thread.
  unsafe impl NativeApi for NativeLibrary {
    fn create_client(&self) -> *mut ClientWrapper {
      unsafe { create_client() }
    }
    unsafe fn free_client(&self, client: *mut ClientWrapper) {
      unsafe { free_client(client) }
    }
    unsafe fn client_set_agent_name(&self, client: *mut ClientWrapper, name: *const c_char) {
      unsafe { client_set_agent_name(client, name) }
    }
    unsafe fn client_set_default_timeout(&self, client: *mut ClientWrapper, seconds: i32) {
      unsafe { client_set_default_timeout(client, seconds) }
    }
    unsafe fn client_get_default_timeout(&self, client: *mut ClientWrapper) -> i32 {
      unsafe { client_get_default_timeout(client) }
    }
    unsafe fn enable_tracing(&self, rust_log: *const c_char, tracing: *const c_char) {
      unsafe { enable_tracing(rust_log, tracing) }
    }
    unsafe fn client_connect(
      &self,
      client: *mut ClientWrapper,
      url: *const c_char,
    ) -> *mut ConnectResponseWrapper {
      unsafe { client_connect(client, url) }
    }
    unsafe fn free_connect_response(&self, response: *mut ConnectResponseWrapper) {
      unsafe { free_connect_response(response) }
    }
    unsafe fn query(
      &self,
      client: *mut ClientWrapper,
      options: *const QueryRequestWrapper,
    ) -> *mut QueryResponseWrapper {
      unsafe { query(client, options) }
    }
    unsafe fn free_query_response(&self, response: *mut QueryResponseWrapper) {
      unsafe { free_query_response(response) }
    }
    unsafe fn insert_one(
      &self,
      client: *mut ClientWrapper,
      options: *const InsertOneRequestWrapper,
    ) -> *mut InsertOneResponseWrapper {
      unsafe { insert_one(client, options) }
    }
    unsafe fn free_insert_one_response(&self, response: *mut InsertOneResponseWrapper) {
      unsafe { free_insert_one_response(response) }
    }
    unsafe fn watch(
      &self,
      client: *mut ClientWrapper,
      options: *const WatchRequestWrapper,
    ) -> *mut WatchResponseWrapper {
      unsafe { watch(client, options) }
    }
    unsafe fn free_watch_response(&self, response: *mut WatchResponseWrapper) {
      unsafe { free_watch_response(response) }
    }
    unsafe fn next_watch_event(&self, watchid: *const c_char) -> *mut WatchEventWrapper {
      unsafe { next_watch_event(watchid) }
    }
    unsafe fn free_watch_event(&self, event: *mut WatchEventWrapper) {
      unsafe { free_watch_event(event) }
    }
    unsafe fn unwatch(
      &self,
      client: *mut ClientWrapper,
      watchid: *const c_char,
    ) -> *mut UnWatchResponseWrapper {
      unsafe { unwatch(client, watchid) }
    }
    unsafe fn free_unwatch_response(&self, response: *mut UnWatchResponseWrapper) {
      unsafe { free_unwatch_response(response) }
    }
    unsafe fn set_f64_observable_gauge(&self, name: *const c_char, value: f64, description: *const c_char) {
      unsafe { set_f64_observable_gauge(name, value, description) }
    }
    unsafe fn set_u64_observable_gauge(&self, name: *const c_char, value: u64, description: *const c_char) {
      unsafe { set_u64_observable_gauge(name, value, description) }
    }
    unsafe fn set_i64_observable_gauge(&self, name: *const c_char, value: i64, description: *const c_char) {
      unsafe { set_i64_observable_gauge(name, value, description) }
    }
    unsafe fn disable_observable_gauge(&self, name: *const c_char) {
      unsafe { disable_observable_gauge(name) }
    }
  }
}

#[cfg(feature = "native")]
pub use linked::NativeLibrary;
