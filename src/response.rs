//! Response unmarshaling.
//!
//! A [`NativeResponse`] takes ownership of one library-allocated response and
//! hands it back to the paired `free_*` call when dropped, so the memory is
//! released exactly once on every exit path, errors included.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::ffi::{
  ConnectResponseWrapper, InsertOneResponseWrapper, NativeApi, QueryResponseWrapper,
  UnWatchResponseWrapper, WatchEventWrapper, WatchResponseWrapper,
};

/// A response type with a paired free call.
pub(crate) trait Releasable {
  /// # Safety
  ///
  /// `ptr` must come from `api` and must not be used afterwards.
  unsafe fn release(api: &dyn NativeApi, ptr: *mut Self);
}

/// A response carrying a success flag and an error string.
pub(crate) trait Status {
  fn success(&self) -> bool;
  fn error(&self) -> *const c_char;
}

macro_rules! releasable {
  ($ty:ty, $free:ident) => {
    impl Releasable for $ty {
      unsafe fn release(api: &dyn NativeApi, ptr: *mut Self) {
        unsafe { api.$free(ptr) }
      }
    }
  };
}

macro_rules! status {
  ($ty:ty) => {
    impl Status for $ty {
      fn success(&self) -> bool {
        self.success
      }
      fn error(&self) -> *const c_char {
        self.error
      }
    }
  };
}

releasable!(ConnectResponseWrapper, free_connect_response);
releasable!(QueryResponseWrapper, free_query_response);
releasable!(InsertOneResponseWrapper, free_insert_one_response);
releasable!(WatchResponseWrapper, free_watch_response);
releasable!(WatchEventWrapper, free_watch_event);
releasable!(UnWatchResponseWrapper, free_unwatch_response);

status!(ConnectResponseWrapper);
status!(QueryResponseWrapper);
status!(InsertOneResponseWrapper);
status!(WatchResponseWrapper);
status!(UnWatchResponseWrapper);

/// Scoped owner of a library-allocated response.
pub(crate) struct NativeResponse<'a, T: Releasable> {
  api: &'a dyn NativeApi,
  ptr: NonNull<T>,
}

impl<'a, T: Releasable> NativeResponse<'a, T> {
  /// Take ownership of `ptr`. Returns `None` for a null response.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live response allocated by `api`.
  pub(crate) unsafe fn from_raw(api: &'a dyn NativeApi, ptr: *mut T) -> Option<Self> {
    NonNull::new(ptr).map(|ptr| Self { api, ptr })
  }

  pub(crate) fn get(&self) -> &T {
    // SAFETY: the pointer is live until drop.
    unsafe { self.ptr.as_ref() }
  }
}

impl<T: Releasable + Status> NativeResponse<'_, T> {
  /// Check the success flag, turning a failure into `error(message)`.
  pub(crate) fn check(&self, error: fn(String) -> Error) -> Result<&T> {
    let response = self.get();
    if response.success() {
      return Ok(response);
    }
    // SAFETY: the error string lives as long as the response.
    let message = unsafe { copy_string(response.error()) }
      .unwrap_or_else(|| "unknown error".to_string());
    Err(error(message))
  }
}

impl<T: Releasable> Drop for NativeResponse<'_, T> {
  fn drop(&mut self) {
    // SAFETY: ownership was transferred in `from_raw` and ends here.
    unsafe { T::release(self.api, self.ptr.as_ptr()) }
  }
}

/// Copy a library-owned string. Null yields `None`; invalid UTF-8 is replaced.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid for
/// the duration of the call.
pub(crate) unsafe fn copy_string(ptr: *const c_char) -> Option<String> {
  if ptr.is_null() {
    return None;
  }
  Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Read a payload field that a successful response must carry.
///
/// # Safety
///
/// Same as [`copy_string`].
pub(crate) unsafe fn required_string(
  ptr: *const c_char,
  field: &str,
  error: fn(String) -> Error,
) -> Result<String> {
  unsafe { copy_string(ptr) }.ok_or_else(|| error(format!("response is missing `{}`", field)))
}
