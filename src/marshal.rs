//! Request marshaling.
//!
//! Each `Marshaled*` value owns the `CString`s of one boundary call. The
//! `#[repr(C)]` struct it lends out borrows those buffers, so the pointers can
//! never outlive the call that uses them.

use std::ffi::CString;
use std::marker::PhantomData;
use std::os::raw::c_char;

use crate::error::{Error, Result};
use crate::ffi::{InsertOneRequestWrapper, QueryRequestWrapper, WatchRequestWrapper};
use crate::request::{InsertSpec, QuerySpec, WatchSpec};

/// Copy `value` into a NUL-terminated buffer.
pub(crate) fn to_cstring(field: &'static str, value: &str) -> Result<CString> {
  CString::new(value).map_err(|e| Error::InvalidArgument {
    field,
    reason: format!("contains a NUL byte at offset {}", e.nul_position()),
  })
}

fn to_i32(field: &'static str, value: u32) -> Result<i32> {
  i32::try_from(value).map_err(|_| Error::InvalidArgument {
    field,
    reason: format!("{} exceeds {}", value, i32::MAX),
  })
}

/// A raw request struct tied to the lifetime of the buffers it points into.
pub(crate) struct Borrowed<'a, T> {
  raw: T,
  _buffers: PhantomData<&'a ()>,
}

impl<T> Borrowed<'_, T> {
  pub(crate) fn as_ptr(&self) -> *const T {
    &self.raw
  }
}

/// A single string argument.
pub(crate) struct MarshaledString(CString);

impl MarshaledString {
  pub(crate) fn new(field: &'static str, value: &str) -> Result<Self> {
    Ok(Self(to_cstring(field, value)?))
  }

  pub(crate) fn as_ptr(&self) -> *const c_char {
    self.0.as_ptr()
  }
}

pub(crate) struct MarshaledQuery {
  collection: CString,
  filter: CString,
  projection: CString,
  orderby: CString,
  queryas: CString,
  explain: bool,
  skip: i32,
  top: i32,
}

impl MarshaledQuery {
  pub(crate) fn new(spec: &QuerySpec) -> Result<Self> {
    Ok(Self {
      collection: to_cstring("collection", &spec.collection)?,
      filter: to_cstring("filter", &spec.filter)?,
      projection: to_cstring("projection", &spec.projection)?,
      orderby: to_cstring("orderby", &spec.orderby)?,
      queryas: to_cstring("queryas", &spec.queryas)?,
      explain: spec.explain,
      skip: to_i32("skip", spec.skip)?,
      top: to_i32("top", spec.top)?,
    })
  }

  pub(crate) fn raw(&self) -> Borrowed<'_, QueryRequestWrapper> {
    Borrowed {
      raw: QueryRequestWrapper {
        collectionname: self.collection.as_ptr(),
        query: self.filter.as_ptr(),
        projection: self.projection.as_ptr(),
        orderby: self.orderby.as_ptr(),
        queryas: self.queryas.as_ptr(),
        explain: self.explain,
        skip: self.skip,
        top: self.top,
        request_id: 0,
      },
      _buffers: PhantomData,
    }
  }
}

pub(crate) struct MarshaledInsert {
  collection: CString,
  item: CString,
  w: i32,
  j: bool,
}

impl MarshaledInsert {
  pub(crate) fn new(spec: &InsertSpec) -> Result<Self> {
    Ok(Self {
      collection: to_cstring("collection", &spec.collection)?,
      item: to_cstring("item", &spec.item)?,
      w: spec.w,
      j: spec.j,
    })
  }

  pub(crate) fn raw(&self) -> Borrowed<'_, InsertOneRequestWrapper> {
    Borrowed {
      raw: InsertOneRequestWrapper {
        collectionname: self.collection.as_ptr(),
        item: self.item.as_ptr(),
        w: self.w,
        j: self.j,
        request_id: 0,
      },
      _buffers: PhantomData,
    }
  }
}

pub(crate) struct MarshaledWatch {
  collection: CString,
  paths: CString,
}

impl MarshaledWatch {
  pub(crate) fn new(spec: &WatchSpec) -> Result<Self> {
    // The library splits the path list on commas.
    if let Some(path) = spec.paths.iter().find(|p| p.contains(',')) {
      return Err(Error::InvalidArgument {
        field: "paths",
        reason: format!("path `{}` contains a comma", path),
      });
    }
    Ok(Self {
      collection: to_cstring("collection", &spec.collection)?,
      paths: to_cstring("paths", &spec.paths.join(","))?,
    })
  }

  pub(crate) fn raw(&self) -> Borrowed<'_, WatchRequestWrapper> {
    Borrowed {
      raw: WatchRequestWrapper {
        collectionname: self.collection.as_ptr(),
        paths: self.paths.as_ptr(),
        request_id: 0,
      },
      _buffers: PhantomData,
    }
  }
}
