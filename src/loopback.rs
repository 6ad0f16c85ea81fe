//! In-process implementation of the native boundary.
//!
//! [`Loopback`] allocates its responses the same way the native library does
//! (`Box::into_raw` for wrappers, `CString::into_raw` for strings), keeps an
//! in-memory document store and per-subscription event queues, and records
//! published gauge values. It counts every response it hands out so callers
//! can assert that each one came back through its free call, and it accepts
//! injected faults for the next boundary call.
//!
//! Used by the test suite and by `openiap-cli --loopback`.

use std::collections::{HashMap, VecDeque};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ffi::{
  ClientWrapper, ConnectResponseWrapper, InsertOneRequestWrapper, InsertOneResponseWrapper,
  NativeApi, QueryRequestWrapper, QueryResponseWrapper, UnWatchResponseWrapper,
  WatchEventWrapper, WatchRequestWrapper, WatchResponseWrapper,
};
use crate::protocol::GaugeValue;

/// Endpoint used when `connect` is given an empty url.
pub const DEFAULT_URL: &str = "grpc://localhost:50051";

const SCHEMES: [&str; 5] = ["grpc://", "ws://", "wss://", "http://", "https://"];
const DEFAULT_TOP: usize = 100;
const DEFAULT_TIMEOUT_SECS: i32 = 60;

/// A failure to produce on the next boundary call that returns a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
  /// Respond with `success = false` and this message. `next_watch_event`
  /// answers with a malformed event that has no `operation`.
  Fail(String),
  /// Return a null pointer.
  Null,
}

/// A gauge as last published.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedGauge {
  pub value: GaugeValue,
  pub description: String,
}

#[repr(C)]
struct LoopbackClient {
  header: ClientWrapper,
  state: Mutex<ClientState>,
}

#[derive(Debug)]
struct ClientState {
  url: Option<String>,
  agent_name: String,
  default_timeout: i32,
}

struct Subscription {
  collection: String,
  paths: Vec<String>,
  queue: VecDeque<(String, String)>,
}

#[derive(Default)]
struct Store {
  collections: HashMap<String, Vec<Map<String, Value>>>,
  watches: HashMap<String, Subscription>,
  gauges: HashMap<String, PublishedGauge>,
  gauge_history: Vec<(String, GaugeValue)>,
  last_agent_name: Option<String>,
  tracing: Option<(String, String)>,
}

/// In-process stand-in for the native library.
#[derive(Default)]
pub struct Loopback {
  store: Mutex<Store>,
  faults: Mutex<VecDeque<Fault>>,
  outstanding: AtomicUsize,
  live_clients: AtomicUsize,
}

impl Loopback {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue a fault for an upcoming boundary call.
  pub fn inject(&self, fault: Fault) {
    self.faults.lock().push_back(fault);
  }

  /// Responses handed out and not yet freed.
  pub fn outstanding(&self) -> usize {
    self.outstanding.load(Ordering::SeqCst)
  }

  /// Clients created and not yet freed.
  pub fn live_clients(&self) -> usize {
    self.live_clients.load(Ordering::SeqCst)
  }

  /// Count `ptr` as an outstanding response.
  pub fn track<T>(&self, ptr: *mut T) -> *mut T {
    self.outstanding.fetch_add(1, Ordering::SeqCst);
    ptr
  }

  /// Queue a change event on an existing subscription.
  pub fn push_event(&self, watchid: &str, operation: &str, document: Value) -> bool {
    let mut store = self.store.lock();
    match store.watches.get_mut(watchid) {
      Some(sub) => {
        sub.queue.push_back((operation.to_string(), document.to_string()));
        true
      }
      None => false,
    }
  }

  pub fn has_watch(&self, watchid: &str) -> bool {
    self.store.lock().watches.contains_key(watchid)
  }

  pub fn documents(&self, collection: &str) -> Vec<Value> {
    self.store
      .lock()
      .collections
      .get(collection)
      .map(|docs| docs.iter().cloned().map(Value::Object).collect())
      .unwrap_or_default()
  }

  /// The gauge as currently published, or `None` if never set or disabled.
  pub fn gauge(&self, name: &str) -> Option<PublishedGauge> {
    self.store.lock().gauges.get(name).cloned()
  }

  /// Every value published for `name`, oldest first.
  pub fn gauge_history(&self, name: &str) -> Vec<GaugeValue> {
    self.store
      .lock()
      .gauge_history
      .iter()
      .filter(|(n, _)| n == name)
      .map(|(_, v)| *v)
      .collect()
  }

  pub fn last_agent_name(&self) -> Option<String> {
    self.store.lock().last_agent_name.clone()
  }

  pub fn tracing_config(&self) -> Option<(String, String)> {
    self.store.lock().tracing.clone()
  }

  fn next_fault(&self) -> Option<Fault> {
    self.faults.lock().pop_front()
  }

  fn alloc<T>(&self, value: T) -> *mut T {
    self.track(Box::into_raw(Box::new(value)))
  }

  /// Reclaim a response allocated by `alloc`, along with its strings.
  unsafe fn reclaim<T>(&self, ptr: *mut T, strings: impl FnOnce(&T) -> Vec<*const c_char>) {
    if ptr.is_null() {
      return;
    }
    let response = unsafe { Box::from_raw(ptr) };
    for s in strings(&response) {
      unsafe { free_string(s) };
    }
    self.outstanding.fetch_sub(1, Ordering::SeqCst);
  }

  unsafe fn client<'a>(&self, client: *mut ClientWrapper) -> Option<&'a LoopbackClient> {
    if client.is_null() {
      return None;
    }
    Some(unsafe { &*(client as *const LoopbackClient) })
  }

  /// The connected client, or the native library's error message.
  unsafe fn connected(&self, client: *mut ClientWrapper) -> Result<(), String> {
    match unsafe { self.client(client) } {
      Some(c) if c.state.lock().url.is_some() => Ok(()),
      _ => Err("Client is not connected".to_string()),
    }
  }

  fn run_query(
    &self,
    collection: &str,
    filter: &str,
    projection: &str,
    orderby: &str,
    skip: usize,
    top: usize,
  ) -> Result<String, String> {
    if collection.is_empty() {
      return Err("Collection name is required".to_string());
    }
    let filter = parse_object("query", filter)?;
    let projection = parse_object("projection", projection)?;

    let store = self.store.lock();
    let mut docs: Vec<&Map<String, Value>> = store
      .collections
      .get(collection)
      .map(|docs| docs.iter().filter(|d| matches(d, &filter)).collect())
      .unwrap_or_default();

    if let Some((field, descending)) = parse_order(orderby)? {
      docs.sort_by(|a, b| {
        let ord = compare(a.get(&field), b.get(&field));
        if descending {
          ord.reverse()
        } else {
          ord
        }
      });
    }

    let top = if top == 0 { DEFAULT_TOP } else { top };
    let results: Vec<Value> = docs
      .into_iter()
      .skip(skip)
      .take(top)
      .map(|d| Value::Object(project(d, &projection)))
      .collect();
    Ok(Value::Array(results).to_string())
  }

  fn run_insert(&self, collection: &str, item: &str) -> Result<String, String> {
    if collection.is_empty() {
      return Err("Collection name is required".to_string());
    }
    let mut doc = match serde_json::from_str::<Value>(item) {
      Ok(Value::Object(map)) => map,
      Ok(_) => return Err("item must be a JSON object".to_string()),
      Err(e) => return Err(format!("item is not valid JSON: {}", e)),
    };
    let now = chrono::Utc::now().to_rfc3339();
    doc
      .entry("_id")
      .or_insert_with(|| Value::String(Uuid::new_v4().simple().to_string()));
    doc.insert("_created".to_string(), Value::String(now.clone()));
    doc.insert("_modified".to_string(), Value::String(now));

    let text = Value::Object(doc.clone()).to_string();
    let mut store = self.store.lock();
    for (id, sub) in store.watches.iter_mut() {
      if sub.collection == collection
        && (sub.paths.is_empty() || sub.paths.iter().any(|p| doc.contains_key(p)))
      {
        trace!(watchid = %id, "queue insert event");
        sub.queue.push_back(("insert".to_string(), text.clone()));
      }
    }
    store.collections.entry(collection.to_string()).or_default().push(doc);
    Ok(text)
  }

  fn publish(&self, name: *const c_char, value: GaugeValue, description: *const c_char) {
    let name = unsafe { read(name) };
    let description = unsafe { read(description) };
    debug!(gauge = %name, %value, "publish gauge");
    let mut store = self.store.lock();
    store.gauge_history.push((name.clone(), value));
    store.gauges.insert(name, PublishedGauge { value, description });
  }
}

unsafe fn read(ptr: *const c_char) -> String {
  if ptr.is_null() {
    return String::new();
  }
  unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn alloc_string(s: &str) -> *const c_char {
  CString::new(s).unwrap_or_default().into_raw()
}

unsafe fn free_string(ptr: *const c_char) {
  if !ptr.is_null() {
    drop(unsafe { CString::from_raw(ptr as *mut c_char) });
  }
}

fn parse_object(field: &str, text: &str) -> Result<Map<String, Value>, String> {
  if text.trim().is_empty() {
    return Ok(Map::new());
  }
  match serde_json::from_str::<Value>(text) {
    Ok(Value::Object(map)) => Ok(map),
    Ok(_) => Err(format!("{} must be a JSON object", field)),
    Err(e) => Err(format!("{} is not valid JSON: {}", field, e)),
  }
}

/// `{"field": 1|-1}` or a bare field name.
fn parse_order(text: &str) -> Result<Option<(String, bool)>, String> {
  let text = text.trim();
  if text.is_empty() {
    return Ok(None);
  }
  if !text.starts_with('{') {
    return Ok(Some((text.to_string(), false)));
  }
  let order = parse_object("orderby", text)?;
  Ok(order
    .into_iter()
    .next()
    .map(|(field, dir)| (field, dir.as_i64().unwrap_or(1) < 0)))
}

fn matches(doc: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
  filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

fn project(doc: &Map<String, Value>, projection: &Map<String, Value>) -> Map<String, Value> {
  let included: Vec<&String> = projection
    .iter()
    .filter(|(_, v)| v.as_i64() == Some(1) || v.as_bool() == Some(true))
    .map(|(k, _)| k)
    .collect();
  if included.is_empty() {
    return doc.clone();
  }
  doc
    .iter()
    .filter(|(k, _)| k.as_str() == "_id" || included.contains(k))
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect()
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
  use std::cmp::Ordering;
  match (a, b) {
    (Some(Value::Number(x)), Some(Value::Number(y))) => x
      .as_f64()
      .partial_cmp(&y.as_f64())
      .unwrap_or(Ordering::Equal),
    (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
    (None, Some(_)) => Ordering::Less,
    (Some(_), None) => Ordering::Greater,
    _ => Ordering::Equal,
  }
}

// SAFETY: every response is allocated with Box::into_raw and reclaimed only in
// its matching free method; all shared state sits behind mutexes or atomics.
unsafe impl NativeApi for Loopback {
  fn create_client(&self) -> *mut ClientWrapper {
    let (success, error) = match self.next_fault() {
      Some(Fault::Null) => return ptr::null_mut(),
      Some(Fault::Fail(message)) => (false, alloc_string(&message)),
      None => (true, ptr::null()),
    };
    self.live_clients.fetch_add(1, Ordering::SeqCst);
    let client = Box::new(LoopbackClient {
      header: ClientWrapper {
        success,
        error,
        _opaque: [],
      },
      state: Mutex::new(ClientState {
        url: None,
        agent_name: String::new(),
        default_timeout: DEFAULT_TIMEOUT_SECS,
      }),
    });
    Box::into_raw(client) as *mut ClientWrapper
  }

  unsafe fn free_client(&self, client: *mut ClientWrapper) {
    if client.is_null() {
      return;
    }
    let client = unsafe { Box::from_raw(client as *mut LoopbackClient) };
    unsafe { free_string(client.header.error) };
    self.live_clients.fetch_sub(1, Ordering::SeqCst);
  }

  unsafe fn client_set_agent_name(&self, client: *mut ClientWrapper, name: *const c_char) {
    let name = unsafe { read(name) };
    if let Some(c) = unsafe { self.client(client) } {
      c.state.lock().agent_name = name.clone();
    }
    self.store.lock().last_agent_name = Some(name);
  }

  unsafe fn client_set_default_timeout(&self, client: *mut ClientWrapper, seconds: i32) {
    if let Some(c) = unsafe { self.client(client) } {
      c.state.lock().default_timeout = seconds;
    }
  }

  unsafe fn client_get_default_timeout(&self, client: *mut ClientWrapper) -> i32 {
    unsafe { self.client(client) }
      .map(|c| c.state.lock().default_timeout)
      .unwrap_or(DEFAULT_TIMEOUT_SECS)
  }

  unsafe fn enable_tracing(&self, rust_log: *const c_char, tracing: *const c_char) {
    let config = unsafe { (read(rust_log), read(tracing)) };
    self.store.lock().tracing = Some(config);
  }

  unsafe fn client_connect(
    &self,
    client: *mut ClientWrapper,
    url: *const c_char,
  ) -> *mut ConnectResponseWrapper {
    let result = match self.next_fault() {
      Some(Fault::Null) => return ptr::null_mut(),
      Some(Fault::Fail(message)) => Err(message),
      None => {
        let url = unsafe { read(url) };
        let url = if url.is_empty() { DEFAULT_URL.to_string() } else { url };
        match unsafe { self.client(client) } {
          None => Err("Client is not initialized".to_string()),
          Some(_) if !SCHEMES.iter().any(|s| url.starts_with(s)) => {
            Err(format!("Connection failed: unsupported url {}", url))
          }
          Some(c) => {
            debug!(%url, "loopback connected");
            c.state.lock().url = Some(url);
            Ok(())
          }
        }
      }
    };
    let (success, error) = match result {
      Ok(()) => (true, ptr::null()),
      Err(message) => (false, alloc_string(&message)),
    };
    self.alloc(ConnectResponseWrapper {
      success,
      error,
      request_id: 0,
    })
  }

  unsafe fn free_connect_response(&self, response: *mut ConnectResponseWrapper) {
    unsafe { self.reclaim(response, |r| vec![r.error]) }
  }

  unsafe fn query(
    &self,
    client: *mut ClientWrapper,
    options: *const QueryRequestWrapper,
  ) -> *mut QueryResponseWrapper {
    let result = match self.next_fault() {
      Some(Fault::Null) => return ptr::null_mut(),
      Some(Fault::Fail(message)) => Err(message),
      None if options.is_null() => Err("Invalid options".to_string()),
      None => unsafe { self.connected(client) }.and_then(|()| {
        let o = unsafe { &*options };
        let (collection, filter, projection, orderby) =
          unsafe { (read(o.collectionname), read(o.query), read(o.projection), read(o.orderby)) };
        let skip = usize::try_from(o.skip).unwrap_or(0);
        let top = usize::try_from(o.top).unwrap_or(0);
        if o.explain {
          return Ok(serde_json::json!({"collection": collection, "filter": filter, "stage": "COLLSCAN"}).to_string());
        }
        self.run_query(&collection, &filter, &projection, &orderby, skip, top)
      }),
    };
    let (success, results, error) = match result {
      Ok(results) => (true, alloc_string(&results), ptr::null()),
      Err(message) => (false, ptr::null(), alloc_string(&message)),
    };
    self.alloc(QueryResponseWrapper {
      success,
      results,
      error,
      request_id: 0,
    })
  }

  unsafe fn free_query_response(&self, response: *mut QueryResponseWrapper) {
    unsafe { self.reclaim(response, |r| vec![r.results, r.error]) }
  }

  unsafe fn insert_one(
    &self,
    client: *mut ClientWrapper,
    options: *const InsertOneRequestWrapper,
  ) -> *mut InsertOneResponseWrapper {
    let result = match self.next_fault() {
      Some(Fault::Null) => return ptr::null_mut(),
      Some(Fault::Fail(message)) => Err(message),
      None if options.is_null() => Err("Invalid options".to_string()),
      None => unsafe { self.connected(client) }.and_then(|()| {
        let o = unsafe { &*options };
        let (collection, item) = unsafe { (read(o.collectionname), read(o.item)) };
        self.run_insert(&collection, &item)
      }),
    };
    let (success, doc, error) = match result {
      Ok(doc) => (true, alloc_string(&doc), ptr::null()),
      Err(message) => (false, ptr::null(), alloc_string(&message)),
    };
    self.alloc(InsertOneResponseWrapper {
      success,
      result: doc,
      error,
      request_id: 0,
    })
  }

  unsafe fn free_insert_one_response(&self, response: *mut InsertOneResponseWrapper) {
    unsafe { self.reclaim(response, |r| vec![r.result, r.error]) }
  }

  unsafe fn watch(
    &self,
    client: *mut ClientWrapper,
    options: *const WatchRequestWrapper,
  ) -> *mut WatchResponseWrapper {
    let result = match self.next_fault() {
      Some(Fault::Null) => return ptr::null_mut(),
      Some(Fault::Fail(message)) => Err(message),
      None if options.is_null() => Err("Invalid options".to_string()),
      None => unsafe { self.connected(client) }.and_then(|()| {
        let o = unsafe { &*options };
        let (collection, paths) = unsafe { (read(o.collectionname), read(o.paths)) };
        if collection.is_empty() {
          return Err("Collection name is required".to_string());
        }
        let paths = paths
          .split(',')
          .filter(|p| !p.is_empty())
          .map(str::to_string)
          .collect();
        let id = Uuid::new_v4().to_string();
        self.store.lock().watches.insert(
          id.clone(),
          Subscription {
            collection,
            paths,
            queue: VecDeque::new(),
          },
        );
        Ok(id)
      }),
    };
    let (success, watchid, error) = match result {
      Ok(id) => (true, alloc_string(&id), ptr::null()),
      Err(message) => (false, ptr::null(), alloc_string(&message)),
    };
    self.alloc(WatchResponseWrapper {
      success,
      watchid,
      error,
      request_id: 0,
    })
  }

  unsafe fn free_watch_response(&self, response: *mut WatchResponseWrapper) {
    unsafe { self.reclaim(response, |r| vec![r.watchid, r.error]) }
  }

  unsafe fn next_watch_event(&self, watchid: *const c_char) -> *mut WatchEventWrapper {
    let watchid = unsafe { read(watchid) };
    let wrapper = match self.next_fault() {
      Some(Fault::Null) => return ptr::null_mut(),
      Some(Fault::Fail(_)) => WatchEventWrapper {
        id: alloc_string(&watchid),
        operation: ptr::null(),
        document: ptr::null(),
        request_id: 0,
      },
      None => {
        let event = self
          .store
          .lock()
          .watches
          .get_mut(&watchid)
          .and_then(|sub| sub.queue.pop_front());
        match event {
          Some((operation, document)) => WatchEventWrapper {
            id: alloc_string(&watchid),
            operation: alloc_string(&operation),
            document: alloc_string(&document),
            request_id: 0,
          },
          None => WatchEventWrapper {
            id: ptr::null(),
            operation: ptr::null(),
            document: ptr::null(),
            request_id: 0,
          },
        }
      }
    };
    self.alloc(wrapper)
  }

  unsafe fn free_watch_event(&self, event: *mut WatchEventWrapper) {
    unsafe { self.reclaim(event, |e| vec![e.id, e.operation, e.document]) }
  }

  unsafe fn unwatch(
    &self,
    client: *mut ClientWrapper,
    watchid: *const c_char,
  ) -> *mut UnWatchResponseWrapper {
    let result = match self.next_fault() {
      Some(Fault::Null) => return ptr::null_mut(),
      Some(Fault::Fail(message)) => Err(message),
      None => unsafe { self.connected(client) }.and_then(|()| {
        let watchid = unsafe { read(watchid) };
        if watchid.is_empty() {
          return Err("Watchid is required".to_string());
        }
        match self.store.lock().watches.remove(&watchid) {
          Some(_) => Ok(()),
          None => Err(format!("Watch {} not found", watchid)),
        }
      }),
    };
    let (success, error) = match result {
      Ok(()) => (true, ptr::null()),
      Err(message) => (false, alloc_string(&message)),
    };
    self.alloc(UnWatchResponseWrapper {
      success,
      error,
      request_id: 0,
    })
  }

  unsafe fn free_unwatch_response(&self, response: *mut UnWatchResponseWrapper) {
    unsafe { self.reclaim(response, |r| vec![r.error]) }
  }

  unsafe fn set_f64_observable_gauge(&self, name: *const c_char, value: f64, description: *const c_char) {
    self.publish(name, GaugeValue::F64(value), description);
  }

  unsafe fn set_u64_observable_gauge(&self, name: *const c_char, value: u64, description: *const c_char) {
    self.publish(name, GaugeValue::U64(value), description);
  }

  unsafe fn set_i64_observable_gauge(&self, name: *const c_char, value: i64, description: *const c_char) {
    self.publish(name, GaugeValue::I64(value), description);
  }

  unsafe fn disable_observable_gauge(&self, name: *const c_char) {
    let name = unsafe { read(name) };
    debug!(gauge = %name, "disable gauge");
    self.store.lock().gauges.remove(&name);
  }
}
