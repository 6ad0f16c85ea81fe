use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::stream::{SelectAll, StreamExt};
use openiap::loopback::Loopback;
use openiap::{
  enable_native_tracing, Client, ClientOptions, GaugeRegistry, GaugeValue, InsertSpec, NativeApi,
  QuerySpec, Subscription, WatchSpec,
};
use rand::Rng;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "openiap-cli")]
#[command(about = "Interactive test client for the OpenIAP native library", long_about = None)]
struct Args {
  /// Server url (defaults to OPENIAP_URL, then the library's own discovery)
  #[arg(short, long)]
  url: Option<String>,

  /// Agent name reported to the server
  #[arg(short, long)]
  agent: Option<String>,

  /// Default request timeout in seconds
  #[arg(short, long)]
  timeout: Option<u64>,

  /// Run against the in-process library instead of the linked one
  #[arg(long)]
  loopback: bool,

  /// Log filter handed to the native library
  #[arg(long, default_value = "info")]
  rust_log: String,

  /// Span events logged by the native library (e.g. "new,close")
  #[arg(long, default_value = "")]
  span_events: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let args = Args::parse();

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "openiap=info".into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let api = native_api(&args)?;
  enable_native_tracing(api.as_ref(), &args.rust_log, &args.span_events)?;

  let mut options = ClientOptions::from_env()?;
  if let Some(url) = args.url {
    options.url = url;
  }
  if let Some(agent) = args.agent {
    options.agent_name = agent;
  }
  if let Some(secs) = args.timeout {
    options.default_timeout = Some(Duration::from_secs(secs));
  }

  let mut client = Client::connect_with_options(api.clone(), options)?;
  println!("Connected successfully");
  println!("? for help");

  let gauges = GaugeRegistry::new(api);
  let mut seeded = HashSet::new();
  let mut feeds: SelectAll<Subscription> = SelectAll::new();
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  prompt();
  loop {
    tokio::select! {
      line = lines.next_line() => {
        let Some(line) = line? else { break };
        if !run_command(line.trim(), &client, &gauges, &mut seeded, &mut feeds).await? {
          break;
        }
        prompt();
      }
      Some(event) = feeds.next(), if !feeds.is_empty() => match event {
        Ok(event) => println!("Watch event: {} {}", event.operation, event.document),
        Err(e) => println!("Watch error: {}", e),
      },
    }
  }

  stop_watches(&client, &mut feeds).await;
  gauges.shutdown().await?;
  client.release();
  Ok(())
}

#[cfg(feature = "native")]
fn linked_api() -> anyhow::Result<Arc<dyn NativeApi>> {
  Ok(Arc::new(openiap::NativeLibrary))
}

#[cfg(not(feature = "native"))]
fn linked_api() -> anyhow::Result<Arc<dyn NativeApi>> {
  anyhow::bail!("built without the `native` feature; run with --loopback")
}

fn native_api(args: &Args) -> anyhow::Result<Arc<dyn NativeApi>> {
  if args.loopback {
    tracing::info!("Using the in-process library");
    return Ok(Arc::new(Loopback::new()));
  }
  linked_api()
}

fn prompt() {
  print!("> ");
  let _ = std::io::stdout().flush();
}

fn print_help() {
  println!("Available commands:");
  println!("  q     - Query entities");
  println!("  i     - Insert document");
  println!("  w     - Watch collection");
  println!("  u     - Stop all watches");
  println!("  o     - Start/Stop observable gauge (float64)");
  println!("  o2    - Start/Stop observable gauge (uint64)");
  println!("  o3    - Start/Stop observable gauge (int64)");
  println!("  quit  - Exit program");
  println!("  ?     - Show this help");
}

/// Returns `false` when the session should end.
async fn run_command(
  command: &str,
  client: &Client,
  gauges: &GaugeRegistry,
  seeded: &mut HashSet<&'static str>,
  feeds: &mut SelectAll<Subscription>,
) -> anyhow::Result<bool> {
  match command {
    "" => {}
    "quit" | "exit" => return Ok(false),
    "?" | "help" => print_help(),
    "q" => {
      let spec = QuerySpec::collection("entities")
        .filter(json!({}))
        .projection(json!({"name": 1}))
        .top(10);
      match client.query(&spec) {
        Ok(result) => println!("Query result: {}", result),
        Err(e) => println!("{}", e),
      }
    }
    "i" => {
      let spec = InsertSpec::new("entities", json!({"name": "Test from rust", "_type": "test"}));
      match client.insert_one(&spec) {
        Ok(result) => println!("Insert result: {}", result),
        Err(e) => println!("{}", e),
      }
    }
    "w" => match client.subscribe(&WatchSpec::collection("entities")) {
      Ok(sub) => {
        println!("Watch created with ID: {}", sub.watch_id());
        feeds.push(sub);
      }
      Err(e) => println!("{}", e),
    },
    "u" => stop_watches(client, feeds).await,
    "o" => {
      toggle_gauge(gauges, seeded, "test_f64", GaugeValue::F64(42.7), || {
        GaugeValue::F64(rand::thread_rng().gen_range(0.0..50.0))
      })
      .await?;
    }
    "o2" => {
      toggle_gauge(gauges, seeded, "test_u64", GaugeValue::U64(42), || {
        GaugeValue::U64(rand::thread_rng().gen_range(0..50))
      })
      .await?;
    }
    "o3" => {
      toggle_gauge(gauges, seeded, "test_i64", GaugeValue::I64(42), || {
        GaugeValue::I64(rand::thread_rng().gen_range(0..50))
      })
      .await?;
    }
    other => println!("Unknown command `{}`, ? for help", other),
  }
  Ok(true)
}

async fn stop_watches(client: &Client, feeds: &mut SelectAll<Subscription>) {
  for mut sub in std::mem::take(feeds) {
    sub.stop().await;
    match client.unwatch(sub.watch_id()) {
      Ok(()) => println!("Stopped watch {}", sub.watch_id()),
      Err(e) => println!("{}", e),
    }
  }
}

/// Stop `name` if it is running, otherwise start it. The first start in a
/// session publishes `first`; later starts publish a fresh `next()`. Either
/// way `next()` is republished every interval.
async fn toggle_gauge<F>(
  gauges: &GaugeRegistry,
  seeded: &mut HashSet<&'static str>,
  name: &'static str,
  first: GaugeValue,
  next: F,
) -> anyhow::Result<Option<GaugeValue>>
where
  F: Fn() -> GaugeValue + Send + Sync + 'static,
{
  let started = AtomicBool::new(seeded.contains(name));
  let producer = move || {
    if !started.swap(true, Ordering::SeqCst) {
      return first;
    }
    let value = next();
    println!("Setting {} to {}", name, value);
    value
  };
  let toggled = gauges.toggle(name, "test", producer).await?;
  match toggled {
    Some(value) => {
      seeded.insert(name);
      println!("Started {} to {}", name, value);
    }
    None => println!("Stopped {}", name),
  }
  Ok(toggled)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn test_restarted_gauge_reports_fresh_value() {
    let api = Arc::new(Loopback::new());
    let gauges = GaugeRegistry::new(api.clone());
    let mut seeded = HashSet::new();
    let fresh = || GaugeValue::F64(7.5);

    let started = toggle_gauge(&gauges, &mut seeded, "test_f64", GaugeValue::F64(42.7), fresh)
      .await
      .unwrap();
    assert_eq!(started, Some(GaugeValue::F64(42.7)));

    let stopped = toggle_gauge(&gauges, &mut seeded, "test_f64", GaugeValue::F64(42.7), fresh)
      .await
      .unwrap();
    assert_eq!(stopped, None);
    assert!(api.gauge("test_f64").is_none());

    let restarted = toggle_gauge(&gauges, &mut seeded, "test_f64", GaugeValue::F64(42.7), fresh)
      .await
      .unwrap();
    assert_eq!(restarted, Some(GaugeValue::F64(7.5)));
    assert_eq!(api.gauge("test_f64").unwrap().value, GaugeValue::F64(7.5));
    gauges.shutdown().await.unwrap();
  }

  #[tokio::test(start_paused = true)]
  async fn test_seed_is_per_gauge() {
    let api = Arc::new(Loopback::new());
    let gauges = GaugeRegistry::new(api.clone());
    let mut seeded = HashSet::new();

    toggle_gauge(&gauges, &mut seeded, "test_f64", GaugeValue::F64(42.7), || GaugeValue::F64(1.0))
      .await
      .unwrap();
    let other = toggle_gauge(&gauges, &mut seeded, "test_u64", GaugeValue::U64(42), || GaugeValue::U64(1))
      .await
      .unwrap();
    assert_eq!(other, Some(GaugeValue::U64(42)));
    gauges.shutdown().await.unwrap();
  }
}
