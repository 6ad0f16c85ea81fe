//! Basic example demonstrating OpenIAP Rust SDK usage.

use std::sync::Arc;
use std::time::Duration;

use openiap::loopback::Loopback;
use openiap::{
  Client, ClientOptions, GaugeRegistry, GaugeValue, InsertSpec, QuerySpec, WatchSpec,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct Entity {
  #[serde(rename = "_id")]
  id: String,
  name: String,
}

#[tokio::main]
async fn main() -> openiap::Result<()> {
  // Swap in `openiap::NativeLibrary` (feature `native`) to reach a real server.
  let api = Arc::new(Loopback::new());
  let client = Client::connect_with_options(
    api.clone(),
    ClientOptions::new("").with_agent_name("basic-demo"),
  )?;
  println!("Connected! Default timeout: {:?}", client.default_timeout()?);

  // Start watching before writing so the insert shows up as an event
  let mut sub = client.subscribe(&WatchSpec::collection("entities"))?;
  println!("Watching entities as {}", sub.watch_id());

  // Insert a document
  let stored: Entity = client.insert_one_as(&InsertSpec::new(
    "entities",
    json!({"name": "Test least", "_type": "test"}),
  ))?;
  println!("Inserted document: {:?}", stored);

  // Query documents
  let found: Vec<Entity> = client.query_as(
    &QuerySpec::collection("entities")
      .projection(json!({"name": 1}))
      .top(10),
  )?;
  for entity in &found {
    println!("Found: {} ({})", entity.name, entity.id);
  }

  // Receive the change
  match tokio::time::timeout(Duration::from_secs(1), sub.next()).await {
    Ok(Some(Ok(event))) => println!("Change: {} {}", event.operation, event.document),
    Ok(Some(Err(e))) => println!("Watch error: {}", e),
    Ok(None) | Err(_) => println!("No change received"),
  }
  sub.stop().await;
  client.unwatch(sub.watch_id())?;

  // Report a gauge
  let gauges = GaugeRegistry::new(api.clone());
  gauges
    .activate("documents", "documents inserted by this demo", || GaugeValue::U64(1))
    .await?;
  println!("Published: {:?}", api.gauge("documents"));
  gauges.shutdown().await?;

  Ok(())
}
