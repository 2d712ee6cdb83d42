//! Discover receivers, connect to each and print status changes.
//!
//! ```text
//! RUST_LOG=madeavr=debug cargo run --example scan
//! ```

use madeavr::{Registry, ScanConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = Registry::default();
    let live = registry.discover(&ScanConfig::default()).await?;
    println!("Connected to {} receiver(s)", live);

    let mut tasks = Vec::new();
    for avr in registry.devices() {
        println!(
            "{} at {}:{} - sources: {}",
            avr.name(),
            avr.host(),
            avr.port(),
            avr.source_list().join(", ")
        );

        let mut updates = avr.subscribe();
        let name = avr.name().to_string();
        tasks.push(tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                println!("[{}] {} = {}", name, update.label, update.value);
            }
        }));
    }

    if tasks.is_empty() {
        return Ok(());
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = tokio::time::sleep(Duration::from_secs(60)) => {}
    }

    for avr in registry.devices() {
        println!("{}", serde_json::to_string_pretty(&avr.status_json()?)?);
    }
    registry.close_all();
    Ok(())
}
