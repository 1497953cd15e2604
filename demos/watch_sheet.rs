//! Example demonstrating sheet watching and broadcast subscriptions.
//!
//! This example shows how to:
//! - Build a data service for one workbook
//! - Subscribe to record updates and free-form messages
//! - Start watching and pull on demand
//!
//! Run with: cargo run --example watch_sheet -- path/to/book.xlsx
//!
//! While running, save the workbook from your spreadsheet program to see a
//! broadcast for every change.

use sheetwatch::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Sheet Watch Example ===\n");

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/records.xlsx"));

    let registry = SubscriberRegistry::new();

    // Track the number of broadcasts
    let update_count = Arc::new(AtomicUsize::new(0));
    let update_count_clone = Arc::clone(&update_count);

    let _updates = registry
        .subscribe(DATA_UPDATES, move |message| {
            let count = update_count_clone.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(records) = message.payload.records() {
                println!("\n[data-updates #{}] {} rows", count, records.len());
                if let Some(first) = records.records().first() {
                    println!("  first row: {:?}", first.keys().collect::<Vec<_>>());
                }
            }
        })
        .await;

    let _messages = registry
        .subscribe(MESSAGES, |message| {
            println!("[messages] {:?}", message.payload.text());
        })
        .await;

    println!("Subscribed to '{}' and '{}'\n", DATA_UPDATES, MESSAGES);

    let service = DataService::builder()
        .with_path(&path)
        .with_retry(5, Duration::from_secs(2))
        .with_broadcaster(registry.clone())
        .build()?;

    println!("Initial pull of {}", path.display());
    let records = service.serve_pull().await?;
    println!("{}\n", records.to_json()?);

    service.start()?;
    println!("Watching {} (state: {:?})", path.display(), service.watch_state());

    let ack = service.send_message("watcher started").await?;
    println!("{}", ack);

    println!("\nPress Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;

    service.stop();
    println!(
        "\nStopped after {} broadcasts",
        update_count.load(Ordering::SeqCst)
    );
    Ok(())
}
