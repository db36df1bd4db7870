//! Basic usage example for emberkv
//!
//! This example demonstrates the fundamental operations:
//! - Opening a database
//! - Writing, reading and deleting keys
//! - Values with a time-to-live
//! - Scanning from a key
//! - Compacting the sorted runs
//!
//! Run with `RUST_LOG=info cargo run --example basic` to see engine logs.

use std::time::Duration;

use anyhow::Context;
use emberkv::{Options, DB};

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init();

    let options = Options::default().flush_threshold(4 * 1024 * 1024); // 4MB

    // Open database (will be created if it doesn't exist)
    let db = DB::open("./example_data", options).context("failed to open ./example_data")?;
    println!("Database opened with {} sorted runs", db.sstable_count());

    println!("Writing data...");
    db.put(b"fruit:apple", b"red")?;
    db.put(b"fruit:banana", b"yellow")?;
    db.put(b"fruit:cherry", b"dark red")?;
    db.put(b"veg:carrot", b"orange")?;
    db.put_with_ttl(b"session:42", b"token", Duration::from_secs(5))?;

    if let Some(value) = db.get(b"fruit:apple")? {
        println!("fruit:apple => {}", String::from_utf8_lossy(&value));
    }

    println!("Deleting fruit:banana...");
    db.delete(b"fruit:banana")?;
    match db.get(b"fruit:banana")? {
        Some(_) => println!("fruit:banana still exists (unexpected)"),
        None => println!("fruit:banana was successfully deleted"),
    }

    // Persist the MemTable as a sorted run
    db.flush().context("flush failed")?;

    println!("Scanning from fruit:...");
    for item in db.iter_from(b"fruit:")? {
        let (key, value) = item?;
        if !key.starts_with(b"fruit:") {
            break;
        }
        println!("  {} => {}", String::from_utf8_lossy(&key), String::from_utf8_lossy(&value));
    }

    db.compact().context("compaction failed")?;
    println!("After compaction: {} sorted run(s)", db.sstable_count());

    db.close()?;
    println!("Database closed");

    Ok(())
}
