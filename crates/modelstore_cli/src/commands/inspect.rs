//! Inspect command implementation.

use super::{open_store, Unlock};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log file path.
    pub path: String,
    /// Log size in bytes.
    pub log_size: u64,
    /// Schema version from the log header.
    pub schema_version: u64,
    /// Whether commit frames are encrypted.
    pub encrypted: bool,
    /// Sequence number of the last replayed commit.
    pub sequence: u64,
    /// Per-collection statistics.
    pub collections: Vec<CollectionStats>,
}

/// Statistics for a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Primary key field, if the collection has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// Number of stored records.
    pub record_count: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, unlock: &Unlock, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, unlock)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects inspection data for the store at `path`.
pub fn inspect(path: &Path, unlock: &Unlock) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let (snapshot, header) = open_store(path, unlock)?;
    let collections = snapshot
        .collections()
        .into_iter()
        .filter_map(|name| {
            snapshot.table(name).map(|table| CollectionStats {
                name: name.to_string(),
                primary_key: table.primary_key().map(str::to_string),
                record_count: table.len(),
            })
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        log_size: std::fs::metadata(path)?.len(),
        schema_version: header.schema_version,
        encrypted: header.encrypted,
        sequence: snapshot.sequence().as_u64(),
        collections,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("modelstore inspection");
    println!("=====================");
    println!();
    println!("Path:     {}", result.path);
    println!("Size:     {}", format_size(result.log_size));
    println!("Schema:   {}", result.schema_version);
    println!("Encrypted: {}", result.encrypted);
    println!("Sequence: {}", result.sequence);
    println!();
    println!("Collections:");
    if result.collections.is_empty() {
        println!("  (none)");
    }
    for col in &result.collections {
        match &col.primary_key {
            Some(key) => println!("  {} ({} records, key {})", col.name, col.record_count, key),
            None => println!("  {} ({} records)", col.name, col.record_count),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
