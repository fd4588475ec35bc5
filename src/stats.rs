//! Index statistics and health overview.
//!
//! Summarizes what the durable index holds: record and error counts, the
//! files and bytes under `data/`, a per-method breakdown, and when the last
//! checkpoint was written. Used by `vivy stats` to confirm a run landed.

use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use walkdir::WalkDir;

use vivy_ingest_core::models::{METHOD_ALL_ELEMENTS, METHOD_LAST_ELEMENT, METHOD_MARKER_SCAN};

use crate::config::Config;
use crate::index::{load_errors, load_records, IndexLayout};

/// Counts for one durable index root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub records: usize,
    pub errors: usize,
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
    /// Records whose directory is missing or empty.
    pub records_without_files: usize,
    pub by_method: BTreeMap<u8, usize>,
    pub last_checkpoint_ts: Option<i64>,
}

pub fn collect_stats(layout: &IndexLayout) -> Result<IndexStats> {
    let records = load_records(&layout.index_path())?;
    let errors = load_errors(&layout.error_path())?;

    let mut stats = IndexStats {
        records: records.len(),
        errors: errors.len(),
        ..Default::default()
    };

    let mut with_files: HashSet<String> = HashSet::new();
    let data_dir = layout.data_dir();
    if data_dir.is_dir() {
        for entry in WalkDir::new(&data_dir).min_depth(1) {
            let entry = entry?;
            if entry.depth() == 1 && entry.file_type().is_dir() {
                stats.directories += 1;
            } else if entry.file_type().is_file() {
                stats.files += 1;
                stats.bytes += entry.metadata()?.len();
                if let Ok(relative) = entry.path().strip_prefix(&data_dir) {
                    if let Some(first) = relative.components().next() {
                        with_files.insert(first.as_os_str().to_string_lossy().to_string());
                    }
                }
            }
        }
    }

    for record in &records {
        *stats.by_method.entry(record.method).or_insert(0) += 1;
        if !with_files.contains(&record.id) {
            stats.records_without_files += 1;
        }
    }

    stats.last_checkpoint_ts = std::fs::metadata(layout.index_path())
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64);

    Ok(stats)
}

/// Run the stats command: read the index and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let layout = IndexLayout::from_config(config);
    let stats = collect_stats(&layout)?;

    println!("VIVY Index Stats");
    println!("================");
    println!();
    println!("  Root:        {}", layout.root().display());
    println!("  Records:     {}", stats.records);
    println!("  Errors:      {}", stats.errors);
    println!("  Directories: {}", stats.directories);
    println!("  Files:       {} ({})", stats.files, format_bytes(stats.bytes));
    if stats.records_without_files > 0 {
        println!("  Records without files: {}", stats.records_without_files);
    }
    println!(
        "  Checkpoint:  {}",
        match stats.last_checkpoint_ts {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        }
    );

    if !stats.by_method.is_empty() {
        println!();
        println!("  By method:");
        println!("  {:<8} {:<16} {:>8}", "METHOD", "POLICY", "RECORDS");
        println!("  {}", "-".repeat(34));
        for (method, count) in &stats.by_method {
            println!("  {:<8} {:<16} {:>8}", method, method_label(*method), count);
        }
    }

    println!();
    Ok(())
}

fn method_label(method: u8) -> &'static str {
    match method {
        METHOD_MARKER_SCAN => "marker scan",
        METHOD_LAST_ELEMENT => "last element",
        METHOD_ALL_ELEMENTS => "all elements",
        _ => "other",
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
