//! Compact command implementation.

use super::{log_path, open_copy};
use std::path::Path;
use subsync_core::{CompactionStats, Schema, StoreConfig, SubscriptionStore};

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let file = log_path(path)?;

    println!("Compacting subscription log at {}", file.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(&file, dry_run)?;
    print_stats(&stats);

    if !dry_run {
        println!();
        println!("✓ Compaction complete");
    }
    Ok(())
}

/// Compacts the log at `file`, or an in-memory copy of it when `dry_run`.
pub fn compact(file: &Path, dry_run: bool) -> Result<CompactionStats, Box<dyn std::error::Error>> {
    if dry_run {
        return Ok(open_copy(file)?.compact()?);
    }

    let store = SubscriptionStore::open_file(
        file,
        Schema::new(),
        StoreConfig::new().compact_threshold(0),
    )?;
    Ok(store.compact()?)
}

fn print_stats(stats: &CompactionStats) {
    println!("Compaction Analysis:");
    println!("  Records before: {}", stats.records_before);
    println!("  Records after:  {}", stats.records_after);
    println!();
    println!("  Size before: {} bytes", stats.bytes_before);
    println!("  Size after:  {} bytes", stats.bytes_after);
    let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        saved,
        if stats.bytes_before > 0 {
            (saved as f64 / stats.bytes_before as f64) * 100.0
        } else {
            0.0
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::inspect::inspect;
    use crate::commands::test_support::sample_log;
    use tempfile::TempDir;

    #[test]
    fn dry_run_leaves_the_file_alone() {
        let dir = TempDir::new().unwrap();
        let file = sample_log(dir.path());
        let before = std::fs::read(&file).unwrap();

        let stats = compact(&file, true).unwrap();
        assert_eq!(stats.records_before, 6);
        assert_eq!(stats.records_after, 2);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(std::fs::read(&file).unwrap(), before);
    }

    #[test]
    fn compaction_keeps_the_latest_set() {
        let dir = TempDir::new().unwrap();
        let file = sample_log(dir.path());

        let stats = compact(&file, false).unwrap();
        assert_eq!(stats.records_after, 2);
        assert_eq!(std::fs::metadata(&file).unwrap().len(), stats.bytes_after);

        let result = inspect(dir.path(), true).unwrap();
        assert_eq!(result.record_count, 2);
        assert_eq!(result.latest_version, Some(2));
        assert_eq!(result.state.as_deref(), Some("ERROR"));
        assert_eq!(result.subscription_count, 2);
    }
}
