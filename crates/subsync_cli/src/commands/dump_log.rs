//! Dump log command implementation.

use super::{load_copy, log_path};
use serde::Serialize;
use std::path::Path;
use subsync_core::log::{read_records, LogRecord};

/// Log record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Offset in the log file.
    pub offset: u64,
    /// Record type.
    pub record_type: String,
    /// Version the record is about.
    pub version: u64,
    /// New state (state changes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Server error (error state changes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Number of subscriptions (committed sets only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_count: Option<usize>,
}

impl RecordInfo {
    fn new(offset: u64, record: &LogRecord) -> Self {
        let mut info = Self {
            offset,
            record_type: format!("{:?}", record.record_type()),
            version: record.version().as_u64(),
            state: None,
            error_message: None,
            subscription_count: None,
        };
        match record {
            LogRecord::SetCommitted { subscriptions, .. } => {
                info.subscription_count = Some(subscriptions.len());
            }
            LogRecord::StateChanged {
                state,
                error_message,
                ..
            } => {
                info.state = Some(state.to_string());
                info.error_message = error_message.clone();
            }
        }
        info
    }
}

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = dump(path, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

/// Reads up to `limit` records from the log at `path`.
pub fn dump(path: &Path, limit: Option<usize>) -> Result<Vec<RecordInfo>, Box<dyn std::error::Error>> {
    let file = log_path(path)?;
    let backend = load_copy(&file)?;
    let scan = read_records(&backend)?;
    if scan.has_torn_tail() {
        tracing::warn!(torn_bytes = scan.torn_bytes(), "log ends in a torn record");
    }

    Ok(scan
        .records
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(offset, record)| RecordInfo::new(*offset, record))
        .collect())
}

fn print_text_output(records: &[RecordInfo]) {
    println!("Subscription Log Records");
    println!("========================");
    println!();

    if records.is_empty() {
        println!("No records found.");
        return;
    }

    for record in records {
        print!(
            "[{:08}] {:<14} v{}",
            record.offset, record.record_type, record.version
        );
        if let Some(count) = record.subscription_count {
            print!(" subscriptions={count}");
        }
        if let Some(state) = &record.state {
            print!(" state={state}");
        }
        if let Some(message) = &record.error_message {
            print!(" error={message:?}");
        }
        println!();
    }

    println!();
    println!("Total: {} records", records.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::sample_log;
    use tempfile::TempDir;

    #[test]
    fn dump_lists_records_in_order() {
        let dir = TempDir::new().unwrap();
        sample_log(dir.path());

        let records = dump(dir.path(), None).unwrap();
        assert_eq!(records.len(), 6);
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[0].record_type, "SetCommitted");
        assert_eq!(records[0].subscription_count, Some(1));
        assert!(records.windows(2).all(|w| w[0].offset < w[1].offset));

        let last = &records[5];
        assert_eq!(last.version, 2);
        assert_eq!(last.state.as_deref(), Some("ERROR"));
        assert_eq!(last.error_message.as_deref(), Some("unsupported clause"));
    }

    #[test]
    fn dump_respects_limit() {
        let dir = TempDir::new().unwrap();
        sample_log(dir.path());

        let records = dump(dir.path(), Some(2)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].state.as_deref(), Some("PENDING"));
    }
}
