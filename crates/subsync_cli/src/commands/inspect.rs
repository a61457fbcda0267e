//! Inspect command implementation.

use super::{log_path, open_copy};
use serde::Serialize;
use std::path::Path;
use subsync_core::LocalDatabase;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log file path.
    pub path: String,
    /// Log size in bytes.
    pub log_size: u64,
    /// Number of records in the log.
    pub record_count: usize,
    /// Latest committed version, if any.
    pub latest_version: Option<u64>,
    /// State of the latest version.
    pub state: Option<String>,
    /// Server error of the latest version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Number of subscriptions in the latest set.
    pub subscription_count: usize,
    /// Last known state of every version in the log.
    pub versions: Vec<VersionInfo>,
    /// Subscriptions of the latest set (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriptions: Option<Vec<SubscriptionInfo>>,
}

/// One version and its last known state.
#[derive(Debug, Serialize)]
pub struct VersionInfo {
    /// Version number.
    pub version: u64,
    /// State name.
    pub state: String,
}

/// One subscription of the latest set.
#[derive(Debug, Serialize)]
pub struct SubscriptionInfo {
    /// Name, absent for anonymous subscriptions.
    pub name: Option<String>,
    /// Object type.
    pub object_type: String,
    /// Query text.
    pub query: String,
    /// Creation time in milliseconds since the epoch.
    pub created_at: u64,
    /// Last update time in milliseconds since the epoch.
    pub updated_at: u64,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_subscriptions: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_subscriptions)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the inspection result without printing it.
pub fn inspect(
    path: &Path,
    show_subscriptions: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let file = log_path(path)?;
    let store = open_copy(&file)?;
    let latest = store.load_latest_snapshot()?;

    let versions = store
        .versions()
        .into_iter()
        .map(|(version, state)| VersionInfo {
            version: version.as_u64(),
            state: state.to_string(),
        })
        .collect();

    let subscriptions = match (&latest, show_subscriptions) {
        (Some(latest), true) => Some(
            latest
                .iter()
                .map(|s| SubscriptionInfo {
                    name: s.name().map(str::to_owned),
                    object_type: s.object_type().to_owned(),
                    query: s.query().to_owned(),
                    created_at: s.created_at().as_millis(),
                    updated_at: s.updated_at().as_millis(),
                })
                .collect(),
        ),
        _ => None,
    };

    Ok(InspectResult {
        path: file.display().to_string(),
        log_size: store.log_size()?,
        record_count: store.record_count(),
        latest_version: latest.as_ref().map(|l| l.version().as_u64()),
        state: latest.as_ref().map(|l| l.state().to_string()),
        error_message: latest
            .as_ref()
            .and_then(|l| l.error_message().map(str::to_owned)),
        subscription_count: latest.as_ref().map_or(0, |l| l.len()),
        versions,
        subscriptions,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("SubSync Subscription Log");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {} bytes, {} records", result.log_size, result.record_count);
    println!();

    match (result.latest_version, &result.state) {
        (Some(version), Some(state)) => {
            println!("Latest set: v{version} ({state})");
            if let Some(message) = &result.error_message {
                println!("  Error: {message}");
            }
            println!("  Subscriptions: {}", result.subscription_count);
        }
        _ => println!("Latest set: none committed"),
    }

    if !result.versions.is_empty() {
        println!();
        println!("Versions:");
        for info in &result.versions {
            println!("  v{:<6} {}", info.version, info.state);
        }
    }

    if let Some(subscriptions) = &result.subscriptions {
        println!();
        println!("Subscriptions:");
        for s in subscriptions {
            let name = s.name.as_deref().unwrap_or("<anonymous>");
            println!("  {name}: {} where {}", s.object_type, s.query);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::sample_log;
    use tempfile::TempDir;

    #[test]
    fn inspect_reports_latest_set_and_history() {
        let dir = TempDir::new().unwrap();
        sample_log(dir.path());

        let result = inspect(dir.path(), true).unwrap();
        assert_eq!(result.latest_version, Some(2));
        assert_eq!(result.error_message.as_deref(), Some("unsupported clause"));
        assert_eq!(result.subscription_count, 2);
        assert_eq!(result.record_count, 6);
        assert_eq!(result.versions.len(), 2);

        let subscriptions = result.subscriptions.unwrap();
        assert_eq!(subscriptions[0].name.as_deref(), Some("adults"));
        assert_eq!(subscriptions[1].query, "kind == 'cat' limit 3");
    }

    #[test]
    fn inspect_serializes_to_json() {
        let dir = TempDir::new().unwrap();
        sample_log(dir.path());

        let result = inspect(dir.path(), false).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["latest_version"], 2);
        assert!(json.get("subscriptions").is_none());
    }
}
