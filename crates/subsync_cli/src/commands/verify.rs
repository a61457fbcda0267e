//! Verify command implementation.

use super::{load_copy, log_path, CommandError};
use std::collections::BTreeMap;
use std::path::Path;
use subsync_core::log::{read_records, LogRecord};
use subsync_core::{SetVersion, SubscriptionState};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of intact records.
    pub records_checked: usize,
    /// Number of committed set versions.
    pub versions: usize,
    /// Bytes of an incomplete record at the end of the log.
    pub torn_bytes: u64,
    /// State records for versions no longer in the log, as left by compaction.
    pub detached_states: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let file = log_path(path)?;
    println!("Verifying subscription log at {}", file.display());
    println!();

    let result = verify(&file)?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        Err(CommandError::VerificationFailed(result.errors.len()).into())
    }
}

/// Checks framing, version order and state transitions of the log at `file`.
pub fn verify(file: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let backend = load_copy(file)?;
    let mut result = VerifyResult::default();

    let scan = match read_records(&backend) {
        Ok(scan) => scan,
        Err(e) => {
            result.errors.push(e.to_string());
            return Ok(result);
        }
    };
    result.records_checked = scan.records.len();
    result.torn_bytes = scan.torn_bytes();

    let mut last_committed: Option<SetVersion> = None;
    let mut states: BTreeMap<SetVersion, SubscriptionState> = BTreeMap::new();

    for (offset, record) in &scan.records {
        match record {
            LogRecord::SetCommitted { version, .. } => {
                if let Some(last) = last_committed.filter(|last| version <= last) {
                    result.errors.push(format!(
                        "set {version} at offset {offset} does not follow set {last}"
                    ));
                }
                last_committed = Some(*version);
                states.insert(*version, SubscriptionState::Uncommitted);
                result.versions += 1;
            }
            LogRecord::StateChanged {
                version,
                state,
                error_message,
            } => {
                if (*state == SubscriptionState::Error) != error_message.is_some() {
                    result.errors.push(format!(
                        "state {state} of {version} at offset {offset} has a mismatched error message"
                    ));
                }
                match states.get(version).copied() {
                    Some(from) if from == *state => {}
                    Some(from) if !from.can_transition_to(*state) => {
                        result.errors.push(format!(
                            "illegal transition of {version} at offset {offset}: {from} -> {state}"
                        ));
                    }
                    Some(_) => {}
                    None => result.detached_states += 1,
                }
                states.insert(*version, *state);
            }
        }
    }

    Ok(result)
}

fn print_result(result: &VerifyResult) {
    println!("  Records checked: {}", result.records_checked);
    println!("  Set versions: {}", result.versions);
    if result.detached_states > 0 {
        println!("  Detached state records: {}", result.detached_states);
    }
    if result.torn_bytes > 0 {
        println!(
            "  Torn tail: {} bytes (recoverable, truncated on next open)",
            result.torn_bytes
        );
    }

    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::sample_log;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(file: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(file).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn clean_log_passes() {
        let dir = TempDir::new().unwrap();
        let file = sample_log(dir.path());

        let result = verify(&file).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.records_checked, 6);
        assert_eq!(result.versions, 2);
        assert_eq!(result.torn_bytes, 0);
    }

    #[test]
    fn torn_tail_is_recoverable() {
        let dir = TempDir::new().unwrap();
        let file = sample_log(dir.path());
        append(&file, b"SSUB\x01");

        let result = verify(&file).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.torn_bytes, 5);
    }

    #[test]
    fn damaged_record_fails() {
        let dir = TempDir::new().unwrap();
        let file = sample_log(dir.path());
        let mut bytes = std::fs::read(&file).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&file, bytes).unwrap();

        let result = verify(&file).unwrap();
        assert!(!result.is_ok());
        assert!(run(dir.path()).is_err());
    }

    #[test]
    fn illegal_transition_fails() {
        let dir = TempDir::new().unwrap();
        let file = sample_log(dir.path());
        let record = LogRecord::StateChanged {
            version: SetVersion::new(1),
            state: SubscriptionState::Pending,
            error_message: None,
        };
        append(&file, &record.encode_frame().unwrap());

        let result = verify(&file).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("COMPLETE -> PENDING"));
    }

    #[test]
    fn out_of_order_set_fails() {
        let dir = TempDir::new().unwrap();
        let file = sample_log(dir.path());
        let record = LogRecord::SetCommitted {
            version: SetVersion::new(2),
            subscriptions: Vec::new(),
        };
        append(&file, &record.encode_frame().unwrap());

        let result = verify(&file).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("does not follow"));
    }
}
