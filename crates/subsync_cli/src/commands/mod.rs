//! CLI command implementations.

pub mod compact;
pub mod dump_log;
pub mod inspect;
pub mod verify;

use std::path::{Path, PathBuf};
use subsync_core::{Schema, StoreConfig, SubscriptionStore};
use subsync_storage::InMemoryBackend;
use thiserror::Error;

/// File name of the log when `--path` names a directory.
pub const DEFAULT_LOG_NAME: &str = "subscriptions.log";

/// Errors reported by the commands themselves.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No log at the given path.
    #[error("no subscription log found at {0}")]
    NotFound(String),

    /// Verification found problems.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),
}

/// Resolves `--path` to the log file.
pub fn log_path(path: &Path) -> Result<PathBuf, CommandError> {
    let file = if path.is_dir() {
        path.join(DEFAULT_LOG_NAME)
    } else {
        path.to_path_buf()
    };
    if !file.is_file() {
        return Err(CommandError::NotFound(file.display().to_string()));
    }
    Ok(file)
}

/// Loads the log into memory so read-only commands never take the file lock
/// or repair anything on disk.
pub fn load_copy(file: &Path) -> Result<InMemoryBackend, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(file)?;
    tracing::debug!(path = %file.display(), bytes = bytes.len(), "loaded log copy");
    Ok(InMemoryBackend::with_data(bytes))
}

/// Opens a store over an in-memory copy of the log.
///
/// Reading and compacting never consult the schema, so an empty one is used.
pub fn open_copy(
    file: &Path,
) -> Result<SubscriptionStore<InMemoryBackend>, Box<dyn std::error::Error>> {
    let backend = load_copy(file)?;
    Ok(SubscriptionStore::open(
        backend,
        Schema::new(),
        StoreConfig::new().compact_threshold(0),
    )?)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};
    use subsync_core::{
        LocalDatabase, MutableSubscriptionSet, Subscription, SubscriptionSetSnapshot,
        SubscriptionState,
    };
    use subsync_testkit::{sample_schema, PERSON, PET};

    /// Writes a log with two versions: v1 completes, v2 is rejected.
    pub(crate) fn sample_log(dir: &Path) -> PathBuf {
        let path = dir.join(super::DEFAULT_LOG_NAME);
        let store = subsync_core::SubscriptionStore::open_file(
            &path,
            sample_schema(),
            subsync_core::StoreConfig::default(),
        )
        .unwrap();

        let empty = SubscriptionSetSnapshot::empty();
        let mut set = MutableSubscriptionSet::new(&empty, &store);
        set.add(Subscription::new("adults", PERSON, "age >= 18").unwrap())
            .unwrap();
        let (v1, _) = set.finish().unwrap();
        store.persist(&v1).unwrap();
        let v1 = v1.with_state(SubscriptionState::Pending, None).unwrap();
        store.persist(&v1).unwrap();
        let v1 = v1.with_state(SubscriptionState::Complete, None).unwrap();
        store.persist(&v1).unwrap();

        let mut set = MutableSubscriptionSet::new(&v1, &store);
        set.add(Subscription::new("cats", PET, "kind == 'cat' limit 3").unwrap())
            .unwrap();
        let (v2, _) = set.finish().unwrap();
        store.persist(&v2).unwrap();
        let v2 = v2.with_state(SubscriptionState::Pending, None).unwrap();
        store.persist(&v2).unwrap();
        let v2 = v2
            .with_state(SubscriptionState::Error, Some("unsupported clause".into()))
            .unwrap();
        store.persist(&v2).unwrap();

        path
    }
}
