//! Persistent subscription store.
//!
//! [`SubscriptionStore`] is the stock [`LocalDatabase`]: it owns the schema,
//! normalizes query text, and keeps every committed set and state change in
//! an append-only log on a [`StorageBackend`].

use crate::config::StoreConfig;
use crate::database::{normalize_query_text, LocalDatabase, QueryHandle};
use crate::error::{CoreError, CoreResult};
use crate::log::{read_records, LogRecord, LogScan};
use crate::schema::Schema;
use crate::snapshot::{SubscriptionSetSnapshot, SubscriptionState};
use crate::types::SetVersion;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use subsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::{debug, info, warn};

type StateEntry = (SubscriptionState, Option<String>);

/// Result of a log compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Records in the log before compaction.
    pub records_before: usize,
    /// Records in the log after compaction.
    pub records_after: usize,
    /// Log size in bytes before compaction.
    pub bytes_before: u64,
    /// Log size in bytes after compaction.
    pub bytes_after: u64,
}

struct Inner<B> {
    backend: B,
    latest: Option<SubscriptionSetSnapshot>,
    states: BTreeMap<SetVersion, StateEntry>,
    records: usize,
}

impl<B: StorageBackend> Inner<B> {
    fn append(&mut self, record: &LogRecord, sync: bool) -> CoreResult<u64> {
        let frame = record.encode_frame()?;
        let offset = self.backend.append(&frame)?;
        self.backend.flush()?;
        if sync {
            self.backend.sync()?;
        }
        self.records += 1;
        Ok(offset)
    }

    fn replay(&mut self, scan: &LogScan) -> CoreResult<()> {
        let mut latest: Option<SubscriptionSetSnapshot> = None;
        let mut states = BTreeMap::new();

        for (offset, record) in &scan.records {
            match record {
                LogRecord::SetCommitted {
                    version,
                    subscriptions,
                } => {
                    if latest.as_ref().is_some_and(|l| *version <= l.version()) {
                        return Err(CoreError::corruption(
                            *offset,
                            format!("set {version} does not follow the previous set"),
                        ));
                    }
                    let snapshot = SubscriptionSetSnapshot::from_parts(
                        *version,
                        SubscriptionState::Uncommitted,
                        None,
                        subscriptions.clone(),
                    )
                    .map_err(|e| CoreError::corruption(*offset, e.to_string()))?;
                    states.insert(*version, (SubscriptionState::Uncommitted, None));
                    latest = Some(snapshot);
                }
                LogRecord::StateChanged {
                    version,
                    state,
                    error_message,
                } => {
                    if let Some(current) = latest.as_ref().filter(|l| l.version() == *version) {
                        latest = Some(
                            SubscriptionSetSnapshot::from_parts(
                                *version,
                                *state,
                                error_message.clone(),
                                current.subscriptions().to_vec(),
                            )
                            .map_err(|e| CoreError::corruption(*offset, e.to_string()))?,
                        );
                    }
                    states.insert(*version, (*state, error_message.clone()));
                }
            }
        }

        self.latest = latest;
        self.states = states;
        self.records = scan.records.len();
        Ok(())
    }
}

/// A [`LocalDatabase`] that persists subscription sets to a log.
///
/// # Example
///
/// ```rust
/// use subsync_core::{LocalDatabase, ObjectSchema, Schema, SubscriptionStore};
///
/// let schema = Schema::new().with_object(ObjectSchema::new("Person"));
/// let store = SubscriptionStore::in_memory(schema).unwrap();
///
/// let handle = store.match_query("Person", "age  >  18").unwrap();
/// assert_eq!(handle.query(), "age > 18");
/// assert!(store.load_latest_snapshot().unwrap().is_none());
/// ```
pub struct SubscriptionStore<B: StorageBackend> {
    schema: Schema,
    config: StoreConfig,
    inner: Mutex<Inner<B>>,
}

impl SubscriptionStore<InMemoryBackend> {
    /// Opens an empty, non-persistent store.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other constructors.
    pub fn in_memory(schema: Schema) -> CoreResult<Self> {
        Self::open(InMemoryBackend::new(), schema, StoreConfig::default())
    }
}

impl SubscriptionStore<FileBackend> {
    /// Opens the log file at `path` under an exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file is locked by another process or
    /// cannot be opened, and a corruption error if the log is damaged.
    pub fn open_file(path: &Path, schema: Schema, config: StoreConfig) -> CoreResult<Self> {
        let backend = FileBackend::open_exclusive(path)?;
        Self::open(backend, schema, config)
    }
}

impl<B: StorageBackend> SubscriptionStore<B> {
    /// Opens a store over `backend`, recovering the latest snapshot.
    ///
    /// A torn record at the end of the log is truncated away.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the log is damaged, or a storage error.
    pub fn open(mut backend: B, schema: Schema, config: StoreConfig) -> CoreResult<Self> {
        let scan = read_records(&backend)?;
        if scan.has_torn_tail() {
            warn!(
                valid_len = scan.valid_len,
                torn_bytes = scan.torn_bytes(),
                "truncating torn subscription log tail"
            );
            backend.truncate(scan.valid_len)?;
        }

        let mut inner = Inner {
            backend,
            latest: None,
            states: BTreeMap::new(),
            records: 0,
        };
        inner.replay(&scan)?;

        match &inner.latest {
            Some(latest) => info!(
                version = %latest.version(),
                state = %latest.state(),
                records = inner.records,
                "opened subscription store"
            ),
            None => debug!("opened empty subscription store"),
        }

        Ok(Self {
            schema,
            config,
            inner: Mutex::new(inner),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the number of records in the log.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.inner.lock().records
    }

    /// Returns the log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend cannot report its size.
    pub fn log_size(&self) -> CoreResult<u64> {
        Ok(self.inner.lock().backend.size()?)
    }

    /// Returns the version of the latest persisted set, if any.
    #[must_use]
    pub fn latest_version(&self) -> Option<SetVersion> {
        self.inner.lock().latest.as_ref().map(|l| l.version())
    }

    /// Returns the last persisted state of `version`.
    #[must_use]
    pub fn state_of(&self, version: SetVersion) -> Option<(SubscriptionState, Option<String>)> {
        self.inner.lock().states.get(&version).cloned()
    }

    /// Returns every version the store has a state for, oldest first.
    #[must_use]
    pub fn versions(&self) -> Vec<(SetVersion, SubscriptionState)> {
        self.inner
            .lock()
            .states
            .iter()
            .map(|(v, (s, _))| (*v, *s))
            .collect()
    }

    /// Scans the log without changing the store.
    ///
    /// # Errors
    ///
    /// Returns a corruption or storage error.
    pub fn scan(&self) -> CoreResult<LogScan> {
        read_records(&self.inner.lock().backend)
    }

    /// Rewrites the log down to the latest set and its state.
    ///
    /// The new log is built in memory and swapped in with
    /// [`StorageBackend::replace`], so a failure leaves the old log intact.
    ///
    /// # Errors
    ///
    /// Returns a storage or codec error.
    pub fn compact(&self) -> CoreResult<CompactionStats> {
        let mut inner = self.inner.lock();
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut Inner<B>) -> CoreResult<CompactionStats> {
        let records_before = inner.records;
        let bytes_before = inner.backend.size()?;

        let mut data = Vec::new();
        let mut records_after = 0;
        if let Some(latest) = &inner.latest {
            for record in snapshot_records(latest) {
                data.extend_from_slice(&record.encode_frame()?);
                records_after += 1;
            }
        }

        inner.backend.replace(&data)?;
        inner.records = records_after;

        let stats = CompactionStats {
            records_before,
            records_after,
            bytes_before,
            bytes_after: data.len() as u64,
        };
        info!(
            records_before,
            records_after,
            bytes_before,
            bytes_after = stats.bytes_after,
            "compacted subscription log"
        );
        Ok(stats)
    }
}

/// Records that reproduce `snapshot` on replay.
fn snapshot_records(snapshot: &SubscriptionSetSnapshot) -> Vec<LogRecord> {
    let mut records = vec![LogRecord::SetCommitted {
        version: snapshot.version(),
        subscriptions: snapshot.subscriptions().to_vec(),
    }];
    if snapshot.state() != SubscriptionState::Uncommitted {
        records.push(state_record(snapshot));
    }
    records
}

fn state_record(snapshot: &SubscriptionSetSnapshot) -> LogRecord {
    LogRecord::StateChanged {
        version: snapshot.version(),
        state: snapshot.state(),
        error_message: snapshot.error_message().map(str::to_owned),
    }
}

fn check_transition(
    version: SetVersion,
    from: &StateEntry,
    snapshot: &SubscriptionSetSnapshot,
) -> CoreResult<bool> {
    if from.0 == snapshot.state() && from.1.as_deref() == snapshot.error_message() {
        return Ok(false);
    }
    if !from.0.can_transition_to(snapshot.state()) {
        return Err(CoreError::InvalidStateTransition {
            version: version.as_u64(),
            from: from.0,
            to: snapshot.state(),
        });
    }
    Ok(true)
}

impl<B: StorageBackend> LocalDatabase for SubscriptionStore<B> {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn match_query(&self, object_type: &str, query: &str) -> CoreResult<QueryHandle> {
        if !self.schema.contains(object_type) {
            return Err(CoreError::unknown_object_type(object_type));
        }
        let normalized = normalize_query_text(query);
        if normalized.is_empty() {
            return Err(CoreError::invalid_subscription(format!(
                "query over '{object_type}' must not be empty"
            )));
        }
        Ok(QueryHandle::new(object_type, normalized))
    }

    fn persist(&self, snapshot: &SubscriptionSetSnapshot) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let version = snapshot.version();
        let latest_version = inner.latest.as_ref().map(SubscriptionSetSnapshot::version);

        let records = match latest_version {
            Some(latest) if version < latest => match inner.states.get(&version) {
                Some(entry) if !check_transition(version, entry, snapshot)? => return Ok(()),
                _ => vec![state_record(snapshot)],
            },
            Some(latest) if version == latest => {
                let current = inner
                    .latest
                    .as_ref()
                    .ok_or_else(|| CoreError::invalid_operation("latest set vanished"))?;
                if current.subscriptions() != snapshot.subscriptions() {
                    return Err(CoreError::invalid_operation(format!(
                        "set {version} was already persisted with different subscriptions"
                    )));
                }
                let entry = (current.state(), current.error_message().map(str::to_owned));
                if !check_transition(version, &entry, snapshot)? {
                    return Ok(());
                }
                vec![state_record(snapshot)]
            }
            _ => snapshot_records(snapshot),
        };

        for record in &records {
            inner.append(record, self.config.sync_on_commit)?;
        }
        debug!(
            %version,
            state = %snapshot.state(),
            records = records.len(),
            "persisted subscription set"
        );

        inner.states.insert(
            version,
            (snapshot.state(), snapshot.error_message().map(str::to_owned)),
        );
        if latest_version.map_or(true, |latest| version >= latest) {
            inner.latest = Some(snapshot.clone());
        }

        let threshold = self.config.compact_threshold;
        if threshold > 0 && inner.records >= threshold {
            // The record above is already written; the log stays uncompacted.
            if let Err(e) = self.compact_locked(&mut inner) {
                warn!(%version, error = %e, "automatic compaction failed");
            }
        }
        Ok(())
    }

    fn load_latest_snapshot(&self) -> CoreResult<Option<SubscriptionSetSnapshot>> {
        let mut inner = self.inner.lock();
        let scan = read_records(&inner.backend)?;
        inner.replay(&scan)?;
        Ok(inner.latest.clone())
    }
}
