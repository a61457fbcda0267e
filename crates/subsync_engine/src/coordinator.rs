//! The subscription coordinator.
//!
//! One [`SubscriptionCoordinator`] owns the active subscription set of a
//! session. It serializes commits, drives each version through its state
//! machine as acknowledgements arrive, and lets callers wait for a version
//! to settle, blocking or async.
//!
//! ## Locks
//!
//! - `writer` is held for a whole update: the callback, the commit and the
//!   upload. Commits therefore leave in version order.
//! - `progress` guards convergence bookkeeping and is the lock the `settled`
//!   condition variable waits on. Acknowledgements only ever take this one,
//!   so they are applied even while an update holds `writer`.
//! - `active` is only written under `progress`; readers clone the `Arc` out
//!   of it and never wait for either of the other two.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::sink::AckSink;
use crate::channel::ServerChannel;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use subsync_core::{
    CoreError, LocalDatabase, MutableSubscriptionSet, Query, SetVersion, Subscription,
    SubscriptionSetSnapshot, SubscriptionState,
};
use subsync_protocol::{QueryEntry, ServerState, StateAck, UploadRequest};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters describing what a coordinator has done so far.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Successful commits.
    pub commits: u64,
    /// Updates whose callback or validation failed.
    pub rollbacks: u64,
    /// Upload attempts, including retries.
    pub uploads: u64,
    /// Upload attempts that were retries.
    pub upload_retries: u64,
    /// Uploads that failed for good.
    pub upload_failures: u64,
    /// Acknowledgements that moved a version forward.
    pub acks_applied: u64,
    /// Acknowledgements that were stale, repeated or illegal.
    pub acks_ignored: u64,
    /// Time of the last commit.
    pub last_commit_time: Option<Instant>,
    /// Last upload or transport error.
    pub last_error: Option<String>,
}

/// Receives the outcome of [`SubscriptionCoordinator::on_synchronized`].
///
/// Exactly one of the two methods is called, exactly once.
pub trait SyncCallback: Send + 'static {
    /// The active version settled, or the timeout elapsed; `snapshot` is the
    /// set as it was at that moment.
    fn on_state_change(&self, snapshot: Arc<SubscriptionSetSnapshot>);

    /// Waiting failed (transport failure, closed coordinator).
    fn on_error(&self, error: SyncError);
}

struct UploadFault {
    version: SetVersion,
    message: String,
    retryable: bool,
}

impl UploadFault {
    fn to_error(&self) -> SyncError {
        SyncError::Transport {
            message: self.message.clone(),
            retryable: self.retryable,
        }
    }
}

struct Progress {
    /// Transport failure of the active version; cleared by a re-upload.
    fault: Option<UploadFault>,
    /// Upload of the active version, kept for re-uploads.
    upload: Option<UploadRequest>,
    /// Last known state of recent versions.
    history: BTreeMap<SetVersion, SubscriptionState>,
}

impl Progress {
    fn remember(&mut self, version: SetVersion, state: SubscriptionState, limit: usize) {
        self.history.insert(version, state);
        while self.history.len() > limit.max(1) {
            self.history.pop_first();
        }
    }
}

pub(crate) struct Shared {
    database: Arc<dyn LocalDatabase>,
    channel: Arc<dyn ServerChannel>,
    config: SyncConfig,
    writer: Mutex<()>,
    active: RwLock<Arc<SubscriptionSetSnapshot>>,
    progress: Mutex<Progress>,
    settled: Condvar,
    changes: watch::Sender<Arc<SubscriptionSetSnapshot>>,
    stats: Mutex<SyncStats>,
    closed: AtomicBool,
}

impl Shared {
    fn active(&self) -> Arc<SubscriptionSetSnapshot> {
        Arc::clone(&self.active.read())
    }

    /// Swaps in `snapshot` and wakes every waiter. Caller holds `progress`.
    fn publish(&self, progress: &mut Progress, snapshot: Arc<SubscriptionSetSnapshot>) {
        progress.remember(
            snapshot.version(),
            snapshot.state(),
            self.config.history_limit,
        );
        *self.active.write() = snapshot;
        self.notify();
    }

    /// Wakes every waiter without changing the snapshot.
    fn notify(&self) {
        self.settled.notify_all();
        self.changes.send_replace(self.active());
    }

    fn persist_quietly(&self, snapshot: &SubscriptionSetSnapshot) {
        if let Err(e) = self.database.persist(snapshot) {
            warn!(
                version = %snapshot.version(),
                state = %snapshot.state(),
                error = %e,
                "failed to persist subscription state"
            );
        }
    }

    fn ignore_ack(&self) -> bool {
        self.stats.lock().acks_ignored += 1;
        false
    }

    pub(crate) fn apply_ack(&self, ack: StateAck) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        let version = SetVersion::new(ack.version);
        let target = match ack.state {
            ServerState::Bootstrapping => SubscriptionState::Bootstrapping,
            ServerState::Complete => SubscriptionState::Complete,
            ServerState::Error => SubscriptionState::Error,
        };

        let mut progress = self.progress.lock();
        let current = self.active();

        if version < current.version() {
            debug!(%version, active = %current.version(), state = %target, "ignoring ack for superseded version");
            return self.ignore_ack();
        }
        if version > current.version() {
            warn!(%version, active = %current.version(), "ignoring ack for unknown version");
            return self.ignore_ack();
        }
        if current.state() == target {
            debug!(%version, state = %target, "ignoring repeated ack");
            return self.ignore_ack();
        }

        let message = match target {
            SubscriptionState::Error => Some(
                ack.error_message
                    .unwrap_or_else(|| "server rejected the subscription set".to_owned()),
            ),
            _ => None,
        };
        let next = match current.with_state(target, message) {
            Ok(next) => Arc::new(next),
            Err(e) => {
                warn!(%version, error = %e, "ignoring out-of-order ack");
                return self.ignore_ack();
            }
        };

        self.persist_quietly(&next);
        if progress.fault.as_ref().is_some_and(|f| f.version == version) {
            progress.fault = None;
        }
        debug!(%version, from = %current.state(), to = %target, "applied ack");
        self.stats.lock().acks_applied += 1;
        self.publish(&mut progress, next);
        true
    }

    pub(crate) fn apply_failure(&self, version: SetVersion, error: &SyncError) {
        let (message, retryable) = match error {
            SyncError::Transport { message, retryable } => (message.clone(), *retryable),
            other => (other.to_string(), other.is_retryable()),
        };

        let mut progress = self.progress.lock();
        let current = self.active();
        if current.version() != version || current.state().is_settled() {
            debug!(%version, error = %message, "ignoring failure for inactive version");
            return;
        }

        warn!(%version, error = %message, "subscription set delivery failed");
        self.stats.lock().last_error = Some(message.clone());
        progress.fault = Some(UploadFault {
            version,
            message,
            retryable,
        });
        self.notify();
    }

    pub(crate) fn is_waiting_on(&self, version: SetVersion) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let current = self.active();
        current.version() == version && !current.state().is_terminal()
    }

    fn has_fault_for_active(&self) -> bool {
        let progress = self.progress.lock();
        let version = self.active().version();
        progress.fault.as_ref().is_some_and(|f| f.version == version)
    }

    /// Uploads with the configured retry policy. Caller holds `writer`.
    fn upload(self: &Arc<Self>, request: &UploadRequest) -> SyncResult<()> {
        let retry = &self.config.retry;
        let version = SetVersion::new(request.version);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.lock().upload_retries += 1;
            }
            self.stats.lock().uploads += 1;

            match self
                .channel
                .upload(request, AckSink::new(Arc::downgrade(self)))
            {
                Ok(()) => {
                    debug!(%version, attempt, queries = request.queries.len(), "uploaded subscription set");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    warn!(%version, attempt, error = %e, "upload failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    self.stats.lock().upload_failures += 1;
                    self.apply_failure(version, &e);
                    return Err(e);
                }
            }
        }
    }

    /// Returns the settled active snapshot, if it has settled.
    fn poll_outcome(
        &self,
        progress: &mut Progress,
    ) -> SyncResult<Option<Arc<SubscriptionSetSnapshot>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Closed);
        }

        let current = self.active();
        if current.version() == SetVersion::INITIAL
            && current.state() == SubscriptionState::Uncommitted
        {
            let settled = Arc::new(current.settle_initial()?);
            self.publish(progress, Arc::clone(&settled));
            return Ok(Some(settled));
        }
        if current.state().is_settled() {
            return Ok(Some(current));
        }
        if let Some(fault) = progress
            .fault
            .as_ref()
            .filter(|f| f.version == current.version())
        {
            return Err(fault.to_error());
        }
        Ok(None)
    }
}

fn upload_request(
    config: &SyncConfig,
    snapshot: &SubscriptionSetSnapshot,
    introduces_new_queries: bool,
) -> UploadRequest {
    let queries = snapshot
        .iter()
        .map(|s| QueryEntry::new(s.name().map(str::to_owned), s.object_type(), s.query()))
        .collect();
    UploadRequest::new(
        config.client_id,
        snapshot.version().as_u64(),
        queries,
        introduces_new_queries,
    )
}

/// Owner of a session's subscription set.
///
/// The coordinator is a cheap, cloneable handle; clones share everything.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use subsync_core::{ObjectSchema, Query, Schema, Subscription, SubscriptionState, SubscriptionStore};
/// use subsync_engine::{MockChannel, SubscriptionCoordinator, SyncConfig, SyncError};
///
/// let schema = Schema::new().with_object(ObjectSchema::new("Person"));
/// let store = Arc::new(SubscriptionStore::in_memory(schema).unwrap());
/// let channel = Arc::new(MockChannel::auto_complete());
/// let coordinator = SubscriptionCoordinator::new(store, channel, SyncConfig::default()).unwrap();
///
/// coordinator
///     .update(|set| {
///         set.add(Subscription::named("adults", Query::new("Person", "age >= 18"))?)?;
///         Ok::<_, SyncError>(())
///     })
///     .unwrap();
///
/// assert!(coordinator.wait_for_synchronization().unwrap());
/// assert_eq!(coordinator.state(), SubscriptionState::Complete);
/// ```
#[derive(Clone)]
pub struct SubscriptionCoordinator {
    shared: Arc<Shared>,
}

impl SubscriptionCoordinator {
    /// Creates a coordinator, restoring the latest persisted set.
    ///
    /// A restored version that had not settled is uploaded again by the
    /// first wait.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted set cannot be loaded.
    pub fn new(
        database: Arc<dyn LocalDatabase>,
        channel: Arc<dyn ServerChannel>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        Self::open(database, channel, config).map(|(coordinator, _)| coordinator)
    }

    /// Creates a coordinator and seeds an empty database through `initial`.
    ///
    /// `initial` runs as an ordinary [`update`](Self::update), and only if
    /// the database held no persisted set yet. Reopening a database that
    /// was seeded before restores that set and leaves `initial` unused.
    ///
    /// # Errors
    ///
    /// Whatever `initial` returns, or a [`SyncError`] converted into `E`.
    pub fn with_initial_subscriptions<F, E>(
        database: Arc<dyn LocalDatabase>,
        channel: Arc<dyn ServerChannel>,
        config: SyncConfig,
        initial: F,
    ) -> Result<Self, E>
    where
        F: FnOnce(&mut MutableSubscriptionSet<'_>) -> Result<(), E>,
        E: From<SyncError>,
    {
        let (coordinator, restored) = Self::open(database, channel, config)?;
        if !restored {
            debug!("seeding initial subscriptions");
            coordinator.update(initial)?;
        }
        Ok(coordinator)
    }

    /// Returns the coordinator and whether a persisted set was restored.
    fn open(
        database: Arc<dyn LocalDatabase>,
        channel: Arc<dyn ServerChannel>,
        config: SyncConfig,
    ) -> SyncResult<(Self, bool)> {
        let restored = database.load_latest_snapshot()?;
        let was_restored = restored.is_some();
        let initial = Arc::new(restored.unwrap_or_default());

        let mut progress = Progress {
            fault: None,
            upload: None,
            history: BTreeMap::new(),
        };
        progress.remember(initial.version(), initial.state(), config.history_limit);
        if initial.version() != SetVersion::INITIAL && !initial.state().is_terminal() {
            progress.upload = Some(upload_request(&config, &initial, true));
            progress.fault = Some(UploadFault {
                version: initial.version(),
                message: "upload was not confirmed before the last session ended".to_owned(),
                retryable: true,
            });
        }

        info!(
            client_id = %config.client_uuid(),
            version = %initial.version(),
            state = %initial.state(),
            "subscription coordinator ready"
        );

        let (changes, _) = watch::channel(Arc::clone(&initial));
        let coordinator = Self {
            shared: Arc::new(Shared {
                database,
                channel,
                config,
                writer: Mutex::new(()),
                active: RwLock::new(initial),
                progress: Mutex::new(progress),
                settled: Condvar::new(),
                changes,
                stats: Mutex::new(SyncStats::default()),
                closed: AtomicBool::new(false),
            }),
        };
        Ok((coordinator, was_restored))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Returns the active snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SubscriptionSetSnapshot> {
        self.shared.active()
    }

    /// Returns the active version.
    #[must_use]
    pub fn version(&self) -> SetVersion {
        self.snapshot().version()
    }

    /// Returns the state of the active version.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.snapshot().state()
    }

    /// Returns the server error of the active version, if it is in `ERROR`.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.snapshot().error_message().map(str::to_owned)
    }

    /// Returns the number of active subscriptions.
    #[must_use]
    pub fn size(&self) -> usize {
        self.snapshot().len()
    }

    /// Finds the active subscription running `query`.
    ///
    /// The query is normalized the same way adds are; a query the local
    /// database cannot match finds nothing.
    #[must_use]
    pub fn find(&self, query: &Query) -> Option<Subscription> {
        let handle = self
            .shared
            .database
            .match_query(query.object_type(), query.text())
            .ok()?;
        self.snapshot().find(&handle.into_query()).cloned()
    }

    /// Finds an active subscription by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Subscription> {
        self.snapshot().find_by_name(name).cloned()
    }

    /// Returns the last known state of `version`.
    ///
    /// Superseded and settled versions stay visible for the configured
    /// history limit.
    #[must_use]
    pub fn state_of(&self, version: SetVersion) -> Option<SubscriptionState> {
        let progress = self.shared.progress.lock();
        let current = self.shared.active();
        if current.version() == version {
            return Some(current.state());
        }
        progress.history.get(&version).copied()
    }

    /// Returns a copy of the counters.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.shared.stats.lock().clone()
    }

    /// Returns a sink feeding acknowledgements into this coordinator, for
    /// channels that learn about progress outside of `upload`.
    #[must_use]
    pub fn ack_sink(&self) -> AckSink {
        AckSink::new(Arc::downgrade(&self.shared))
    }

    /// Returns true once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Closes the coordinator and its channel and releases every waiter.
    ///
    /// # Errors
    ///
    /// Returns the channel's error if it fails to close.
    pub fn close(&self) -> SyncResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(version = %self.version(), "closing subscription coordinator");
        let result = self.shared.channel.close();
        let _progress = self.shared.progress.lock();
        self.shared.notify();
        result
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        Ok(())
    }

    fn rolled_back<E: From<SyncError>>(&self, error: CoreError) -> E {
        self.shared.stats.lock().rollbacks += 1;
        debug!(error = %error, "subscription update rejected");
        E::from(SyncError::from(error))
    }

    /// Applies a mutation to the subscription set.
    ///
    /// `f` runs on the calling thread with exclusive access to a staging copy
    /// of the active set. If it returns `Err`, or the staged set fails
    /// validation or cannot be persisted, nothing is published and the error
    /// is returned unchanged. Otherwise the next version is persisted, the
    /// previous one is superseded if it had not settled, and the new version
    /// is published, moved to `PENDING` and uploaded.
    ///
    /// Returns the new version as committed, in state `UNCOMMITTED`. The
    /// coordinator itself already reports `PENDING` (or later) by then.
    ///
    /// A failed upload does not fail the update; it is reported by the next
    /// wait, which also uploads the version again.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, or a [`SyncError`] converted into `E`.
    pub fn update<F, E>(&self, f: F) -> Result<Arc<SubscriptionSetSnapshot>, E>
    where
        F: FnOnce(&mut MutableSubscriptionSet<'_>) -> Result<(), E>,
        E: From<SyncError>,
    {
        self.ensure_open()?;
        let shared = &self.shared;
        let _writer = shared.writer.lock();

        let base = shared.active();
        let (committed, summary) = {
            let mut staged = MutableSubscriptionSet::new(&base, shared.database.as_ref());
            if let Err(e) = f(&mut staged) {
                shared.stats.lock().rollbacks += 1;
                debug!(base = %base.version(), "subscription update rolled back");
                return Err(e);
            }
            staged.finish().map_err(|e| self.rolled_back::<E>(e))?
        };
        shared
            .database
            .persist(&committed)
            .map_err(|e| self.rolled_back::<E>(e))?;

        let version = committed.version();
        let committed = Arc::new(committed);
        let pending = Arc::new(
            committed
                .with_state(SubscriptionState::Pending, None)
                .map_err(SyncError::from)?,
        );
        let request = upload_request(&shared.config, &pending, summary.introduces_new_queries);

        {
            let mut progress = shared.progress.lock();
            let current = shared.active();
            // A concurrent refresh may already have published this version.
            let displaced = (current.version() < version)
                .then(|| current.with_state(SubscriptionState::Superseded, None).ok())
                .flatten();
            if let Some(superseded) = displaced {
                if current.version() != SetVersion::INITIAL {
                    shared.persist_quietly(&superseded);
                }
                debug!(version = %current.version(), from = %current.state(), "superseded");
                progress.remember(
                    current.version(),
                    SubscriptionState::Superseded,
                    shared.config.history_limit,
                );
            }
            progress.fault = None;
            progress.upload = Some(request.clone());
            shared.publish(&mut progress, Arc::clone(&committed));
            shared.persist_quietly(&pending);
            shared.publish(&mut progress, pending);
        }

        {
            let mut stats = shared.stats.lock();
            stats.commits += 1;
            stats.last_commit_time = Some(Instant::now());
        }
        debug!(
            %version,
            subscriptions = committed.len(),
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            "committed subscription set"
        );

        if let Err(e) = shared.upload(&request) {
            warn!(%version, error = %e, "upload failed; the next wait retries it");
        }
        Ok(committed)
    }

    /// Runs [`update`](Self::update) on tokio's blocking pool.
    ///
    /// Resolves once the local commit is done, not when the server has
    /// answered.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns; a panicking `f` yields
    /// [`SyncError::TaskFailed`].
    pub async fn update_async<F, E>(&self, f: F) -> Result<Arc<SubscriptionSetSnapshot>, E>
    where
        F: FnOnce(&mut MutableSubscriptionSet<'_>) -> Result<(), E> + Send + 'static,
        E: From<SyncError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.update(f))
            .await
            .map_err(|e| E::from(SyncError::TaskFailed(e.to_string())))?
    }

    /// Reloads the latest persisted set without contacting the server.
    ///
    /// The loaded set is published if it is newer than the active one, or
    /// the same version in a later state. A displaced older version is
    /// remembered as `SUPERSEDED`. Does not wait for a running update.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted set cannot be loaded.
    pub fn refresh(&self) -> SyncResult<Arc<SubscriptionSetSnapshot>> {
        self.ensure_open()?;
        let shared = &self.shared;
        let loaded = shared.database.load_latest_snapshot()?;

        let mut progress = shared.progress.lock();
        let current = shared.active();
        let Some(loaded) = loaded else {
            return Ok(current);
        };

        let newer = loaded.version() > current.version();
        let advanced = loaded.version() == current.version()
            && current.state().can_transition_to(loaded.state());
        if !(newer || advanced) {
            return Ok(current);
        }

        if newer {
            if current.version() != SetVersion::INITIAL
                && current.state().can_transition_to(SubscriptionState::Superseded)
            {
                debug!(version = %current.version(), from = %current.state(), "superseded");
                progress.remember(
                    current.version(),
                    SubscriptionState::Superseded,
                    shared.config.history_limit,
                );
            }
            // The upload belonged to the displaced version.
            progress.fault = None;
            progress.upload = None;
        }

        debug!(
            version = %loaded.version(),
            state = %loaded.state(),
            "refreshed subscription set"
        );
        let loaded = Arc::new(loaded);
        shared.publish(&mut progress, Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Blocks until the active version is `COMPLETE` (true) or `ERROR`
    /// (false).
    ///
    /// If a newer version is committed meanwhile, the wait follows it.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Transport`] if the channel could not deliver the
    ///   active version
    /// - [`SyncError::BlockingInAsyncContext`] on a tokio runtime thread
    /// - [`SyncError::Closed`] if the coordinator is closed
    pub fn wait_for_synchronization(&self) -> SyncResult<bool> {
        self.wait_blocking(None)
    }

    /// Like [`wait_for_synchronization`](Self::wait_for_synchronization),
    /// giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`SyncError::Timeout`] when the time runs out; the set keeps
    /// converging. Otherwise as for the untimed wait.
    pub fn wait_for_synchronization_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        self.wait_blocking(Some(timeout))
    }

    fn wait_blocking(&self, timeout: Option<Duration>) -> SyncResult<bool> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(SyncError::BlockingInAsyncContext);
        }
        self.retry_failed_upload()?;

        let deadline = timeout.map(|limit| (limit, Instant::now() + limit));
        let shared = &self.shared;
        let mut progress = shared.progress.lock();
        loop {
            if let Some(snapshot) = shared.poll_outcome(&mut progress)? {
                return Ok(snapshot.state() == SubscriptionState::Complete);
            }
            match deadline {
                Some((limit, deadline)) => {
                    if shared.settled.wait_until(&mut progress, deadline).timed_out() {
                        if let Some(snapshot) = shared.poll_outcome(&mut progress)? {
                            return Ok(snapshot.state() == SubscriptionState::Complete);
                        }
                        return Err(SyncError::Timeout(limit));
                    }
                }
                None => shared.settled.wait(&mut progress),
            }
        }
    }

    /// Uploads the active version again if its last delivery failed.
    fn retry_failed_upload(&self) -> SyncResult<()> {
        let shared = &self.shared;
        if !shared.has_fault_for_active() {
            return Ok(());
        }

        let _writer = shared.writer.lock();
        let request = {
            let mut progress = shared.progress.lock();
            let current = shared.active();
            if !progress
                .fault
                .as_ref()
                .is_some_and(|f| f.version == current.version())
            {
                return Ok(());
            }
            let Some(request) = progress
                .upload
                .clone()
                .filter(|r| r.version == current.version().as_u64())
            else {
                return Ok(());
            };
            progress.fault = None;
            if current.state() == SubscriptionState::Uncommitted {
                let pending = Arc::new(current.with_state(SubscriptionState::Pending, None)?);
                shared.persist_quietly(&pending);
                shared.publish(&mut progress, pending);
            }
            request
        };

        info!(version = request.version, "uploading subscription set again");
        if let Err(e) = shared.upload(&request) {
            warn!(version = request.version, error = %e, "upload failed again");
        }
        Ok(())
    }

    /// Resolves with the active snapshot once it is `COMPLETE` or `ERROR`.
    ///
    /// If a newer version is committed meanwhile, the wait follows it.
    ///
    /// # Errors
    ///
    /// [`SyncError::Transport`] if the channel could not deliver the active
    /// version, [`SyncError::Closed`] if the coordinator is closed.
    pub async fn wait_for_synchronization_async(&self) -> SyncResult<Arc<SubscriptionSetSnapshot>> {
        self.wait_async(None).await
    }

    /// Like
    /// [`wait_for_synchronization_async`](Self::wait_for_synchronization_async),
    /// resolving with the then-current snapshot once `timeout` elapses.
    ///
    /// # Errors
    ///
    /// As for the untimed wait.
    pub async fn wait_for_synchronization_async_with_timeout(
        &self,
        timeout: Duration,
    ) -> SyncResult<Arc<SubscriptionSetSnapshot>> {
        self.wait_async(Some(timeout)).await
    }

    async fn wait_async(&self, timeout: Option<Duration>) -> SyncResult<Arc<SubscriptionSetSnapshot>> {
        if self.shared.has_fault_for_active() {
            let this = self.clone();
            tokio::task::spawn_blocking(move || this.retry_failed_upload())
                .await
                .map_err(|e| SyncError::TaskFailed(e.to_string()))??;
        }

        let mut changes = self.shared.changes.subscribe();
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.settle(&mut changes)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(?limit, version = %self.version(), "wait timed out");
                    Ok(self.snapshot())
                }
            },
            None => self.settle(&mut changes).await,
        }
    }

    async fn settle(
        &self,
        changes: &mut watch::Receiver<Arc<SubscriptionSetSnapshot>>,
    ) -> SyncResult<Arc<SubscriptionSetSnapshot>> {
        loop {
            let outcome = {
                let mut progress = self.shared.progress.lock();
                self.shared.poll_outcome(&mut progress)
            };
            match outcome {
                Ok(Some(snapshot)) => return Ok(snapshot),
                Ok(None) => {}
                Err(e) => return Err(e),
            }
            if changes.changed().await.is_err() {
                return Err(SyncError::Closed);
            }
        }
    }

    /// Waits on `handle` and reports the outcome to `callback`.
    ///
    /// Without a timeout the callback fires once the active version settles;
    /// with one it fires no later than `timeout` with whatever state the set
    /// is in.
    pub fn on_synchronized<C: SyncCallback>(
        &self,
        handle: &tokio::runtime::Handle,
        timeout: Option<Duration>,
        callback: C,
    ) -> JoinHandle<()> {
        let this = self.clone();
        handle.spawn(async move {
            let outcome = match timeout {
                Some(limit) => this.wait_for_synchronization_async_with_timeout(limit).await,
                None => this.wait_for_synchronization_async().await,
            };
            match outcome {
                Ok(snapshot) => callback.on_state_change(snapshot),
                Err(e) => callback.on_error(e),
            }
        })
    }
}

impl fmt::Debug for SubscriptionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("SubscriptionCoordinator")
            .field("version", &snapshot.version())
            .field("state", &snapshot.state())
            .field("size", &snapshot.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
