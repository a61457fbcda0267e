//! Staging area for one subscription set mutation.

use crate::database::{LocalDatabase, QueryHandle};
use crate::error::{CoreError, CoreResult};
use crate::schema::ObjectModel;
use crate::snapshot::{validate_set, SubscriptionSetSnapshot, SubscriptionState};
use crate::subscription::{Query, Subscription, SubscriptionKey};
use crate::types::{SetVersion, Timestamp};
use std::collections::HashSet;
use tracing::{debug, trace};

/// One recorded change inside a mutation scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// A subscription was appended at `index`.
    Added {
        /// Position in the working set.
        index: usize,
        /// The stamped subscription.
        subscription: Subscription,
    },
    /// The subscription at `index` got a new query.
    Updated {
        /// Position in the working set.
        index: usize,
        /// Value before the update.
        before: Subscription,
        /// Value after the update.
        after: Subscription,
    },
    /// The subscription at `index` was removed.
    Removed {
        /// Position it was removed from.
        index: usize,
        /// The removed value.
        subscription: Subscription,
    },
}

/// A mark in the mutation log to roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

/// Net effect of a committed mutation relative to its base snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    /// Subscriptions present now but not in the base.
    pub added: usize,
    /// Subscriptions whose query changed.
    pub updated: usize,
    /// Subscriptions present in the base but gone now.
    pub removed: usize,
    /// Whether any query is new to the set, which means the server has
    /// initial data to send.
    pub introduces_new_queries: bool,
}

/// The single-writer staging area handed to an update callback.
///
/// It starts as a copy of the base snapshot. Nothing done here is visible
/// to readers until the coordinator commits it, and dropping it discards
/// every change.
pub struct MutableSubscriptionSet<'a> {
    base: &'a SubscriptionSetSnapshot,
    database: &'a dyn LocalDatabase,
    working: Vec<Subscription>,
    log: Vec<Mutation>,
}

impl<'a> MutableSubscriptionSet<'a> {
    /// Opens a mutation scope on top of `base`.
    pub fn new(base: &'a SubscriptionSetSnapshot, database: &'a dyn LocalDatabase) -> Self {
        Self {
            base,
            database,
            working: base.subscriptions().to_vec(),
            log: Vec::new(),
        }
    }

    /// Adds a subscription and returns the value now in the set.
    ///
    /// Adding a subscription identical to one already present (same name and
    /// query, or the same anonymous query) returns the existing value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateName`] if a subscription with another
    /// query already owns the name, or a query validation error from the
    /// local database.
    pub fn add(&mut self, subscription: Subscription) -> CoreResult<Subscription> {
        let handle = self.normalize(subscription.object_type(), subscription.query())?;
        self.add_normalized(&subscription, handle)
    }

    /// Adds a subscription, or replaces the query of the same-named one.
    ///
    /// An update keeps the position and `created_at` of the existing entry
    /// and moves `updated_at` forward.
    ///
    /// # Errors
    ///
    /// Returns a query validation error from the local database.
    pub fn add_or_update(&mut self, subscription: Subscription) -> CoreResult<Subscription> {
        let handle = self.normalize(subscription.object_type(), subscription.query())?;

        let Some(index) = subscription.name().and_then(|n| self.position_by_name(n)) else {
            return self.add_normalized(&subscription, handle);
        };

        let before = self.working[index].clone();
        if before.matches_query(handle.object_type(), handle.query()) {
            return Ok(before);
        }

        let after = before.stamped(
            handle.object_type().to_owned(),
            handle.query().to_owned(),
            before.created_at(),
            Timestamp::now_after(before.updated_at()),
        );
        trace!(subscription = %after, "updating subscription");
        self.working[index] = after.clone();
        self.log.push(Mutation::Updated {
            index,
            before,
            after: after.clone(),
        });
        Ok(after)
    }

    /// Removes the subscription with the same identity as `subscription`.
    ///
    /// Returns true if one was removed.
    pub fn remove(&mut self, subscription: &Subscription) -> bool {
        let position = match subscription.name() {
            Some(name) => self.position_by_name(name),
            None => self
                .normalize(subscription.object_type(), subscription.query())
                .ok()
                .and_then(|handle| self.position_anonymous(&handle)),
        };
        match position {
            Some(index) => {
                self.remove_at(index);
                true
            }
            None => false,
        }
    }

    /// Removes the subscription called `name`. Returns true if one was removed.
    pub fn remove_named(&mut self, name: &str) -> bool {
        match self.position_by_name(name) {
            Some(index) => {
                self.remove_at(index);
                true
            }
            None => false,
        }
    }

    /// Removes every subscription over `object_type`.
    ///
    /// Returns true if at least one was removed. Unknown object types simply
    /// match nothing.
    pub fn remove_all_of_type(&mut self, object_type: &str) -> bool {
        self.remove_where(|s| s.object_type() == object_type)
    }

    /// Removes every subscription over the object type of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObjectType`] if `T` is not in the schema.
    pub fn remove_all_of<T: ObjectModel>(&mut self) -> CoreResult<bool> {
        let object_type = self.database.schema().object_type_of::<T>()?.to_owned();
        Ok(self.remove_all_of_type(&object_type))
    }

    /// Removes every subscription. Returns true if the set was not empty.
    pub fn remove_all(&mut self) -> bool {
        self.remove_where(|_| true)
    }

    /// Marks the current position in the mutation log.
    #[must_use]
    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.log.len())
    }

    /// Undoes every mutation made after `savepoint`, newest first.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        while self.log.len() > savepoint.0 {
            let Some(mutation) = self.log.pop() else {
                break;
            };
            match mutation {
                Mutation::Added { index, .. } => {
                    self.working.remove(index);
                }
                Mutation::Updated { index, before, .. } => {
                    self.working[index] = before;
                }
                Mutation::Removed {
                    index,
                    subscription,
                } => {
                    self.working.insert(index, subscription);
                }
            }
        }
    }

    /// Returns the number of subscriptions in the working set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.working.len()
    }

    /// Alias of [`len`](Self::len).
    #[must_use]
    pub fn size(&self) -> usize {
        self.len()
    }

    /// Returns true if the working set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
    }

    /// Iterates the working set in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Subscription> {
        self.working.iter()
    }

    /// Finds the subscription running `query` after normalization.
    #[must_use]
    pub fn find(&self, query: &Query) -> Option<&Subscription> {
        let handle = self.normalize(query.object_type(), query.text()).ok()?;
        self.working
            .iter()
            .find(|s| s.matches_query(handle.object_type(), handle.query()))
    }

    /// Finds a subscription by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Subscription> {
        self.working.iter().find(|s| s.name() == Some(name))
    }

    /// Returns the version this scope will commit as.
    #[must_use]
    pub fn version(&self) -> SetVersion {
        self.base.version().next()
    }

    /// Returns the version the scope started from.
    #[must_use]
    pub fn base_version(&self) -> SetVersion {
        self.base.version()
    }

    /// A staged set is always uncommitted.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        SubscriptionState::Uncommitted
    }

    /// Returns the mutations recorded so far.
    #[must_use]
    pub fn mutations(&self) -> &[Mutation] {
        &self.log
    }

    /// Returns true if anything was recorded.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.log.is_empty()
    }

    /// Validates the working set and turns it into the next snapshot.
    ///
    /// The snapshot is in state [`SubscriptionState::Uncommitted`] with
    /// version `base + 1`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if any name is taken twice or any entry has
    /// an empty object type or query. The base snapshot is untouched either
    /// way.
    pub fn finish(self) -> CoreResult<(SubscriptionSetSnapshot, ChangeSummary)> {
        validate_set(&self.working)?;

        let summary = summarize(self.base.subscriptions(), &self.working);
        let version = self.version();
        debug!(
            %version,
            mutations = self.log.len(),
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            "staged subscription set"
        );
        Ok((
            SubscriptionSetSnapshot::committed(version, self.working),
            summary,
        ))
    }

    fn normalize(&self, object_type: &str, query: &str) -> CoreResult<QueryHandle> {
        self.database.match_query(object_type, query)
    }

    fn add_normalized(
        &mut self,
        subscription: &Subscription,
        handle: QueryHandle,
    ) -> CoreResult<Subscription> {
        let existing = match subscription.name() {
            Some(name) => self.position_by_name(name),
            None => self.position_anonymous(&handle),
        };

        if let Some(index) = existing {
            let current = &self.working[index];
            if current.matches_query(handle.object_type(), handle.query()) {
                return Ok(current.clone());
            }
            return Err(CoreError::duplicate_name(
                subscription.name().unwrap_or_default(),
            ));
        }

        let now = Timestamp::now();
        let added = subscription.stamped(
            handle.object_type().to_owned(),
            handle.query().to_owned(),
            now,
            now,
        );
        trace!(subscription = %added, "adding subscription");
        let index = self.working.len();
        self.working.push(added.clone());
        self.log.push(Mutation::Added {
            index,
            subscription: added.clone(),
        });
        Ok(added)
    }

    fn remove_at(&mut self, index: usize) {
        let subscription = self.working.remove(index);
        trace!(subscription = %subscription, "removing subscription");
        self.log.push(Mutation::Removed {
            index,
            subscription,
        });
    }

    fn remove_where(&mut self, predicate: impl Fn(&Subscription) -> bool) -> bool {
        let mut removed = false;
        for index in (0..self.working.len()).rev() {
            if predicate(&self.working[index]) {
                self.remove_at(index);
                removed = true;
            }
        }
        removed
    }

    fn position_by_name(&self, name: &str) -> Option<usize> {
        self.working.iter().position(|s| s.name() == Some(name))
    }

    fn position_anonymous(&self, handle: &QueryHandle) -> Option<usize> {
        self.working.iter().position(|s| {
            s.is_anonymous() && s.matches_query(handle.object_type(), handle.query())
        })
    }
}

fn summarize(base: &[Subscription], working: &[Subscription]) -> ChangeSummary {
    let base_keys: HashSet<SubscriptionKey<'_>> = base.iter().map(Subscription::key).collect();
    let working_keys: HashSet<SubscriptionKey<'_>> =
        working.iter().map(Subscription::key).collect();
    let base_queries: HashSet<(&str, &str)> =
        base.iter().map(|s| (s.object_type(), s.query())).collect();

    let mut summary = ChangeSummary::default();
    for subscription in working {
        let key = subscription.key();
        if !base_keys.contains(&key) {
            summary.added += 1;
        } else if let SubscriptionKey::Named(name) = key {
            let changed = base
                .iter()
                .find(|b| b.name() == Some(name))
                .is_some_and(|b| !b.same_definition(subscription));
            if changed {
                summary.updated += 1;
            }
        }
        if !base_queries.contains(&(subscription.object_type(), subscription.query())) {
            summary.introduces_new_queries = true;
        }
    }
    summary.removed = base_keys.difference(&working_keys).count();
    summary
}
