//! Immutable, versioned subscription sets.

use crate::error::{CoreError, CoreResult};
use crate::subscription::{Query, Subscription, SubscriptionKey};
use crate::types::SetVersion;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Convergence state of one subscription set version.
///
/// ```text
/// UNCOMMITTED -> PENDING -> BOOTSTRAPPING -> COMPLETE
///                   |            |
///                   +-> ERROR <--+
/// any non-terminal -> SUPERSEDED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionState {
    /// Committed locally, not yet handed to the server channel.
    Uncommitted,
    /// Handed to the server channel, no answer yet.
    Pending,
    /// Accepted by the server, initial data for new queries is downloading.
    Bootstrapping,
    /// The server has sent everything the set asks for.
    Complete,
    /// The server rejected the set; see the error message.
    Error,
    /// A newer version was committed before this one finished.
    Superseded,
}

impl SubscriptionState {
    /// Returns true for states this version can never leave.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Superseded)
    }

    /// Returns true for states a waiter is released on.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Returns true if a version in this state may move to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use SubscriptionState::*;
        match (self, next) {
            (Uncommitted, Pending) => true,
            (Pending, Bootstrapping | Complete | Error) => true,
            (Bootstrapping, Complete | Error) => true,
            (Uncommitted | Pending | Bootstrapping, Superseded) => true,
            _ => false,
        }
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uncommitted => "UNCOMMITTED",
            Self::Pending => "PENDING",
            Self::Bootstrapping => "BOOTSTRAPPING",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Superseded => "SUPERSEDED",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, versioned subscription set.
///
/// Snapshots are never mutated. A commit produces a snapshot with the next
/// version; a state change produces a refined view of the same version that
/// shares the subscription list. Anyone holding an older view keeps seeing
/// exactly what it saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSetSnapshot {
    version: SetVersion,
    state: SubscriptionState,
    error_message: Option<String>,
    subscriptions: Arc<[Subscription]>,
}

impl SubscriptionSetSnapshot {
    /// The empty version 0 every session starts from.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: SetVersion::INITIAL,
            state: SubscriptionState::Uncommitted,
            error_message: None,
            subscriptions: Arc::from(Vec::new()),
        }
    }

    /// Rebuilds a snapshot from persisted parts, checking every invariant.
    ///
    /// # Errors
    ///
    /// Fails if a subscription is invalid, two subscriptions share an
    /// identity, or an error message is attached to a non-`ERROR` state.
    pub fn from_parts(
        version: SetVersion,
        state: SubscriptionState,
        error_message: Option<String>,
        subscriptions: Vec<Subscription>,
    ) -> CoreResult<Self> {
        validate_set(&subscriptions)?;
        if error_message.is_some() && state != SubscriptionState::Error {
            return Err(CoreError::invalid_operation(format!(
                "error message attached to {version} in state {state}"
            )));
        }
        Ok(Self {
            version,
            state,
            error_message,
            subscriptions: Arc::from(subscriptions),
        })
    }

    /// Builds the freshly committed, still uncommitted-to-server snapshot.
    pub(crate) fn committed(version: SetVersion, subscriptions: Vec<Subscription>) -> Self {
        Self {
            version,
            state: SubscriptionState::Uncommitted,
            error_message: None,
            subscriptions: Arc::from(subscriptions),
        }
    }

    /// Returns the refined view of this version in `state`.
    ///
    /// `error_message` is kept only for [`SubscriptionState::Error`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidStateTransition`] if the move is not legal.
    pub fn with_state(
        &self,
        state: SubscriptionState,
        error_message: Option<String>,
    ) -> CoreResult<Self> {
        if !self.state.can_transition_to(state) {
            return Err(CoreError::InvalidStateTransition {
                version: self.version.as_u64(),
                from: self.state,
                to: state,
            });
        }
        Ok(Self {
            version: self.version,
            state,
            error_message: if state == SubscriptionState::Error {
                error_message
            } else {
                None
            },
            subscriptions: Arc::clone(&self.subscriptions),
        })
    }

    /// Settles the initial empty version as complete.
    ///
    /// Version 0 is never uploaded, so there is nothing for the server to
    /// confirm.
    ///
    /// # Errors
    ///
    /// Fails for any snapshot other than an uncommitted version 0.
    pub fn settle_initial(&self) -> CoreResult<Self> {
        if self.version != SetVersion::INITIAL || self.state != SubscriptionState::Uncommitted {
            return Err(CoreError::InvalidStateTransition {
                version: self.version.as_u64(),
                from: self.state,
                to: SubscriptionState::Complete,
            });
        }
        Ok(Self {
            state: SubscriptionState::Complete,
            ..self.clone()
        })
    }

    /// Returns the version.
    #[must_use]
    pub fn version(&self) -> SetVersion {
        self.version
    }

    /// Returns the convergence state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Returns the server's error message; only set in the `ERROR` state.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns the number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Alias of [`len`](Self::len).
    #[must_use]
    pub fn size(&self) -> usize {
        self.len()
    }

    /// Returns true if the set has no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Iterates subscriptions in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Subscription> {
        self.subscriptions.iter()
    }

    /// Returns the subscriptions as a slice.
    #[must_use]
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Finds the subscription running exactly `query`.
    ///
    /// The query text is compared as stored, so callers should pass text
    /// normalized by the local database.
    #[must_use]
    pub fn find(&self, query: &Query) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.matches_query(query.object_type(), query.text()))
    }

    /// Finds a subscription by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.name() == Some(name))
    }
}

impl Default for SubscriptionSetSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a> IntoIterator for &'a SubscriptionSetSnapshot {
    type Item = &'a Subscription;
    type IntoIter = std::slice::Iter<'a, Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Checks that every subscription is valid and no two share an identity.
pub(crate) fn validate_set(subscriptions: &[Subscription]) -> CoreResult<()> {
    let mut seen: HashSet<SubscriptionKey<'_>> = HashSet::with_capacity(subscriptions.len());
    for subscription in subscriptions {
        subscription.validate()?;
        if !seen.insert(subscription.key()) {
            return Err(match subscription.name() {
                Some(name) => CoreError::duplicate_name(name),
                None => CoreError::invalid_subscription(format!(
                    "anonymous query '{}' over '{}' appears twice",
                    subscription.query(),
                    subscription.object_type()
                )),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionState::*;

    fn people() -> Subscription {
        Subscription::new("people", "Person", "age > 18").unwrap()
    }

    fn pets() -> Subscription {
        Subscription::new("pets", "Pet", "TRUEPREDICATE").unwrap()
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = SubscriptionSetSnapshot::empty();
        assert_eq!(snapshot.version(), SetVersion::INITIAL);
        assert_eq!(snapshot.state(), Uncommitted);
        assert!(snapshot.is_empty());
        assert!(snapshot.error_message().is_none());
        assert_eq!(snapshot.iter().count(), 0);
    }

    #[test]
    fn legal_transitions() {
        assert!(Uncommitted.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Bootstrapping));
        assert!(Pending.can_transition_to(Complete));
        assert!(Bootstrapping.can_transition_to(Error));
        assert!(Bootstrapping.can_transition_to(Superseded));

        assert!(!Complete.can_transition_to(Pending));
        assert!(!Error.can_transition_to(Complete));
        assert!(!Superseded.can_transition_to(Complete));
        assert!(!Bootstrapping.can_transition_to(Pending));
        assert!(!Uncommitted.can_transition_to(Complete));
    }

    #[test]
    fn refined_view_shares_subscriptions() {
        let committed = SubscriptionSetSnapshot::committed(SetVersion::new(1), vec![people()]);
        let pending = committed.with_state(Pending, None).unwrap();

        assert_eq!(committed.state(), Uncommitted);
        assert_eq!(pending.state(), Pending);
        assert_eq!(pending.version(), committed.version());
        assert!(Arc::ptr_eq(&committed.subscriptions, &pending.subscriptions));
    }

    #[test]
    fn error_message_only_in_error_state() {
        let pending = SubscriptionSetSnapshot::committed(SetVersion::new(1), vec![people()])
            .with_state(Pending, None)
            .unwrap();

        let complete = pending.with_state(Complete, Some("ignored".into())).unwrap();
        assert!(complete.error_message().is_none());

        let failed = pending
            .with_state(Error, Some("bad syntax".into()))
            .unwrap();
        assert_eq!(failed.error_message(), Some("bad syntax"));
    }

    #[test]
    fn terminal_states_do_not_move() {
        let complete = SubscriptionSetSnapshot::committed(SetVersion::new(1), vec![])
            .with_state(Pending, None)
            .unwrap()
            .with_state(Complete, None)
            .unwrap();

        let err = complete.with_state(Pending, None).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidStateTransition {
                from: Complete,
                to: Pending,
                ..
            }
        ));
    }

    #[test]
    fn settle_initial_only_for_version_zero() {
        let settled = SubscriptionSetSnapshot::empty().settle_initial().unwrap();
        assert_eq!(settled.state(), Complete);

        let v1 = SubscriptionSetSnapshot::committed(SetVersion::new(1), vec![]);
        assert!(v1.settle_initial().is_err());
    }

    #[test]
    fn lookups() {
        let snapshot =
            SubscriptionSetSnapshot::committed(SetVersion::new(2), vec![people(), pets()]);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.find(&Query::new("Pet", "TRUEPREDICATE")).unwrap().name(),
            Some("pets")
        );
        assert!(snapshot.find(&Query::new("Pet", "age > 18")).is_none());
        assert_eq!(snapshot.find_by_name("people").unwrap().object_type(), "Person");

        let names: Vec<_> = (&snapshot).into_iter().filter_map(|s| s.name()).collect();
        assert_eq!(names, vec!["people", "pets"]);
    }

    #[test]
    fn from_parts_rejects_duplicate_names() {
        let other = Subscription::new("people", "Person", "age > 30").unwrap();
        let err = SubscriptionSetSnapshot::from_parts(
            SetVersion::new(1),
            Pending,
            None,
            vec![people(), other],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateName { name } if name == "people"));
    }

    #[test]
    fn from_parts_rejects_stray_error_message() {
        let result = SubscriptionSetSnapshot::from_parts(
            SetVersion::new(1),
            Complete,
            Some("boom".into()),
            vec![],
        );
        assert!(result.is_err());
    }
}
