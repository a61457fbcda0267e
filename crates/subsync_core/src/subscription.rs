//! Subscriptions and the queries they carry.

use crate::error::{CoreError, CoreResult};
use crate::schema::ObjectModel;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque query over one object type.
///
/// The text is never interpreted here; the local database decides whether it
/// is well formed and how it is normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    object_type: String,
    text: String,
}

impl Query {
    /// Creates a query over `object_type`.
    pub fn new(object_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            text: text.into(),
        }
    }

    /// Creates a query over the object type of `T`.
    pub fn of<T: ObjectModel>(text: impl Into<String>) -> Self {
        Self::new(T::OBJECT_TYPE, text)
    }

    /// Returns the object type the query runs against.
    #[must_use]
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Returns the query text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.object_type, self.text)
    }
}

/// Dedup identity of a subscription inside one set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKey<'a> {
    /// Named subscriptions are identified by name.
    Named(&'a str),
    /// Anonymous subscriptions are identified by their query.
    Anonymous {
        /// Object type.
        object_type: &'a str,
        /// Query text.
        query: &'a str,
    },
}

/// One named or anonymous query that the device wants synchronized.
///
/// Subscriptions are plain values. Their timestamps are stamped when they are
/// added to a set through a [`MutableSubscriptionSet`](crate::MutableSubscriptionSet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    name: Option<String>,
    object_type: String,
    query: String,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl Subscription {
    /// Creates a subscription, named if `name` is given.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSubscription`] if the name, object type or
    /// query text is empty.
    pub fn create(name: Option<&str>, query: Query) -> CoreResult<Self> {
        let now = Timestamp::now();
        let subscription = Self {
            name: name.map(str::to_owned),
            object_type: query.object_type,
            query: query.text,
            created_at: now,
            updated_at: now,
        };
        subscription.validate()?;
        Ok(subscription)
    }

    /// Creates a named subscription.
    ///
    /// # Errors
    ///
    /// See [`create`](Self::create).
    pub fn named(name: &str, query: Query) -> CoreResult<Self> {
        Self::create(Some(name), query)
    }

    /// Creates an anonymous subscription.
    ///
    /// # Errors
    ///
    /// See [`create`](Self::create).
    pub fn anonymous(query: Query) -> CoreResult<Self> {
        Self::create(None, query)
    }

    /// Creates a named subscription from its parts.
    ///
    /// # Errors
    ///
    /// See [`create`](Self::create).
    pub fn new(name: &str, object_type: &str, query: &str) -> CoreResult<Self> {
        Self::create(Some(name), Query::new(object_type, query))
    }

    /// Returns the name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the object type.
    #[must_use]
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Returns the query text.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Returns when the subscription was added to its set.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Returns when the subscription's query was last replaced.
    #[must_use]
    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Returns true if this subscription has no name.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }

    /// Returns the dedup identity.
    #[must_use]
    pub fn key(&self) -> SubscriptionKey<'_> {
        match &self.name {
            Some(name) => SubscriptionKey::Named(name),
            None => SubscriptionKey::Anonymous {
                object_type: &self.object_type,
                query: &self.query,
            },
        }
    }

    /// Returns true if this subscription runs exactly `object_type`/`query`.
    #[must_use]
    pub fn matches_query(&self, object_type: &str, query: &str) -> bool {
        self.object_type == object_type && self.query == query
    }

    /// Returns true if both subscriptions have the same name and query,
    /// ignoring timestamps.
    #[must_use]
    pub fn same_definition(&self, other: &Subscription) -> bool {
        self.name == other.name && self.matches_query(&other.object_type, &other.query)
    }

    /// Checks the construction-time invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSubscription`] on the first violation.
    pub fn validate(&self) -> CoreResult<()> {
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(CoreError::invalid_subscription(
                "subscription name must not be empty",
            ));
        }
        if self.object_type.trim().is_empty() {
            return Err(CoreError::invalid_subscription(
                "object type must not be empty",
            ));
        }
        if self.query.trim().is_empty() {
            return Err(CoreError::invalid_subscription(format!(
                "query over '{}' must not be empty",
                self.object_type
            )));
        }
        Ok(())
    }

    /// Returns a copy carrying the given query and timestamps.
    pub(crate) fn stamped(
        &self,
        object_type: String,
        query: String,
        created_at: Timestamp,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            name: self.name.clone(),
            object_type,
            query,
            created_at,
            updated_at,
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({}: {})", self.object_type, self.query),
            None => write!(f, "<anonymous> ({}: {})", self.object_type, self.query),
        }
    }
}
