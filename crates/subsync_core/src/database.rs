//! The local database collaborator.

use crate::error::CoreResult;
use crate::schema::Schema;
use crate::snapshot::SubscriptionSetSnapshot;
use crate::subscription::Query;

/// A query the local database has accepted, in its normalized form.
///
/// Two subscriptions are the same anonymous query exactly when their handles
/// are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryHandle {
    object_type: String,
    query: String,
}

impl QueryHandle {
    /// Creates a handle from already normalized parts.
    pub fn new(object_type: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            query: query.into(),
        }
    }

    /// Returns the object type.
    #[must_use]
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Returns the normalized query text.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Converts the handle back into a [`Query`].
    #[must_use]
    pub fn into_query(self) -> Query {
        Query::new(self.object_type, self.query)
    }
}

/// Storage and query-matching capability the subscription machinery runs on.
///
/// The database owns the schema, decides what a query normalizes to, and
/// persists every committed set and every state change so a later session,
/// or a coordinator refresh, can pick them up.
pub trait LocalDatabase: Send + Sync {
    /// Returns the object types this database synchronizes.
    fn schema(&self) -> &Schema;

    /// Validates `query` over `object_type` and returns its normalized form.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObjectType`](crate::CoreError::UnknownObjectType)
    /// for object types outside the schema and
    /// [`CoreError::InvalidSubscription`](crate::CoreError::InvalidSubscription)
    /// for empty queries.
    fn match_query(&self, object_type: &str, query: &str) -> CoreResult<QueryHandle>;

    /// Persists a snapshot. Called once per commit and once per state change.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be stored.
    fn persist(&self, snapshot: &SubscriptionSetSnapshot) -> CoreResult<()>;

    /// Loads the latest persisted snapshot, if any set was ever committed.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted data cannot be read or is corrupted.
    fn load_latest_snapshot(&self) -> CoreResult<Option<SubscriptionSetSnapshot>>;
}

/// Collapses runs of whitespace and trims the ends.
#[must_use]
pub fn normalize_query_text(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_whitespace() {
        assert_eq!(normalize_query_text("  age   >\t18 "), "age > 18");
        assert_eq!(normalize_query_text("TRUEPREDICATE"), "TRUEPREDICATE");
        assert_eq!(normalize_query_text("   "), "");
    }

    #[test]
    fn handle_round_trips_into_query() {
        let query = QueryHandle::new("Person", "age > 18").into_query();
        assert_eq!(query.object_type(), "Person");
        assert_eq!(query.text(), "age > 18");
    }
}
