//! Property-based test generators using proptest.
//!
//! Names and queries are drawn from small pools so that generated sequences
//! hit collisions (same name, same anonymous query) often.

use crate::fixtures::{PERSON, PET};
use proptest::prelude::*;
use subsync_core::{CoreResult, MutableSubscriptionSet, Query, Subscription};

/// Strategy for generating subscription names from a small pool.
pub fn subscription_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["adults", "cats", "dogs", "recent", "all"]).prop_map(String::from)
}

/// Strategy for generating object types from the sample schema.
pub fn object_type_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just(PERSON.to_string()), Just(PET.to_string())]
}

/// Strategy for generating simple query predicates, sometimes with extra
/// whitespace that normalization removes.
pub fn query_text_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["age", "score", "name"]),
        prop::sample::select(vec![">", "<", "=="]),
        0u8..4,
        any::<bool>(),
    )
        .prop_map(|(field, op, value, padded)| {
            if padded {
                format!("  {field}   {op} {value} ")
            } else {
                format!("{field} {op} {value}")
            }
        })
}

/// One step of a subscription update, for driving a
/// [`MutableSubscriptionSet`] from generated input.
#[derive(Debug, Clone, PartialEq)]
pub enum SetOp {
    /// `add` with an optional name.
    Add {
        /// Subscription name.
        name: Option<String>,
        /// Object type.
        object_type: String,
        /// Query text.
        query: String,
    },
    /// `add_or_update` of a named subscription.
    AddOrUpdate {
        /// Subscription name.
        name: String,
        /// Object type.
        object_type: String,
        /// Query text.
        query: String,
    },
    /// `remove_named`.
    RemoveNamed(String),
    /// `remove_all_of_type`.
    RemoveAllOfType(String),
    /// `remove_all`.
    RemoveAll,
}

impl SetOp {
    /// Applies the step to `set`.
    ///
    /// # Errors
    ///
    /// Returns whatever the set returns; a duplicate name is the common one.
    pub fn apply(&self, set: &mut MutableSubscriptionSet<'_>) -> CoreResult<()> {
        match self {
            SetOp::Add {
                name,
                object_type,
                query,
            } => {
                let query = Query::new(object_type.as_str(), query.as_str());
                set.add(Subscription::create(name.as_deref(), query)?)?;
            }
            SetOp::AddOrUpdate {
                name,
                object_type,
                query,
            } => {
                set.add_or_update(Subscription::new(name, object_type, query)?)?;
            }
            SetOp::RemoveNamed(name) => {
                set.remove_named(name);
            }
            SetOp::RemoveAllOfType(object_type) => {
                set.remove_all_of_type(object_type);
            }
            SetOp::RemoveAll => {
                set.remove_all();
            }
        }
        Ok(())
    }
}

/// Strategy for generating a single [`SetOp`], weighted towards adds.
pub fn set_op_strategy() -> impl Strategy<Value = SetOp> {
    prop_oneof![
        4 => (
            prop::option::of(subscription_name_strategy()),
            object_type_strategy(),
            query_text_strategy()
        )
            .prop_map(|(name, object_type, query)| SetOp::Add {
                name,
                object_type,
                query
            }),
        2 => (
            subscription_name_strategy(),
            object_type_strategy(),
            query_text_strategy()
        )
            .prop_map(|(name, object_type, query)| SetOp::AddOrUpdate {
                name,
                object_type,
                query
            }),
        2 => subscription_name_strategy().prop_map(SetOp::RemoveNamed),
        1 => object_type_strategy().prop_map(SetOp::RemoveAllOfType),
        1 => Just(SetOp::RemoveAll),
    ]
}

/// Strategy for generating up to `max_len` steps.
pub fn set_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<SetOp>> {
    prop::collection::vec(set_op_strategy(), 0..=max_len)
}
