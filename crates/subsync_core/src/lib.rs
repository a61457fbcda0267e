//! # SubSync Core
//!
//! Subscription model and local persistence for SubSync.
//!
//! This crate provides:
//! - Subscriptions, queries and the object type schema
//! - Immutable, versioned subscription set snapshots and their state machine
//! - The single-writer mutation builder with savepoints
//! - The [`LocalDatabase`] seam and its log-backed implementation,
//!   [`SubscriptionStore`]
//!
//! ## Key Invariants
//!
//! - Snapshots never change after creation
//! - Versions increase by exactly one per commit
//! - Within one set, names are unique and anonymous queries are unique
//! - A version's state only moves forward; `COMPLETE`, `ERROR` and
//!   `SUPERSEDED` are final

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod error;
pub mod log;
mod mutable;
mod schema;
mod snapshot;
mod store;
mod subscription;
mod types;

pub use config::StoreConfig;
pub use database::{normalize_query_text, LocalDatabase, QueryHandle};
pub use error::{CoreError, CoreResult};
pub use mutable::{ChangeSummary, Mutation, MutableSubscriptionSet, Savepoint};
pub use schema::{FieldDef, FieldKind, ObjectModel, ObjectSchema, Schema};
pub use snapshot::{SubscriptionSetSnapshot, SubscriptionState};
pub use store::{CompactionStats, SubscriptionStore};
pub use subscription::{Query, Subscription, SubscriptionKey};
pub use types::{SetVersion, Timestamp};
