//! # SubSync Testkit
//!
//! Test utilities for SubSync.
//!
//! This crate provides:
//! - A sample object schema and model types
//! - Subscription stores backed by memory or a temporary directory
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use subsync_core::LocalDatabase;
//! use subsync_testkit::prelude::*;
//!
//! let store = memory_store();
//! assert!(store.match_query(PERSON, "age > 18").is_ok());
//! assert!(store.load_latest_snapshot().unwrap().is_none());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
