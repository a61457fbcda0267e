//! # SubSync Engine
//!
//! Client-side coordinator for flexible-sync subscription sets.
//!
//! This crate provides:
//! - [`SubscriptionCoordinator`]: transactional updates, version publication
//!   and convergence waits (blocking, async, callback)
//! - [`ServerChannel`]: the seam to the server, with [`MockChannel`] for tests
//!   and [`HttpChannel`] over any [`HttpClient`]
//! - Retry with exponential backoff for uploads
//!
//! ## Lifecycle of a version
//!
//! ```text
//! update() ──► UNCOMMITTED ──► PENDING ──► BOOTSTRAPPING ──► COMPLETE
//!                                 │              │
//!                                 ├──────────────┴────────► ERROR
//!                                 └─ (newer commit) ──────► SUPERSEDED
//! ```
//!
//! ## Key Invariants
//!
//! - One writer at a time; versions increase by one per commit
//! - Readers always see a complete snapshot, never a half-applied update
//! - A failed update publishes nothing
//! - Acknowledgements for superseded versions are ignored
//! - Waiters follow the newest version and are woken by every change

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod config;
mod coordinator;
mod error;
mod http;
mod sink;

pub use channel::{MockChannel, ServerChannel};
pub use config::{RetryConfig, SyncConfig};
pub use coordinator::{SubscriptionCoordinator, SyncCallback, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{HttpChannel, HttpClient, LoopbackClient, LoopbackServer, POLL_PATH, UPLOAD_PATH};
pub use sink::AckSink;
