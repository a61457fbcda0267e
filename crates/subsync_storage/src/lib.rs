//! # SubSync Storage
//!
//! Byte-level storage for the subscription log.
//!
//! Backends are **opaque append-only byte stores**. They know nothing about
//! subscription records, framing or checksums; `subsync_core` owns the log
//! format and only asks a backend to read, append, flush and truncate.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and ephemeral sessions
//! - [`FileBackend`] - a single file on disk, optionally held under an
//!   exclusive advisory lock
//!
//! ## Example
//!
//! ```rust
//! use subsync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"set v1").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"set v1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
