//! Append-only subscription log.
//!
//! Every committed set and every state change is appended as one framed
//! record. The latest snapshot is rebuilt by replaying the log front to back.
//!
//! ## Record Format
//!
//! ```text
//! | magic "SSUB" (4) | version (2) | type (1) | length (4) | CBOR payload (N) | crc32 (4) |
//! ```
//!
//! ## Recovery Policy
//!
//! - **Torn tail**: a header or payload cut short at the end of the log is
//!   the trace of a crash mid-append. The scan stops before it and the store
//!   truncates it on open.
//! - **Damaged record**: a checksum mismatch, bad magic, unknown type or
//!   future format version is corruption. The store refuses to open.

mod reader;
mod record;

pub use reader::{read_records, LogScan};
pub use record::{LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};
