//! # SubSync Protocol
//!
//! Wire messages exchanged between a client and the subscription server.
//!
//! This crate provides:
//! - `UploadRequest` / `UploadResponse` for handing a set version to the server
//! - `PollRequest` / `PollResponse` carrying `StateAck` acknowledgements
//! - CBOR encoding/decoding through [`CborMessage`]
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Exchange
//!
//! ```text
//! client                                   server
//!   | -- UploadRequest { version: n } -->    |
//!   | <-- UploadResponse { accepted } ----   |
//!   | -- PollRequest { version: n } ---->    |
//!   | <-- PollResponse { acks } ---------    |   BOOTSTRAPPING, COMPLETE | ERROR
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;

pub use codec::CborMessage;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    PollRequest, PollResponse, QueryEntry, ServerState, StateAck, UploadRequest, UploadResponse,
    PROTOCOL_VERSION,
};
