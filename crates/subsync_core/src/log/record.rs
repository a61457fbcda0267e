//! Subscription log records and their framing.

use crate::error::{CoreError, CoreResult};
use crate::snapshot::SubscriptionState;
use crate::subscription::Subscription;
use crate::types::SetVersion;
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a subscription log record.
pub const LOG_MAGIC: [u8; 4] = *b"SSUB";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A new set version was committed.
    SetCommitted = 1,
    /// A version changed convergence state.
    StateChanged = 2,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::SetCommitted),
            2 => Some(Self::StateChanged),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One entry of the subscription log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A set version with its full subscription list.
    SetCommitted {
        /// Committed version.
        version: SetVersion,
        /// Subscriptions in insertion order.
        subscriptions: Vec<Subscription>,
    },

    /// A state change of an already committed version.
    StateChanged {
        /// Affected version.
        version: SetVersion,
        /// New state.
        state: SubscriptionState,
        /// Server error, only for `ERROR`.
        error_message: Option<String>,
    },
}

#[derive(Serialize, Deserialize)]
struct CommittedPayload {
    version: SetVersion,
    subscriptions: Vec<Subscription>,
}

#[derive(Serialize, Deserialize)]
struct StatePayload {
    version: SetVersion,
    state: SubscriptionState,
    error_message: Option<String>,
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::SetCommitted { .. } => LogRecordType::SetCommitted,
            Self::StateChanged { .. } => LogRecordType::StateChanged,
        }
    }

    /// Returns the version the record is about.
    #[must_use]
    pub fn version(&self) -> SetVersion {
        match self {
            Self::SetCommitted { version, .. } | Self::StateChanged { version, .. } => *version,
        }
    }

    /// Serializes the CBOR payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if encoding fails.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        let result = match self {
            Self::SetCommitted {
                version,
                subscriptions,
            } => ciborium::into_writer(
                &CommittedPayload {
                    version: *version,
                    subscriptions: subscriptions.clone(),
                },
                &mut buf,
            ),
            Self::StateChanged {
                version,
                state,
                error_message,
            } => ciborium::into_writer(
                &StatePayload {
                    version: *version,
                    state: *state,
                    error_message: error_message.clone(),
                },
                &mut buf,
            ),
        };
        result.map_err(CoreError::codec)?;
        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if the payload is not valid CBOR for the
    /// record type.
    pub fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> CoreResult<Self> {
        match record_type {
            LogRecordType::SetCommitted => {
                let p: CommittedPayload =
                    ciborium::from_reader(payload).map_err(CoreError::codec)?;
                Ok(Self::SetCommitted {
                    version: p.version,
                    subscriptions: p.subscriptions,
                })
            }
            LogRecordType::StateChanged => {
                let p: StatePayload = ciborium::from_reader(payload).map_err(CoreError::codec)?;
                Ok(Self::StateChanged {
                    version: p.version,
                    state: p.state,
                    error_message: p.error_message,
                })
            }
        }
    }

    /// Encodes the record with its envelope, ready to append.
    ///
    /// ```text
    /// | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or exceeds 4 GiB.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("log record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        // CRC covers everything before it
        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}
