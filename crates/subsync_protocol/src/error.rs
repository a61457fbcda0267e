//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes did not decode into the expected message.
    #[error("decode error: {0}")]
    Decode(String),

    /// The peer speaks a protocol version this build does not.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            ProtocolError::Decode("expected map".into()).to_string(),
            "decode error: expected map"
        );
        assert_eq!(
            ProtocolError::UnsupportedVersion(9).to_string(),
            "unsupported protocol version 9"
        );
    }
}
