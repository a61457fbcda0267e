//! Protocol messages for subscription sync.

use crate::codec::CborMessage;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: u16 = 1;

/// One subscription as the server sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEntry {
    /// Subscription name, if named.
    pub name: Option<String>,
    /// Object type the query runs against.
    pub object_type: String,
    /// Normalized query text.
    pub query: String,
}

impl QueryEntry {
    /// Creates a query entry.
    pub fn new(
        name: Option<String>,
        object_type: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            name,
            object_type: object_type.into(),
            query: query.into(),
        }
    }
}

/// Upload of one committed subscription set version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Protocol version.
    pub protocol_version: u16,
    /// Client identifier.
    pub client_id: [u8; 16],
    /// Set version being uploaded.
    pub version: u64,
    /// The complete query set of that version.
    pub queries: Vec<QueryEntry>,
    /// Whether the version adds queries the server has no data sent for yet.
    /// A set without new queries may complete without bootstrapping.
    pub introduces_new_queries: bool,
}

impl UploadRequest {
    /// Creates an upload request.
    pub fn new(
        client_id: [u8; 16],
        version: u64,
        queries: Vec<QueryEntry>,
        introduces_new_queries: bool,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            client_id,
            version,
            queries,
            introduces_new_queries,
        }
    }

    /// Checks that the request speaks a supported protocol version.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnsupportedVersion`] for newer versions.
    pub fn check_version(&self) -> ProtocolResult<()> {
        if self.protocol_version > PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.protocol_version));
        }
        Ok(())
    }
}

/// Server answer to an upload.
///
/// `accepted == false` means the request itself was refused at the door
/// (malformed, wrong protocol); a rejected *query set* is reported later as
/// an [`ServerState::Error`] acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Whether the upload was taken.
    pub accepted: bool,
    /// Reason for refusal.
    pub error: Option<String>,
}

impl UploadResponse {
    /// Creates an accepting response.
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            error: None,
        }
    }

    /// Creates a refusing response.
    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            error: Some(message.into()),
        }
    }
}

/// Request for acknowledgements about a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRequest {
    /// Client identifier.
    pub client_id: [u8; 16],
    /// Version the client is waiting on.
    pub version: u64,
}

impl PollRequest {
    /// Creates a poll request.
    pub fn new(client_id: [u8; 16], version: u64) -> Self {
        Self { client_id, version }
    }
}

/// Acknowledgements the server has produced since the last poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    /// Acknowledgements in the order they happened.
    pub acks: Vec<StateAck>,
}

impl PollResponse {
    /// Creates a poll response.
    pub fn new(acks: Vec<StateAck>) -> Self {
        Self { acks }
    }

    /// Creates a response carrying nothing new.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Server-side progress of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    /// Accepted, initial data is being sent.
    Bootstrapping,
    /// Everything the set asks for has been sent.
    Complete,
    /// The set was rejected.
    Error,
}

impl ServerState {
    /// Returns true for states the server never leaves for a version.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// A state acknowledgement for one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAck {
    /// Acknowledged version.
    pub version: u64,
    /// New server-side state.
    pub state: ServerState,
    /// Server error, for [`ServerState::Error`].
    pub error_message: Option<String>,
}

impl StateAck {
    /// Version is bootstrapping.
    pub fn bootstrapping(version: u64) -> Self {
        Self {
            version,
            state: ServerState::Bootstrapping,
            error_message: None,
        }
    }

    /// Version is complete.
    pub fn complete(version: u64) -> Self {
        Self {
            version,
            state: ServerState::Complete,
            error_message: None,
        }
    }

    /// Version was rejected.
    pub fn error(version: u64, message: impl Into<String>) -> Self {
        Self {
            version,
            state: ServerState::Error,
            error_message: Some(message.into()),
        }
    }
}

impl CborMessage for UploadRequest {}
impl CborMessage for UploadResponse {}
impl CborMessage for PollRequest {}
impl CborMessage for PollResponse {}
impl CborMessage for StateAck {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn upload_request_roundtrip() {
        let request = UploadRequest::new(
            [7u8; 16],
            3,
            vec![
                QueryEntry::new(Some("people".into()), "Person", "age > 18"),
                QueryEntry::new(None, "Pet", "TRUEPREDICATE"),
            ],
            true,
        );
        let decoded = UploadRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn future_protocol_version_is_rejected() {
        let mut request = UploadRequest::new([0u8; 16], 1, Vec::new(), false);
        assert!(request.check_version().is_ok());
        request.protocol_version = PROTOCOL_VERSION + 1;
        assert!(matches!(
            request.check_version(),
            Err(ProtocolError::UnsupportedVersion(v)) if v == PROTOCOL_VERSION + 1
        ));
    }

    #[test]
    fn upload_response_constructors() {
        assert!(UploadResponse::accepted().accepted);
        let refused = UploadResponse::refused("malformed");
        assert!(!refused.accepted);
        assert_eq!(refused.error.as_deref(), Some("malformed"));
    }

    #[test]
    fn poll_response_with_acks() {
        let response = PollResponse::new(vec![
            StateAck::bootstrapping(2),
            StateAck::complete(2),
            StateAck::error(3, "invalid query"),
        ]);
        let decoded = PollResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.acks.len(), 3);
        assert_eq!(decoded.acks[2].error_message.as_deref(), Some("invalid query"));
        assert!(decoded.acks[1].state.is_terminal());
        assert!(!decoded.acks[0].state.is_terminal());
    }

    #[test]
    fn wrong_message_type_fails_to_decode() {
        let bytes = PollRequest::new([1u8; 16], 4).encode().unwrap();
        assert!(matches!(
            PollResponse::decode(&bytes),
            Err(ProtocolError::Decode(_))
        ));
        assert!(matches!(
            StateAck::decode(b"not cbor"),
            Err(ProtocolError::Decode(_))
        ));
    }

    proptest! {
        #[test]
        fn arbitrary_query_sets_survive_the_wire(
            version in any::<u64>(),
            queries in prop::collection::vec(
                (prop::option::of("[a-z]{1,8}"), "[A-Z][a-z]{0,8}", ".{1,32}"),
                0..8,
            ),
            fresh in any::<bool>(),
        ) {
            let entries: Vec<_> = queries
                .into_iter()
                .map(|(name, object_type, query)| QueryEntry::new(name, object_type, query))
                .collect();
            let request = UploadRequest::new([3u8; 16], version, entries, fresh);
            let decoded = UploadRequest::decode(&request.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, request);
        }
    }
}
