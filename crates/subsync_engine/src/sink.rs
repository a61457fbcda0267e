//! Acknowledgement feed from a channel into its coordinator.

use crate::coordinator::Shared;
use crate::error::SyncError;
use std::fmt;
use std::sync::Weak;
use subsync_core::SetVersion;
use subsync_protocol::StateAck;

/// Where a [`ServerChannel`](crate::ServerChannel) reports server progress.
///
/// A sink is a weak handle: once every coordinator handle is dropped,
/// deliveries are silently discarded. Deliveries never block on an update in
/// progress, so a channel may call the sink from inside `upload`.
#[derive(Clone)]
pub struct AckSink {
    shared: Weak<Shared>,
}

impl AckSink {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }

    /// Creates a sink attached to nothing. Every delivery is dropped.
    #[must_use]
    pub fn detached() -> Self {
        Self { shared: Weak::new() }
    }

    /// Applies a state acknowledgement.
    ///
    /// Returns true if it moved the active version forward. Acks for
    /// superseded versions, repeated acks and acks that would move a version
    /// backwards are ignored.
    pub fn deliver(&self, ack: StateAck) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.apply_ack(ack),
            None => false,
        }
    }

    /// Reports that the channel lost the ability to deliver `version`.
    ///
    /// Waiters on that version fail with a transport error; the next wait
    /// uploads it again.
    pub fn fail(&self, version: u64, error: SyncError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.apply_failure(SetVersion::new(version), &error);
        }
    }

    /// Returns true while `version` is the active version and has not
    /// settled. Background listeners stop once this turns false.
    #[must_use]
    pub fn is_waiting_on(&self, version: u64) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.is_waiting_on(SetVersion::new(version)))
    }

    /// Returns true if the coordinator behind this sink is gone.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.shared.strong_count() == 0
    }
}

impl fmt::Debug for AckSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckSink")
            .field("detached", &self.is_detached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_sink_drops_everything() {
        let sink = AckSink::detached();
        assert!(sink.is_detached());
        assert!(!sink.deliver(StateAck::complete(1)));
        assert!(!sink.is_waiting_on(1));
        sink.fail(1, SyncError::NotConnected);
    }
}
