//! Server channel abstraction.

use crate::error::{SyncError, SyncResult};
use crate::sink::AckSink;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use subsync_protocol::{StateAck, UploadRequest};

/// A server channel hands committed subscription sets to the server and
/// reports the server's progress back.
///
/// `upload` is called with the coordinator's writer lock held, so uploads
/// leave in version order. Acknowledgements may be delivered through the
/// [`AckSink`] from any thread, before or after `upload` returns.
pub trait ServerChannel: Send + Sync {
    /// Sends one set version to the server.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the request could not be delivered.
    /// Retryable errors are retried with the configured backoff.
    fn upload(&self, request: &UploadRequest, sink: AckSink) -> SyncResult<()>;

    /// Checks if the channel is connected.
    fn is_connected(&self) -> bool;

    /// Closes the channel. Pending acknowledgements are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot shut down cleanly.
    fn close(&self) -> SyncResult<()>;
}

type Responder = Box<dyn Fn(&UploadRequest) -> Vec<StateAck> + Send + Sync>;

/// A scriptable in-process channel for testing.
///
/// By default it records uploads and acknowledges nothing; tests drive the
/// state machine with [`ack`](Self::ack). A responder installed with
/// [`respond_with`](Self::respond_with) answers every upload synchronously.
pub struct MockChannel {
    connected: AtomicBool,
    uploads: Mutex<Vec<UploadRequest>>,
    sink: Mutex<Option<AckSink>>,
    responder: Mutex<Option<Responder>>,
    failures: Mutex<VecDeque<SyncError>>,
}

impl MockChannel {
    /// Creates a connected channel that acknowledges nothing on its own.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            uploads: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            responder: Mutex::new(None),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Creates a channel whose server accepts every set.
    ///
    /// Sets that introduce new queries go through `BOOTSTRAPPING`; the
    /// others complete directly.
    pub fn auto_complete() -> Self {
        let channel = Self::new();
        channel.respond_with(|request| {
            if request.introduces_new_queries {
                vec![
                    StateAck::bootstrapping(request.version),
                    StateAck::complete(request.version),
                ]
            } else {
                vec![StateAck::complete(request.version)]
            }
        });
        channel
    }

    /// Installs a responder that answers every later upload.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&UploadRequest) -> Vec<StateAck> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Removes the responder.
    pub fn clear_responder(&self) {
        *self.responder.lock() = None;
    }

    /// Makes the next upload attempt fail with `error`.
    ///
    /// Calls queue up: each one fails one more attempt.
    pub fn fail_next(&self, error: SyncError) {
        self.failures.lock().push_back(error);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns every upload that got through, oldest first.
    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().clone()
    }

    /// Returns the number of uploads that got through.
    pub fn upload_count(&self) -> usize {
        self.uploads.lock().len()
    }

    /// Returns the most recent upload.
    pub fn last_upload(&self) -> Option<UploadRequest> {
        self.uploads.lock().last().cloned()
    }

    /// Returns the sink handed over with the most recent upload.
    pub fn sink(&self) -> Option<AckSink> {
        self.sink.lock().clone()
    }

    /// Delivers `ack` as if the server had sent it.
    ///
    /// Returns true if the coordinator applied it.
    pub fn ack(&self, ack: StateAck) -> bool {
        match self.sink() {
            Some(sink) => sink.deliver(ack),
            None => false,
        }
    }

    /// Reports a transport failure for `version` as the listener would.
    pub fn fail(&self, version: u64, error: SyncError) {
        if let Some(sink) = self.sink() {
            sink.fail(version, error);
        }
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerChannel for MockChannel {
    fn upload(&self, request: &UploadRequest, sink: AckSink) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        self.uploads.lock().push(request.clone());
        *self.sink.lock() = Some(sink.clone());

        let acks = match self.responder.lock().as_ref() {
            Some(respond) => respond(request),
            None => Vec::new(),
        };
        for ack in acks {
            sink.deliver(ack);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_channel_connection() {
        let channel = MockChannel::new();
        assert!(channel.is_connected());

        channel.set_connected(false);
        assert!(!channel.is_connected());

        channel.set_connected(true);
        channel.close().unwrap();
        assert!(!channel.is_connected());
    }

    #[test]
    fn mock_channel_not_connected_error() {
        let channel = MockChannel::new();
        channel.set_connected(false);

        let request = UploadRequest::new([0u8; 16], 1, Vec::new(), false);
        let result = channel.upload(&request, AckSink::detached());
        assert!(matches!(result, Err(SyncError::NotConnected)));
        assert_eq!(channel.upload_count(), 0);
    }

    #[test]
    fn mock_channel_injected_failures_are_consumed_in_order() {
        let channel = MockChannel::new();
        channel.fail_next(SyncError::transport_retryable("reset"));
        channel.fail_next(SyncError::transport_fatal("refused"));

        let request = UploadRequest::new([0u8; 16], 1, Vec::new(), false);
        assert!(channel
            .upload(&request, AckSink::detached())
            .unwrap_err()
            .is_retryable());
        assert!(!channel
            .upload(&request, AckSink::detached())
            .unwrap_err()
            .is_retryable());
        channel.upload(&request, AckSink::detached()).unwrap();
        assert_eq!(channel.last_upload(), Some(request));
    }

    #[test]
    fn ack_without_upload_is_dropped() {
        let channel = MockChannel::new();
        assert!(!channel.ack(StateAck::complete(1)));
    }
}
