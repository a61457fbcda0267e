//! HTTP channel implementation.
//!
//! Uploads go to `POST {base}/subscriptions/upload`. Once the server accepts
//! a version, a background thread polls `POST {base}/subscriptions/poll` and
//! feeds the returned acknowledgements to the coordinator until the version
//! settles, is superseded, or the settle timeout runs out.
//!
//! The actual HTTP client is abstracted via a trait so any library can be
//! plugged in.

use crate::channel::ServerChannel;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::sink::AckSink;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use subsync_protocol::{
    CborMessage, PollRequest, PollResponse, StateAck, UploadRequest, UploadResponse,
};
use tracing::{debug, warn};

/// Upload endpoint path.
pub const UPLOAD_PATH: &str = "/subscriptions/upload";
/// Poll endpoint path.
pub const POLL_PATH: &str = "/subscriptions/poll";

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

struct Endpoint<C> {
    base_url: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> Endpoint<C> {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn post_cbor<Req, Res>(&self, path: &str, request: &Req) -> SyncResult<Res>
    where
        Req: CborMessage,
        Res: CborMessage,
    {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = request
            .encode()
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url, body).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(e)
        })?;
        *self.last_error.write() = None;

        Res::decode(&response)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }
}

struct Poller {
    version: u64,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// HTTP-based server channel.
///
/// Uses CBOR encoding for request/response bodies.
pub struct HttpChannel<C: HttpClient> {
    endpoint: Arc<Endpoint<C>>,
    client_id: [u8; 16],
    poll_interval: Duration,
    settle_timeout: Duration,
    poller: Mutex<Option<Poller>>,
}

impl<C: HttpClient + 'static> HttpChannel<C> {
    /// Creates a channel to `config.server_url`.
    pub fn new(config: &SyncConfig, client: C) -> Self {
        Self {
            endpoint: Arc::new(Endpoint {
                base_url: config.server_url.trim_end_matches('/').to_owned(),
                client,
                connected: AtomicBool::new(true),
                last_error: RwLock::new(None),
            }),
            client_id: config.client_id,
            poll_interval: config.poll_interval,
            settle_timeout: config.timeout,
            poller: Mutex::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.endpoint.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.endpoint.last_error.read().clone()
    }

    /// Returns the version the background poller is following, if any.
    pub fn polling_version(&self) -> Option<u64> {
        self.poller
            .lock()
            .as_ref()
            .filter(|p| !p.handle.is_finished())
            .map(|p| p.version)
    }

    fn stop_poller(&self) -> Option<JoinHandle<()>> {
        self.poller.lock().take().map(|poller| {
            poller.stop.store(true, Ordering::SeqCst);
            poller.handle
        })
    }

    fn start_poller(&self, version: u64, sink: AckSink) -> SyncResult<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let endpoint = Arc::clone(&self.endpoint);
        let request = PollRequest::new(self.client_id, version);
        let interval = self.poll_interval;
        let timeout = self.settle_timeout;
        let stopped = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("subsync-poller".into())
            .spawn(move || poll_acks(&endpoint, &request, &sink, interval, timeout, &stopped))
            .map_err(|e| SyncError::TaskFailed(format!("failed to start poller: {e}")))?;

        *self.poller.lock() = Some(Poller {
            version,
            stop,
            handle,
        });
        Ok(())
    }
}

/// Polls until `version` settles, is superseded, or the server stays silent
/// for `timeout`. Any acknowledgement for the version counts as a sign of
/// life, so a long bootstrap is not a transport failure.
fn poll_acks<C: HttpClient>(
    endpoint: &Endpoint<C>,
    request: &PollRequest,
    sink: &AckSink,
    interval: Duration,
    timeout: Duration,
    stop: &AtomicBool,
) {
    let version = request.version;
    let mut deadline = Instant::now() + timeout;
    loop {
        if stop.load(Ordering::SeqCst) || !sink.is_waiting_on(version) {
            debug!(version, "poller finished");
            return;
        }
        if Instant::now() >= deadline {
            warn!(version, ?timeout, "server went silent on the subscription set");
            sink.fail(
                version,
                SyncError::transport_retryable("no acknowledgement from the server in time"),
            );
            return;
        }

        std::thread::sleep(interval);
        if stop.load(Ordering::SeqCst) {
            return;
        }

        match endpoint.post_cbor::<_, PollResponse>(POLL_PATH, request) {
            Ok(response) => {
                if response.acks.iter().any(|ack| ack.version == version) {
                    deadline = Instant::now() + timeout;
                }
                for ack in response.acks {
                    sink.deliver(ack);
                }
            }
            Err(e) => {
                warn!(version, error = %e, "polling for acknowledgements failed");
                sink.fail(version, e);
                return;
            }
        }
    }
}

impl<C: HttpClient + 'static> ServerChannel for HttpChannel<C> {
    fn upload(&self, request: &UploadRequest, sink: AckSink) -> SyncResult<()> {
        // A newer upload replaces whatever the old poller was following.
        drop(self.stop_poller());

        let response: UploadResponse = self.endpoint.post_cbor(UPLOAD_PATH, request)?;
        if !response.accepted {
            let message = response
                .error
                .unwrap_or_else(|| "upload refused by server".to_owned());
            debug!(version = request.version, error = %message, "server refused subscription set");
            sink.deliver(StateAck::error(request.version, message));
            return Ok(());
        }

        self.start_poller(request.version, sink)
    }

    fn is_connected(&self) -> bool {
        self.endpoint.is_connected()
    }

    fn close(&self) -> SyncResult<()> {
        self.endpoint.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stop_poller() {
            handle
                .join()
                .map_err(|_| SyncError::TaskFailed("poller panicked".into()))?;
        }
        Ok(())
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url
            .find("/subscriptions/")
            .map(|i| &url[i..])
            .unwrap_or(url);

        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
