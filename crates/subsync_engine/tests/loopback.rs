//! End-to-end tests over the HTTP channel and an in-process server.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use subsync_core::{SetVersion, Subscription, SubscriptionState};
use subsync_engine::{
    HttpChannel, LoopbackClient, LoopbackServer, RetryConfig, ServerChannel,
    SubscriptionCoordinator, SyncConfig, SyncError, SyncResult, POLL_PATH, UPLOAD_PATH,
};
use subsync_protocol::{
    CborMessage, PollRequest, PollResponse, ServerState, StateAck, UploadRequest,
    UploadResponse,
};
use subsync_testkit::{memory_store, PERSON, PET};

/// Accepts every upload, rejects queries using `limit`, and hands out the
/// resulting acknowledgements one poll at a time. Once a version is
/// bootstrapping, polls keep reporting that for `bootstrap_time`.
#[derive(Clone, Default)]
struct TestServer {
    queued: Arc<Mutex<HashMap<u64, VecDeque<StateAck>>>>,
    uploads: Arc<Mutex<Vec<UploadRequest>>>,
    offline: Arc<AtomicBool>,
    silent: Arc<AtomicBool>,
    bootstrap_time: Arc<Mutex<Duration>>,
    bootstrapping_since: Arc<Mutex<HashMap<u64, Instant>>>,
}

impl TestServer {
    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    fn set_bootstrap_time(&self, time: Duration) {
        *self.bootstrap_time.lock() = time;
    }

    fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().clone()
    }

    fn handle_upload(&self, request: UploadRequest) -> UploadResponse {
        if let Err(e) = request.check_version() {
            return UploadResponse::refused(e.to_string());
        }

        let version = request.version;
        let acks = if let Some(bad) = request.queries.iter().find(|q| q.query.contains("limit")) {
            vec![StateAck::error(
                version,
                format!("unsupported clause in '{}'", bad.query),
            )]
        } else if request.introduces_new_queries {
            vec![StateAck::bootstrapping(version), StateAck::complete(version)]
        } else {
            vec![StateAck::complete(version)]
        };

        self.uploads.lock().push(request);
        if !self.silent.load(Ordering::SeqCst) {
            self.queued.lock().insert(version, acks.into());
        }
        UploadResponse::accepted()
    }

    fn handle_poll(&self, request: PollRequest) -> PollResponse {
        let version = request.version;
        let mut queued = self.queued.lock();
        let Some(queue) = queued.get_mut(&version) else {
            return PollResponse::new(Vec::new());
        };

        let mut since = self.bootstrapping_since.lock();
        if since
            .get(&version)
            .is_some_and(|started| started.elapsed() < *self.bootstrap_time.lock())
        {
            return PollResponse::new(vec![StateAck::bootstrapping(version)]);
        }

        let next = queue.pop_front();
        if next
            .as_ref()
            .is_some_and(|ack| matches!(ack.state, ServerState::Bootstrapping))
        {
            since.insert(version, Instant::now());
        }
        PollResponse::new(next.into_iter().collect())
    }
}

impl LoopbackServer for TestServer {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        if self.offline.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        let encoded = match path {
            UPLOAD_PATH => {
                let request = UploadRequest::decode(body).map_err(|e| e.to_string())?;
                self.handle_upload(request).encode()
            }
            POLL_PATH => {
                let request = PollRequest::decode(body).map_err(|e| e.to_string())?;
                self.handle_poll(request).encode()
            }
            other => return Err(format!("no route for {other}")),
        };
        encoded.map_err(|e| e.to_string())
    }
}

type Channel = HttpChannel<LoopbackClient<TestServer>>;

fn setup(config: SyncConfig) -> (TestServer, Arc<Channel>, SubscriptionCoordinator) {
    let server = TestServer::default();
    let channel = Arc::new(HttpChannel::new(
        &config,
        LoopbackClient::new(server.clone()),
    ));
    let coordinator =
        SubscriptionCoordinator::new(memory_store(), channel.clone(), config).unwrap();
    (server, channel, coordinator)
}

fn config() -> SyncConfig {
    SyncConfig::new("http://localhost:9090")
        .with_poll_interval(Duration::from_millis(2))
        .with_retry(RetryConfig::no_retry())
}

const WAIT: Duration = Duration::from_secs(10);

fn subscribe(coordinator: &SubscriptionCoordinator, name: &str, query: &str) {
    coordinator
        .update(|set| -> SyncResult<()> {
            set.add_or_update(Subscription::new(name, PERSON, query)?)?;
            Ok(())
        })
        .unwrap();
}

#[test]
fn accepted_set_completes_through_polling() {
    let (server, channel, coordinator) = setup(config());
    subscribe(&coordinator, "adults", "age >= 18");

    assert!(coordinator.wait_for_synchronization_timeout(WAIT).unwrap());
    assert_eq!(coordinator.state(), SubscriptionState::Complete);

    let uploads = server.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].version, 1);
    assert!(uploads[0].introduces_new_queries);
    assert_eq!(uploads[0].queries[0].name.as_deref(), Some("adults"));
    assert_eq!(coordinator.stats().acks_applied, 2);
    assert!(channel.last_error().is_none());
}

#[test]
fn rejected_query_surfaces_as_error_state() {
    let (_server, _channel, coordinator) = setup(config());
    subscribe(&coordinator, "adults", "age >= 18 limit 10");

    assert!(!coordinator.wait_for_synchronization_timeout(WAIT).unwrap());
    assert_eq!(coordinator.state(), SubscriptionState::Error);
    assert!(coordinator.error_message().unwrap().contains("limit"));

    subscribe(&coordinator, "adults", "age >= 18");
    assert!(coordinator.wait_for_synchronization_timeout(WAIT).unwrap());
    assert_eq!(coordinator.version(), SetVersion::new(2));
    assert!(coordinator.error_message().is_none());
}

#[test]
fn removal_only_commit_skips_bootstrapping() {
    let (server, _channel, coordinator) = setup(config());
    coordinator
        .update(|set| -> SyncResult<()> {
            set.add(Subscription::new("adults", PERSON, "age >= 18")?)?;
            set.add(Subscription::new("cats", PET, "kind == 'cat'")?)?;
            Ok(())
        })
        .unwrap();
    assert!(coordinator.wait_for_synchronization_timeout(WAIT).unwrap());

    coordinator
        .update(|set| -> SyncResult<()> {
            assert!(set.remove_named("cats"));
            Ok(())
        })
        .unwrap();
    assert!(coordinator.wait_for_synchronization_timeout(WAIT).unwrap());

    let uploads = server.uploads();
    assert_eq!(uploads.len(), 2);
    assert!(!uploads[1].introduces_new_queries);
    assert_eq!(uploads[1].queries.len(), 1);
    assert_eq!(coordinator.stats().acks_applied, 3);
}

#[test]
fn offline_server_is_a_transport_error_until_it_returns() {
    let (server, channel, coordinator) = setup(config());
    server.set_offline(true);

    subscribe(&coordinator, "adults", "age >= 18");
    assert_eq!(coordinator.state(), SubscriptionState::Pending);
    assert_eq!(channel.last_error().as_deref(), Some("connection refused"));

    let err = coordinator.wait_for_synchronization_timeout(WAIT).unwrap_err();
    assert!(matches!(err, SyncError::Transport { .. }));
    assert!(err.is_retryable());

    server.set_offline(false);
    assert!(coordinator.wait_for_synchronization_timeout(WAIT).unwrap());
    assert_eq!(server.uploads().len(), 1);
}

#[test]
fn silent_server_times_out_the_listener() {
    let config = config().with_timeout(Duration::from_millis(250));
    let (server, _channel, coordinator) = setup(config);
    server.set_silent(true);

    subscribe(&coordinator, "adults", "age >= 18");
    let err = coordinator.wait_for_synchronization_timeout(WAIT).unwrap_err();
    assert!(matches!(err, SyncError::Transport { .. }));

    server.set_silent(false);
    assert!(coordinator.wait_for_synchronization_timeout(WAIT).unwrap());
    assert_eq!(server.uploads().len(), 2);
}

#[test]
fn long_bootstrap_is_not_a_transport_failure() {
    let config = config().with_timeout(Duration::from_millis(200));
    let (server, _channel, coordinator) = setup(config);
    server.set_bootstrap_time(Duration::from_millis(600));

    subscribe(&coordinator, "adults", "age >= 18");
    assert!(coordinator.wait_for_synchronization().unwrap());
    assert_eq!(coordinator.state(), SubscriptionState::Complete);

    let stats = coordinator.stats();
    assert_eq!(stats.acks_applied, 2);
    assert!(stats.acks_ignored > 0);
    assert!(stats.last_error.is_none());
    assert_eq!(server.uploads().len(), 1);
}

#[test]
fn close_stops_the_poller() {
    let (server, channel, coordinator) = setup(config());
    server.set_silent(true);
    subscribe(&coordinator, "adults", "age >= 18");
    assert_eq!(channel.polling_version(), Some(1));

    coordinator.close().unwrap();
    assert!(channel.polling_version().is_none());
    assert!(!channel.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_wait_over_http() {
    let (_server, _channel, coordinator) = setup(config());

    coordinator
        .update_async(|set| -> SyncResult<()> {
            set.add(Subscription::new("adults", PERSON, "age >= 18")?)?;
            Ok(())
        })
        .await
        .unwrap();

    let settled = coordinator
        .wait_for_synchronization_async_with_timeout(WAIT)
        .await
        .unwrap();
    assert_eq!(settled.state(), SubscriptionState::Complete);
}
