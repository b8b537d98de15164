//! Worker Session Service
//!
//! Every data request boots a dedicated worker, performs the boot handshake,
//! sends one request, waits for one reply and terminates the worker.
//!
//! ```text
//! Idle → Booting → Ready → Requesting → Terminated
//! ```
//!
//! Each wait is bounded by the configured timeout and by the caller's
//! cancellation token. The worker is terminated on every exit path.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::protocol::{BootMessage, BootReply, ChunkRequest, WorkerConfig};
use crate::worker::{Worker, WorkerFactory};

/// Lifecycle of one `chunk` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Booting,
    Ready,
    Requesting,
    Terminated,
}

/// A booted worker and the session id it announced.
pub struct WorkerProxy {
    worker: Box<dyn Worker>,
    id: Value,
}

impl WorkerProxy {
    pub fn id(&self) -> &Value {
        &self.id
    }

    fn terminate(mut self) {
        self.worker.terminate();
    }
}

/// Boots workers and runs data requests through them.
pub struct WorkerSessions {
    factory: Arc<dyn WorkerFactory>,
    config: WorkerConfig,
    timeout: Option<Duration>,
    /// Holds the booted worker while its request is posted, then is emptied,
    /// so each call boots its own worker.
    cached: Mutex<Option<WorkerProxy>>,
}

impl WorkerSessions {
    /// Sessions for the worker script served at `location`.
    pub fn new(factory: Arc<dyn WorkerFactory>, location: impl Into<String>) -> Self {
        Self {
            factory,
            config: WorkerConfig::new(location),
            timeout: None,
            cached: Mutex::new(None),
        }
    }

    /// Bound the handshake and the reply. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra fields sent to the worker inside the boot `config`.
    pub fn with_config_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.extra.insert(key.into(), value);
        self
    }

    /// The boot `config` posted to every worker.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn location(&self) -> &str {
        &self.config.location
    }

    /// Request `url` from a fresh worker and return its reply.
    pub async fn chunk(&self, url: &str) -> Result<Value, SessionError> {
        self.chunk_with_cancel(url, &CancellationToken::new()).await
    }

    /// Like [`chunk`](Self::chunk), abandoning the request once `cancel` fires.
    pub async fn chunk_with_cancel(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, SessionError> {
        let proxy = self.boot(cancel).await?;
        debug!(state = ?SessionState::Ready, id = %proxy.id, "Worker session ready");

        let mut proxy = self.dispatch(proxy, url)?;
        let result = wait(proxy.worker.as_mut(), self.timeout, cancel, "request").await;
        proxy.terminate();
        debug!(state = ?SessionState::Terminated, url, "Worker session closed");

        result
    }

    async fn boot(&self, cancel: &CancellationToken) -> Result<WorkerProxy, SessionError> {
        debug!(state = ?SessionState::Idle, location = %self.config.location, "Booting worker");
        let mut worker = self.factory.spawn(&self.config.location)?;
        debug!(state = ?SessionState::Booting, "Worker spawned");

        let handshake = async {
            let boot = serde_json::to_value(BootMessage {
                config: self.config.clone(),
            })?;
            worker.post_message(boot)?;
            let reply = wait(worker.as_mut(), self.timeout, cancel, "handshake").await?;
            Ok::<_, SessionError>(serde_json::from_value::<BootReply>(reply).unwrap_or_default())
        }
        .await;

        match handshake {
            Ok(reply) => Ok(WorkerProxy {
                worker,
                id: reply.id,
            }),
            Err(e) => {
                warn!("Worker handshake failed: {}", e);
                worker.terminate();
                Err(e)
            }
        }
    }

    /// Cache `proxy`, post the request through the cached handle and clear
    /// the slot again. The slot stays locked throughout, so no other call
    /// can pick the handle up.
    fn dispatch(&self, proxy: WorkerProxy, url: &str) -> Result<WorkerProxy, SessionError> {
        let mut slot = self.cached.lock();
        let cached = slot.insert(proxy);
        debug!(state = ?SessionState::Requesting, id = %cached.id, url, "Posting request");

        let posted = serde_json::to_value(ChunkRequest {
            url: url.to_string(),
        })
        .map_err(SessionError::from)
        .and_then(|request| {
            cached
                .worker
                .post_message(request)
                .map_err(SessionError::from)
        });

        let proxy = slot.take().ok_or(SessionError::Disconnected)?;
        drop(slot);

        match posted {
            Ok(()) => Ok(proxy),
            Err(e) => {
                proxy.terminate();
                Err(e)
            }
        }
    }
}

/// Next message from `worker`, bounded by `timeout` and `cancel`.
async fn wait(
    worker: &mut dyn Worker,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    phase: &'static str,
) -> Result<Value, SessionError> {
    let next = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, worker.next_message())
                .await
                .map_err(|_| SessionError::Timeout(phase)),
            None => Ok(worker.next_message().await),
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        message = next => message?.ok_or(SessionError::Disconnected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Clone, Copy, PartialEq)]
    enum Behavior {
        Echo,
        SilentBoot,
        SilentRequest,
        CloseAfterBoot,
        RejectRequest,
    }

    #[derive(Default)]
    struct Counters {
        spawned: AtomicUsize,
        terminated: AtomicUsize,
        posted: parking_lot::Mutex<Vec<Value>>,
    }

    struct FakeWorker {
        behavior: Behavior,
        id: usize,
        counters: Arc<Counters>,
        tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Value>>>,
        rx: mpsc::UnboundedReceiver<Value>,
        terminated: bool,
    }

    #[async_trait]
    impl Worker for FakeWorker {
        fn post_message(&self, message: Value) -> Result<(), WorkerError> {
            self.counters.posted.lock().push(message.clone());
            let mut tx = self.tx.lock();
            // A worker that has gone away drops whatever it is sent.
            let Some(sender) = tx.as_ref() else {
                return Ok(());
            };

            if message.get("config").is_some() {
                if self.behavior != Behavior::SilentBoot {
                    let _ = sender.send(json!({ "id": self.id }));
                }
                if self.behavior == Behavior::CloseAfterBoot {
                    *tx = None;
                }
            } else if self.behavior == Behavior::RejectRequest {
                return Err(WorkerError::Terminated);
            } else if self.behavior == Behavior::Echo {
                let _ = sender.send(json!({ "worker": self.id, "url": message["url"] }));
            }
            Ok(())
        }

        async fn next_message(&mut self) -> Option<Value> {
            self.rx.recv().await
        }

        fn terminate(&mut self) {
            if !self.terminated {
                self.terminated = true;
                self.counters.terminated.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct FakeFactory {
        behavior: Behavior,
        counters: Arc<Counters>,
        fail: bool,
    }

    impl WorkerFactory for FakeFactory {
        fn spawn(&self, _location: &str) -> Result<Box<dyn Worker>, WorkerError> {
            if self.fail {
                return Err(WorkerError::JavaScript("bad bundle".into()));
            }
            let id = self.counters.spawned.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, rx) = mpsc::unbounded_channel();
            Ok(Box::new(FakeWorker {
                behavior: self.behavior,
                id,
                counters: self.counters.clone(),
                tx: parking_lot::Mutex::new(Some(tx)),
                rx,
                terminated: false,
            }))
        }
    }

    fn sessions(behavior: Behavior) -> (WorkerSessions, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let factory = FakeFactory {
            behavior,
            counters: counters.clone(),
            fail: false,
        };
        let sessions = WorkerSessions::new(Arc::new(factory), "/workers/background-adapters/worker.js")
            .with_timeout(Some(Duration::from_millis(100)));
        (sessions, counters)
    }

    #[tokio::test]
    async fn test_chunk_boots_and_replies() {
        let (sessions, counters) = sessions(Behavior::Echo);

        let reply = tokio_test::assert_ok!(sessions.chunk("/api/widgets").await);

        assert_eq!(reply, json!({ "worker": 1, "url": "/api/widgets" }));
        assert_eq!(counters.spawned.load(Ordering::SeqCst), 1);
        assert_eq!(counters.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(
            *counters.posted.lock(),
            vec![
                json!({ "config": { "location": "/workers/background-adapters/worker.js" } }),
                json!({ "url": "/api/widgets" }),
            ]
        );
    }

    #[tokio::test]
    async fn test_sequential_chunks_boot_separate_workers() {
        let (sessions, counters) = sessions(Behavior::Echo);

        let first = sessions.chunk("/a").await.unwrap();
        let second = sessions.chunk("/b").await.unwrap();

        assert_eq!(first["worker"], json!(1));
        assert_eq!(second["worker"], json!(2));
        assert_eq!(counters.spawned.load(Ordering::SeqCst), 2);
        assert_eq!(counters.terminated.load(Ordering::SeqCst), 2);
        assert!(sessions.cached.lock().is_none());
    }

    #[tokio::test]
    async fn test_config_values_reach_worker() {
        let (sessions, counters) = sessions(Behavior::Echo);
        let sessions = sessions.with_config_value("timeout", json!(250));

        sessions.chunk("/a").await.unwrap();
        assert_eq!(counters.posted.lock()[0]["config"]["timeout"], json!(250));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (sessions, counters) = sessions(Behavior::SilentBoot);

        let err = sessions.chunk("/a").await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout("handshake")));
        assert_eq!(counters.terminated.load(Ordering::SeqCst), 1);
        // The request was never posted.
        assert_eq!(counters.posted.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (sessions, counters) = sessions(Behavior::SilentRequest);

        let err = sessions.chunk("/a").await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout("request")));
        assert_eq!(counters.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let (sessions, counters) = sessions(Behavior::SilentRequest);
        let sessions = sessions.with_timeout(None);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = sessions.chunk_with_cancel("/a", &cancel).await.unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert_eq!(counters.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnected_worker() {
        let (sessions, counters) = sessions(Behavior::CloseAfterBoot);

        let err = sessions.chunk("/a").await.unwrap_err();
        assert!(matches!(err, SessionError::Disconnected));
        assert_eq!(counters.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let counters = Arc::new(Counters::default());
        let factory = FakeFactory {
            behavior: Behavior::Echo,
            counters: counters.clone(),
            fail: true,
        };
        let sessions = WorkerSessions::new(Arc::new(factory), "/w.js");

        let err = sessions.chunk("/a").await.unwrap_err();
        assert!(matches!(err, SessionError::Worker(WorkerError::JavaScript(_))));
    }

    #[tokio::test]
    async fn test_slot_holds_proxy_only_while_posting() {
        let (sessions, _counters) = sessions(Behavior::Echo);

        let booted = sessions.boot(&CancellationToken::new()).await.unwrap();
        assert!(sessions.cached.lock().is_none());

        let mut proxy = sessions.dispatch(booted, "/a").unwrap();
        assert!(sessions.cached.lock().is_none());
        assert_eq!(
            proxy.worker.next_message().await,
            Some(json!({ "worker": 1, "url": "/a" }))
        );
        proxy.terminate();
    }

    #[tokio::test]
    async fn test_rejected_request_terminates_worker() {
        let (sessions, counters) = sessions(Behavior::RejectRequest);

        let err = sessions.chunk("/a").await.unwrap_err();
        assert!(matches!(err, SessionError::Worker(WorkerError::Terminated)));
        assert_eq!(counters.terminated.load(Ordering::SeqCst), 1);
        assert!(sessions.cached.lock().is_none());
    }
}
