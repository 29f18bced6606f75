//! Client Module
//!
//! `RpcClient` owns one connection: the shared state behind a single lock, the
//! dispatcher task reading frames, and the signer for private actions.
//!
//! Submission takes the lock only to assign an ID, register the call and
//! write the frame; the caller then waits outside the lock.

use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::call::{CallResult, CompletionWaiter, WaitError};
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::RpcError;
use crate::protocol::{Request, Response, Topic};
use crate::registry::CallRegistry;
use crate::signing::Signer;
use crate::subscription::{Destination, SubscriptionRouter};
use crate::transport::{FrameSink, FrameSource};
use crate::websocket;

/// State guarded by the connection lock
pub(crate) struct Shared {
    pub(crate) registry: CallRegistry,
    pub(crate) router: SubscriptionRouter,
    sink: Box<dyn FrameSink>,
    /// Set once the dispatcher has exited
    pub(crate) closed: Option<RpcError>,
}

/// Connection counters
#[derive(Debug, Default)]
pub struct ClientStats {
    /// Requests written to the transport
    pub submitted: AtomicU64,
    /// Responses matched to a waiting call
    pub completed: AtomicU64,
    /// Responses with the success flag unset
    pub server_errors: AtomicU64,
    pub timeouts: AtomicU64,
    /// Calls failed by a dead connection
    pub failed: AtomicU64,
    /// Responses for calls that had already timed out
    pub late_responses: AtomicU64,
    /// Notifications pushed to a destination
    pub notifications: AtomicU64,
    /// Unroutable frames
    pub anomalies: AtomicU64,
}

impl ClientStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Client for one duplex RPC connection
pub struct RpcClient {
    session: Uuid,
    shared: Arc<Mutex<Shared>>,
    signer: Option<Signer>,
    config: ClientConfig,
    stats: Arc<ClientStats>,
    stop_tx: watch::Sender<bool>,
    dispatcher: Option<JoinHandle<Result<(), RpcError>>>,
    errors: Option<mpsc::UnboundedReceiver<RpcError>>,
}

impl RpcClient {
    /// Build a client over an established transport and start its dispatcher.
    /// Must be called inside a tokio runtime.
    pub fn new<W, R>(sink: W, source: R, config: ClientConfig) -> Result<Self, RpcError>
    where
        W: FrameSink,
        R: FrameSource,
    {
        config.validate()?;

        let session = Uuid::new_v4();
        let shared = Arc::new(Mutex::new(Shared {
            registry: CallRegistry::new(),
            router: SubscriptionRouter::new(),
            sink: Box::new(sink),
            closed: None,
        }));
        let stats = Arc::new(ClientStats::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let signer = config
            .credentials
            .clone()
            .map(|credentials| Signer::new(credentials).with_integer_encoding(config.integer_encoding));

        let dispatcher = Dispatcher::new(
            source,
            shared.clone(),
            stats.clone(),
            config.anomaly_policy,
            stop_rx,
            errors_tx,
            session,
        );
        let handle = tokio::spawn(dispatcher.run());

        Ok(Self {
            session,
            shared,
            signer,
            config,
            stats,
            stop_tx,
            dispatcher: Some(handle),
            errors: Some(errors_rx),
        })
    }

    /// Connect to `config.url` over WebSocket
    pub async fn connect(config: ClientConfig) -> Result<Self, RpcError> {
        config.validate()?;
        let (sink, source) = websocket::connect(&config.url)
            .await
            .map_err(RpcError::Connect)?;
        Self::new(sink, source, config)
    }

    /// Session ID attached to this connection's log lines
    pub fn session_id(&self) -> Uuid {
        self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Reported anomalies and the dispatcher's terminal error. Can be taken once.
    pub fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<RpcError>> {
        self.errors.take()
    }

    /// Whether the dispatcher has exited
    pub fn is_closed(&self) -> bool {
        self.dispatcher.as_ref().map_or(true, |handle| handle.is_finished())
    }

    /// Number of calls awaiting a response
    pub async fn pending_count(&self) -> usize {
        self.shared.lock().await.registry.len()
    }

    /// Subscribe to `topic` with a new bounded channel
    pub async fn subscribe(&self, topic: impl Into<Topic>) -> mpsc::Receiver<Value> {
        let (destination, rx) = Destination::channel(self.config.subscription_buffer);
        self.register_subscription(topic, destination).await;
        rx
    }

    /// Route `topic` to an existing destination, replacing any previous one
    pub async fn register_subscription(&self, topic: impl Into<Topic>, destination: Destination) -> Option<Destination> {
        let topic = topic.into();
        debug!(session = %self.session, topic = %topic, "Registered subscription");
        self.shared.lock().await.router.register(topic, destination)
    }

    pub async fn unsubscribe(&self, topic: &str) -> bool {
        self.shared.lock().await.router.unregister(topic)
    }

    /// Register `request` and write it to the transport.
    ///
    /// A failed write unregisters the call before returning, so no ID is left
    /// behind for a request the remote never saw.
    pub async fn submit(&self, mut request: Request) -> Result<PendingResponse, RpcError> {
        let mut shared = self.shared.lock().await;
        if let Some(err) = &shared.closed {
            return Err(err.clone());
        }

        let waiter = shared.registry.register(&mut request);
        let id = request.id;

        if let Err(err) = shared.sink.send(&request).await {
            shared.registry.remove(id);
            drop(shared);
            warn!(session = %self.session, id = id, action = %request.action, error = %err, "Failed to write request");
            return Err(RpcError::TransportWrite(err));
        }
        drop(shared);

        ClientStats::incr(&self.stats.submitted);
        debug!(session = %self.session, id = id, action = %request.action, "Submitted request");

        Ok(PendingResponse {
            id,
            action: request.action,
            session: self.session,
            waiter,
            shared: self.shared.clone(),
            stats: self.stats.clone(),
            timeout: self.config.call_timeout,
            settled: false,
        })
    }

    /// Submit `request` and wait for its response
    pub async fn call(&self, request: Request) -> Result<Response, RpcError> {
        self.submit(request).await?.wait().await
    }

    /// Sign `request` with the configured credentials, then call
    pub async fn call_private(&self, mut request: Request) -> Result<Response, RpcError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| RpcError::MissingCredentials(request.action.clone()))?;
        signer.sign(&mut request);
        self.call(request).await
    }

    /// Stop the dispatcher and wait for it. Calls still pending resolve with
    /// `Closed`; the returned value is the dispatcher's own outcome.
    pub async fn shutdown(mut self) -> Result<(), RpcError> {
        let _ = self.stop_tx.send(true);
        match self.dispatcher.take() {
            Some(handle) => handle.await.unwrap_or(Err(RpcError::Closed)),
            None => Ok(()),
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

/// A submitted call the caller can wait on.
///
/// Dropping it before `wait` finishes, including cancelling the future that
/// owns it, discards the registration; a later response is dropped as late.
pub struct PendingResponse {
    id: u64,
    action: String,
    session: Uuid,
    waiter: CompletionWaiter<CallResult>,
    shared: Arc<Mutex<Shared>>,
    stats: Arc<ClientStats>,
    timeout: Duration,
    settled: bool,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the response, at most the configured call timeout.
    ///
    /// On timeout the call is discarded from the registry so a late response
    /// is dropped by the dispatcher. If the call was resolved while the
    /// timeout fired, that resolution wins.
    pub async fn wait(mut self) -> Result<Response, RpcError> {
        let first = self.waiter.wait_timeout(self.timeout).await;
        let outcome = match first {
            Ok(outcome) => outcome,
            Err(WaitError::TimedOut) => {
                let discarded = self.shared.lock().await.registry.discard(self.id);
                if discarded {
                    ClientStats::incr(&self.stats.timeouts);
                    warn!(
                        session = %self.session,
                        id = self.id,
                        action = %self.action,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Request timed out"
                    );
                    Err(RpcError::Timeout {
                        id: self.id,
                        timeout: self.timeout,
                    })
                } else {
                    // Already taken out of the registry, so its outcome is in flight
                    self.waiter.wait().await.unwrap_or(Err(RpcError::Closed))
                }
            }
            Err(WaitError::Abandoned) => Err(RpcError::Closed),
        };
        self.settled = true;

        let response = outcome?;
        if !response.success {
            ClientStats::incr(&self.stats.server_errors);
            return Err(RpcError::Server {
                code: response.error,
                message: response.message,
            });
        }
        Ok(response)
    }
}

impl fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("id", &self.id)
            .field("action", &self.action)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let id = self.id;
        debug!(session = %self.session, id = id, action = %self.action, "Pending request abandoned");
        match self.shared.try_lock() {
            Ok(mut shared) => {
                shared.registry.discard(id);
            }
            Err(_) => {
                let shared = self.shared.clone();
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(async move {
                        shared.lock().await.registry.discard(id);
                    });
                }
            }
        }
    }
}
