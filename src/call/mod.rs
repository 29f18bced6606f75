//! Call Module
//!
//! Single-assignment completion primitive and the pending call built on it.
//!
//! ```text
//! Created -> Registered -> Completed(response) | Completed(server error)
//!                        | TimedOut | TransportFailed
//! ```
//!
//! A call is completed at most once: the first `complete` wins and every
//! later attempt is a no-op returning `false`.

use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::error::RpcError;
use crate::protocol::{Request, Response};

/// What a pending call resolves to
pub type CallResult = Result<Response, RpcError>;

/// Errors observed while waiting on a completion
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out waiting for completion")]
    TimedOut,
    #[error("completion dropped without a value")]
    Abandoned,
}

/// Create a connected completion/waiter pair
pub fn completion<T>() -> (Completion<T>, CompletionWaiter<T>) {
    let (tx, rx) = oneshot::channel();
    (Completion { tx: Some(tx) }, CompletionWaiter { rx })
}

/// Completing side of a single-assignment value
#[derive(Debug)]
pub struct Completion<T> {
    tx: Option<oneshot::Sender<T>>,
}

impl<T> Completion<T> {
    /// Assign the value. Returns `true` only if this call assigned it and the
    /// waiter is still listening.
    pub fn complete(&mut self, value: T) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.tx.is_none()
    }
}

/// Waiting side of a single-assignment value
#[derive(Debug)]
pub struct CompletionWaiter<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> CompletionWaiter<T> {
    /// Wait at most `timeout`. On `TimedOut` the waiter stays usable.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<T, WaitError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WaitError::Abandoned),
            Err(_) => Err(WaitError::TimedOut),
        }
    }

    /// Wait without a deadline
    pub async fn wait(&mut self) -> Result<T, WaitError> {
        (&mut self.rx).await.map_err(|_| WaitError::Abandoned)
    }
}

/// A submitted request awaiting resolution
#[derive(Debug)]
pub struct PendingCall {
    request: Request,
    completion: Completion<CallResult>,
    registered_at: Instant,
}

impl PendingCall {
    /// `request` is the snapshot sent on the wire, ID already assigned
    pub fn new(request: Request) -> (Self, CompletionWaiter<CallResult>) {
        let (completion, waiter) = completion();
        let call = Self {
            request,
            completion,
            registered_at: Instant::now(),
        };
        (call, waiter)
    }

    pub fn id(&self) -> u64 {
        self.request.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn elapsed(&self) -> Duration {
        self.registered_at.elapsed()
    }

    /// Attach the outcome and signal the waiter
    pub fn resolve(&mut self, outcome: CallResult) -> bool {
        self.completion.complete(outcome)
    }
}
