//! Dispatcher Module
//!
//! The single reader of the connection. Each frame is either a reply, which
//! resolves the matching pending call, or a notification batch, which is
//! pushed to the subscribed destinations. When the loop ends, every call still
//! registered is resolved with the terminal error so no caller waits on a dead
//! connection.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::{ClientStats, Shared};
use crate::config::AnomalyPolicy;
use crate::error::RpcError;
use crate::protocol::{Inbound, Notification, Response};
use crate::transport::{FrameSource, TransportError};

pub(crate) struct Dispatcher<R> {
    source: R,
    shared: Arc<Mutex<Shared>>,
    stats: Arc<ClientStats>,
    policy: AnomalyPolicy,
    stop: watch::Receiver<bool>,
    errors: mpsc::UnboundedSender<RpcError>,
    session: Uuid,
}

impl<R: FrameSource> Dispatcher<R> {
    pub(crate) fn new(
        source: R,
        shared: Arc<Mutex<Shared>>,
        stats: Arc<ClientStats>,
        policy: AnomalyPolicy,
        stop: watch::Receiver<bool>,
        errors: mpsc::UnboundedSender<RpcError>,
        session: Uuid,
    ) -> Self {
        Self {
            source,
            shared,
            stats,
            policy,
            stop,
            errors,
            session,
        }
    }

    /// Run until stopped or until the connection fails
    pub(crate) async fn run(mut self) -> Result<(), RpcError> {
        info!(session = %self.session, policy = ?self.policy, "Dispatcher started");

        let result = self.read_loop().await;
        let terminal = match &result {
            Ok(()) => RpcError::Closed,
            Err(err) => err.clone(),
        };
        self.fail_pending(terminal).await;

        match &result {
            Ok(()) => info!(session = %self.session, "Dispatcher stopped"),
            Err(err) => {
                error!(session = %self.session, error = %err, "Dispatcher terminated");
                let _ = self.errors.send(err.clone());
            }
        }
        result
    }

    async fn read_loop(&mut self) -> Result<(), RpcError> {
        loop {
            if *self.stop.borrow() {
                return Ok(());
            }

            let received = tokio::select! {
                biased;
                _ = self.stop.changed() => return Ok(()),
                received = self.source.recv() => received,
            };
            let frame = match received {
                Ok(frame) => frame,
                Err(TransportError::Decode(reason)) => {
                    debug!(session = %self.session, reason = %reason, "Undecodable frame");
                    self.handle_anomaly(RpcError::MalformedFrame)?;
                    continue;
                }
                Err(err) => return Err(RpcError::TransportRead(err)),
            };

            match frame.classify() {
                Some(Inbound::Notifications(batch)) => {
                    for notification in batch {
                        if *self.stop.borrow() {
                            return Ok(());
                        }
                        if let Err(anomaly) = self.deliver(notification).await {
                            self.handle_anomaly(anomaly)?;
                        }
                    }
                }
                Some(Inbound::Reply { id, response }) => {
                    if let Err(anomaly) = self.resolve(id, response).await {
                        self.handle_anomaly(anomaly)?;
                    }
                }
                None => self.handle_anomaly(RpcError::MalformedFrame)?,
            }
        }
    }

    /// Push one notification to its topic's destination
    async fn deliver(&mut self, notification: Notification) -> Result<(), RpcError> {
        let Notification { topic, result } = notification;

        let destination = self.shared.lock().await.router.route(topic.as_str());
        let Some(destination) = destination else {
            return Err(RpcError::UnroutableNotification(topic));
        };

        // Blocks while the consumer's buffer is full, unless stopped
        let delivered = tokio::select! {
            biased;
            _ = self.stop.changed() => return Ok(()),
            delivered = destination.push(result) => delivered,
        };
        if !delivered {
            self.shared.lock().await.router.unregister(topic.as_str());
            debug!(session = %self.session, topic = %topic, "Subscriber dropped, route removed");
            return Err(RpcError::UnroutableNotification(topic));
        }

        ClientStats::incr(&self.stats.notifications);
        Ok(())
    }

    /// Hand a reply to the call waiting for it
    async fn resolve(&mut self, id: u64, response: Response) -> Result<(), RpcError> {
        let mut shared = self.shared.lock().await;
        let Some(mut call) = shared.registry.remove(id) else {
            let late = shared.registry.take_discarded(id);
            drop(shared);
            if late {
                ClientStats::incr(&self.stats.late_responses);
                debug!(session = %self.session, id = id, "Dropping late response for timed-out request");
                return Ok(());
            }
            return Err(RpcError::UnmatchedResponse(id));
        };
        drop(shared);

        debug!(
            session = %self.session,
            id = id,
            action = %call.request().action,
            elapsed_ms = call.elapsed().as_millis() as u64,
            success = response.success,
            "Resolved request"
        );
        if call.resolve(Ok(response)) {
            ClientStats::incr(&self.stats.completed);
        }
        Ok(())
    }

    fn handle_anomaly(&self, anomaly: RpcError) -> Result<(), RpcError> {
        ClientStats::incr(&self.stats.anomalies);
        match self.policy {
            AnomalyPolicy::FailFast => Err(anomaly),
            AnomalyPolicy::Report => {
                warn!(session = %self.session, error = %anomaly, "Protocol anomaly, continuing");
                let _ = self.errors.send(anomaly);
                Ok(())
            }
        }
    }

    /// Resolve every registered call with `error` and close the connection
    async fn fail_pending(&mut self, error: RpcError) {
        let mut shared = self.shared.lock().await;
        shared.closed = Some(error.clone());
        shared.router.clear();

        let calls = shared.registry.drain();
        if !calls.is_empty() {
            warn!(session = %self.session, count = calls.len(), error = %error, "Failing pending requests");
        }
        for mut call in calls {
            if call.resolve(Err(error.clone())) {
                ClientStats::incr(&self.stats.failed);
            }
        }
    }
}
