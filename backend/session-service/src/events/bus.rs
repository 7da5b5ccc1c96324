/// Event Propagation Bus
///
/// Maintains reconnecting subscriptions per user for permission, tier and
/// security streams and exposes the one-shot broadcast operations other
/// services call to notify all of a user's live sessions.
///
/// Each subscription owns a driver task holding a reconnect state machine;
/// frames for one (user, kind) pair are handed to the handler in arrival
/// order. Nothing is ordered across stream kinds.
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::reconnect::{ConnectionStatus, ReconnectMachine, ReconnectPolicy};
use super::transport::EventTransport;
use super::{EventFrame, StreamKind};
use crate::error::AppResult;
use crate::metrics;
use crate::models::{PermissionChangeEvent, SecurityEvent, TierChangeEvent};

/// Outcome of a one-shot broadcast
#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    pub success: bool,
    pub broadcast_id: Uuid,
    pub sessions_reached: usize,
}

/// Handle to one live subscription. Dropping the handle does NOT tear the
/// subscription down; call [`SubscriptionHandle::unsubscribe`].
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl SubscriptionHandle {
    /// Current connection state of this subscription
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Waits until the subscription reports the given status
    pub async fn wait_for_status(&mut self, wanted: ConnectionStatus) {
        if *self.status_rx.borrow() == wanted {
            return;
        }
        while self.status_rx.changed().await.is_ok() {
            if *self.status_rx.borrow() == wanted {
                return;
            }
        }
    }

    /// Tears down exactly this subscription, cancelling any pending
    /// backoff timer with it
    pub fn unsubscribe(self) {
        self.task.abort();
        metrics::subscription_closed();
    }
}

pub struct EventPropagationBus {
    transport: Arc<dyn EventTransport>,
    policy: ReconnectPolicy,
}

impl EventPropagationBus {
    pub fn new(transport: Arc<dyn EventTransport>, policy: ReconnectPolicy) -> Self {
        Self { transport, policy }
    }

    /// Opens a long-lived subscription for one user on one stream kind.
    ///
    /// The handler runs on the driver task, one frame at a time, in the
    /// order the transport delivered them. On transport error the driver
    /// backs off exponentially; once the attempt budget is exhausted the
    /// subscription parks in `Error` and only an explicit re-subscribe
    /// revives it.
    pub fn subscribe<F>(
        &self,
        kind: StreamKind,
        user_id: Uuid,
        handler: F,
    ) -> SubscriptionHandle
    where
        F: Fn(EventFrame) + Send + Sync + 'static,
    {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Idle);
        let transport = self.transport.clone();
        let policy = self.policy;

        let task = tokio::spawn(async move {
            let mut machine = ReconnectMachine::new(policy);

            loop {
                machine.connecting();
                let _ = status_tx.send(machine.status());

                match transport.subscribe(user_id, kind).await {
                    Ok(mut stream) => {
                        machine.connected();
                        let _ = status_tx.send(machine.status());
                        debug!(
                            user_id = %user_id,
                            stream = kind.as_str(),
                            "subscription connected"
                        );

                        while let Some(frame) = stream.receiver.recv().await {
                            handler(frame);
                        }

                        // Receiver closed: terminal transport disconnect
                        warn!(
                            user_id = %user_id,
                            stream = kind.as_str(),
                            "subscription disconnected"
                        );
                    }
                    Err(e) => {
                        warn!(
                            user_id = %user_id,
                            stream = kind.as_str(),
                            error = %e,
                            "subscription connect failed"
                        );
                    }
                }

                match machine.failure() {
                    Some(delay) => {
                        metrics::reconnect_attempted(kind.as_str());
                        let _ = status_tx.send(machine.status());
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        let _ = status_tx.send(machine.status());
                        warn!(
                            user_id = %user_id,
                            stream = kind.as_str(),
                            "reconnect attempts exhausted, subscription parked"
                        );
                        return;
                    }
                }
            }
        });

        metrics::subscription_opened();
        SubscriptionHandle { task, status_rx }
    }

    pub async fn broadcast_permission_change(
        &self,
        mut event: PermissionChangeEvent,
    ) -> AppResult<BroadcastOutcome> {
        event.timestamp = Utc::now();
        let user_id = event.user_id;
        self.broadcast(user_id, StreamKind::Permission, EventFrame::Permission(event))
            .await
    }

    pub async fn broadcast_tier_change(
        &self,
        mut event: TierChangeEvent,
    ) -> AppResult<BroadcastOutcome> {
        event.timestamp = Utc::now();
        let user_id = event.user_id;
        self.broadcast(user_id, StreamKind::Tier, EventFrame::Tier(event))
            .await
    }

    pub async fn broadcast_security_event(
        &self,
        event: SecurityEvent,
    ) -> AppResult<BroadcastOutcome> {
        let user_id = event.user_id;
        self.broadcast(user_id, StreamKind::Security, EventFrame::Security(event))
            .await
    }

    async fn broadcast(
        &self,
        user_id: Uuid,
        kind: StreamKind,
        frame: EventFrame,
    ) -> AppResult<BroadcastOutcome> {
        let receipt = self.transport.broadcast(user_id, kind, frame).await?;

        info!(
            user_id = %user_id,
            stream = kind.as_str(),
            broadcast_id = %receipt.broadcast_id,
            sessions = receipt.sessions_reached,
            "broadcast delivered"
        );

        Ok(BroadcastOutcome {
            success: true,
            broadcast_id: receipt.broadcast_id,
            sessions_reached: receipt.sessions_reached,
        })
    }
}
