use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use super::{EventFrame, StreamKind};
use crate::error::{AppError, AppResult};

/// Receipt returned by a broadcast: which push this was and how many live
/// sessions actually received it. A session that is not connected is simply
/// not counted.
#[derive(Debug, Clone)]
pub struct BroadcastReceipt {
    pub broadcast_id: Uuid,
    pub sessions_reached: usize,
}

/// One live subscription as handed out by a transport. The channel closing
/// is the transport's terminal disconnect signal.
pub struct TransportStream {
    pub receiver: mpsc::UnboundedReceiver<EventFrame>,
}

/// Server-push channel abstraction keyed by user id and stream kind
///
/// The core only needs subscribe/broadcast and a terminal error on
/// disconnect; the wire protocol behind it is someone else's problem.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn subscribe(&self, user_id: Uuid, kind: StreamKind) -> AppResult<TransportStream>;

    async fn broadcast(
        &self,
        user_id: Uuid,
        kind: StreamKind,
        frame: EventFrame,
    ) -> AppResult<BroadcastReceipt>;
}

type SenderMap = HashMap<(Uuid, StreamKind), Vec<mpsc::UnboundedSender<EventFrame>>>;

/// In-process transport backed by tokio channels
///
/// Each user can hold multiple concurrent sessions per stream kind; frames
/// are delivered to every live session in the order they are broadcast.
/// Tests use `disconnect_all` and `fail_next_subscribes` to exercise the
/// bus's reconnect path.
#[derive(Clone, Default)]
pub struct ChannelTransport {
    connections: Arc<RwLock<SenderMap>>,
    subscribe_failures: Arc<Mutex<VecDeque<String>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next `n` subscribe calls to fail with the given reason
    pub async fn fail_next_subscribes(&self, n: usize, reason: &str) {
        let mut failures = self.subscribe_failures.lock().await;
        for _ in 0..n {
            failures.push_back(reason.to_string());
        }
    }

    /// Tear down every live session of the user on one stream kind,
    /// simulating a transport-level disconnect
    pub async fn disconnect_all(&self, user_id: Uuid, kind: StreamKind) {
        let mut connections = self.connections.write().await;
        connections.remove(&(user_id, kind));
    }

    pub async fn session_count(&self, user_id: Uuid, kind: StreamKind) -> usize {
        let connections = self.connections.read().await;
        connections
            .get(&(user_id, kind))
            .map(|v| v.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventTransport for ChannelTransport {
    async fn subscribe(&self, user_id: Uuid, kind: StreamKind) -> AppResult<TransportStream> {
        if let Some(reason) = self.subscribe_failures.lock().await.pop_front() {
            return Err(AppError::Transport(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let mut connections = self.connections.write().await;
        connections.entry((user_id, kind)).or_default().push(tx);

        Ok(TransportStream { receiver: rx })
    }

    async fn broadcast(
        &self,
        user_id: Uuid,
        kind: StreamKind,
        frame: EventFrame,
    ) -> AppResult<BroadcastReceipt> {
        let mut connections = self.connections.write().await;

        let mut sessions_reached = 0;
        if let Some(senders) = connections.get_mut(&(user_id, kind)) {
            // Drop senders whose receiver side is gone before counting
            senders.retain(|tx| !tx.is_closed());

            for sender in senders.iter() {
                if sender.send(frame.clone()).is_ok() {
                    sessions_reached += 1;
                }
            }
        }

        Ok(BroadcastReceipt {
            broadcast_id: Uuid::new_v4(),
            sessions_reached,
        })
    }
}
