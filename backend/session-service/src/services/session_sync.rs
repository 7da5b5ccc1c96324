/// Session Synchronizer
///
/// Keeps one device's view of the user's sessions current: a periodic task
/// pulls the authoritative session list and pushes this device's heartbeat,
/// while a security-event subscription feeds live alerts to the client.
///
/// State machine per bound user:
/// Uninitialized -> Initializing -> Active -> CleanedUp
///
/// Initialization steps are independent; a failed push-token step is logged
/// and surfaced as an error event while periodic sync still starts. Results
/// of in-flight work are discarded once the user binding changes.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{AppError, AppResult};
use crate::events::{EventFrame, EventPropagationBus, StreamKind, SubscriptionHandle};
use crate::models::{
    DeepLinkFlow, DeviceHeartbeat, EventSeverity, Platform, SecurityEvent, SecurityEventKind,
    UserSession,
};
use crate::services::{deep_link, DeviceTokenRegistry};
use crate::store::{keys, CredentialStore};

/// Collaborator that asks the OS for push capability and yields this
/// device's push token
#[async_trait]
pub trait PushCapability: Send + Sync {
    async fn request_push_token(&self, device_id: &str) -> AppResult<(Platform, String)>;
}

/// Push capability with a fixed answer; the device shell injects the real
/// one, and offline/dev runs use this
pub struct StaticPushCapability {
    pub platform: Platform,
    pub token: String,
}

#[async_trait]
impl PushCapability for StaticPushCapability {
    async fn request_push_token(&self, _device_id: &str) -> AppResult<(Platform, String)> {
        Ok((self.platform, self.token.clone()))
    }
}

/// The device identity this synchronizer runs on behalf of
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub device_id: String,
    pub device_name: String,
    pub platform: Platform,
    pub app_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Initializing,
    Active,
    CleanedUp,
}

/// Structured events surfaced to the owning client
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Synced { session_count: usize },
    Error { context: String, error: String },
    Security(SecurityEvent),
}

#[derive(Clone)]
struct Binding {
    user_id: Uuid,
    tenant_id: Uuid,
    profile: DeviceProfile,
}

struct Inner {
    state: SyncState,
    binding: Option<Binding>,
    /// Bumped whenever the binding changes; in-flight work carrying an old
    /// epoch discards its results
    epoch: u64,
    sync_task: Option<JoinHandle<()>>,
    security_sub: Option<SubscriptionHandle>,
    latest_sessions: Vec<UserSession>,
}

pub struct SessionSynchronizer {
    store: Arc<dyn CredentialStore>,
    registry: Arc<DeviceTokenRegistry>,
    bus: Arc<EventPropagationBus>,
    capability: Arc<dyn PushCapability>,
    config: SyncConfig,
    inner: Arc<RwLock<Inner>>,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<SyncEvent>>>,
}

impl SessionSynchronizer {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        registry: Arc<DeviceTokenRegistry>,
        bus: Arc<EventPropagationBus>,
        capability: Arc<dyn PushCapability>,
        config: SyncConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store,
            registry,
            bus,
            capability,
            config,
            inner: Arc::new(RwLock::new(Inner {
                state: SyncState::Uninitialized,
                binding: None,
                epoch: 0,
                sync_task: None,
                security_sub: None,
                latest_sessions: Vec::new(),
            })),
            events_tx,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the structured-event receiver; only the first caller gets it
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    pub async fn state(&self) -> SyncState {
        self.inner.read().await.state
    }

    /// The session list from the most recent successful sync
    pub async fn sessions(&self) -> Vec<UserSession> {
        self.inner.read().await.latest_sessions.clone()
    }

    /// Bind this synchronizer to a user and start its periodic work
    ///
    /// Idempotent for the same user; a different user tears the previous
    /// binding down first. Step failures do not roll back earlier steps.
    pub async fn initialize(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        profile: DeviceProfile,
    ) -> AppResult<()> {
        let epoch = {
            let mut inner = self.inner.write().await;

            if inner.state == SyncState::Active {
                let same_user = inner
                    .binding
                    .as_ref()
                    .map(|b| (b.user_id, b.tenant_id))
                    == Some((user_id, tenant_id));
                if same_user {
                    debug!(user_id = %user_id, "synchronizer already active for user");
                    return Ok(());
                }
                Self::teardown_locked(&mut inner);
            }

            inner.state = SyncState::Initializing;
            inner.epoch += 1;
            inner.binding = Some(Binding {
                user_id,
                tenant_id,
                profile: profile.clone(),
            });
            inner.epoch
        };

        // Push capability + token registration; failure surfaces as an
        // error event and the remaining steps still run
        match self.capability.request_push_token(&profile.device_id).await {
            Ok((platform, token)) => {
                if let Err(e) = self
                    .registry
                    .register_token(
                        user_id,
                        tenant_id,
                        &profile.device_id,
                        platform,
                        &token,
                        &profile.app_version,
                    )
                    .await
                {
                    warn!(error = %e, "failed to register push token");
                    self.emit(SyncEvent::Error {
                        context: "register_push_token".to_string(),
                        error: e.to_string(),
                    });
                }
            }
            Err(e) => {
                warn!(error = %e, "push capability request failed");
                self.emit(SyncEvent::Error {
                    context: "request_push_capability".to_string(),
                    error: e.to_string(),
                });
            }
        }

        // Security-event subscription forwards alerts to the client
        let events_tx = self.events_tx.clone();
        let sub = self.bus.subscribe(StreamKind::Security, user_id, move |frame| {
            if let EventFrame::Security(event) = frame {
                let _ = events_tx.send(SyncEvent::Security(event));
            }
        });

        // Periodic sync; the interval's first tick fires immediately
        let store = self.store.clone();
        let inner = self.inner.clone();
        let tick_events_tx = self.events_tx.clone();
        let interval_secs = self.config.interval_secs;
        let heartbeat_ttl_secs = self.config.heartbeat_ttl_secs;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                run_sync_tick(&store, &inner, &tick_events_tx, heartbeat_ttl_secs, epoch).await;
            }
        });

        {
            let mut inner = self.inner.write().await;
            if inner.epoch != epoch {
                // Binding changed while initializing; discard our work
                task.abort();
                sub.unsubscribe();
                return Ok(());
            }
            inner.sync_task = Some(task);
            inner.security_sub = Some(sub);
            inner.state = SyncState::Active;
        }

        info!(user_id = %user_id, tenant_id = %tenant_id, "session synchronizer active");
        Ok(())
    }

    /// One sync tick, out of cycle. The periodic task runs the same logic
    /// on its own schedule.
    pub async fn sync_once(&self, epoch: u64) {
        run_sync_tick(
            &self.store,
            &self.inner,
            &self.events_tx,
            self.config.heartbeat_ttl_secs,
            epoch,
        )
        .await;
    }

    /// Explicitly revoke one session, then resync out of cycle
    pub async fn terminate_session(&self, session_id: &str) -> AppResult<()> {
        let (binding, epoch) = {
            let inner = self.inner.read().await;
            if inner.state != SyncState::Active {
                return Err(AppError::InvalidInput(
                    "synchronizer is not active".to_string(),
                ));
            }
            match &inner.binding {
                Some(b) => (b.clone(), inner.epoch),
                None => {
                    return Err(AppError::InvalidInput(
                        "synchronizer is not bound to a user".to_string(),
                    ))
                }
            }
        };

        let key = keys::sessions(binding.tenant_id, binding.user_id);
        let mut sessions = self
            .fetch_sessions(binding.tenant_id, binding.user_id)
            .await?;

        let before = sessions.len();
        sessions.retain(|s| s.session_id != session_id);
        if sessions.len() == before {
            return Err(AppError::NotFound(format!("session {}", session_id)));
        }

        self.store
            .set(&key, &serde_json::to_string(&sessions)?, None)
            .await?;

        info!(session_id = session_id, "session terminated");

        let _ = self
            .bus
            .broadcast_security_event(SecurityEvent::new(
                SecurityEventKind::Logout,
                EventSeverity::Info,
                binding.user_id,
                binding.tenant_id,
                None,
                format!("session {} terminated", session_id),
                false,
            ))
            .await;

        // Out-of-cycle resync rather than waiting for the next tick
        self.sync_once(epoch).await;
        Ok(())
    }

    /// Parse an opaque authentication callback URL
    pub fn handle_deep_link(&self, url: &str) -> Option<DeepLinkFlow> {
        deep_link::parse(url)
    }

    /// Cancel the periodic timer, drop the security subscription and clear
    /// the user binding. Safe to call any number of times.
    pub async fn cleanup(&self) {
        let mut inner = self.inner.write().await;
        Self::teardown_locked(&mut inner);
        inner.state = SyncState::CleanedUp;
        debug!("session synchronizer cleaned up");
    }

    fn teardown_locked(inner: &mut Inner) {
        inner.epoch += 1;
        if let Some(task) = inner.sync_task.take() {
            task.abort();
        }
        if let Some(sub) = inner.security_sub.take() {
            sub.unsubscribe();
        }
        inner.binding = None;
        inner.latest_sessions.clear();
    }

    async fn fetch_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Vec<UserSession>> {
        fetch_sessions(&self.store, tenant_id, user_id).await
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Always a direct store read; no cache sits in front of the authoritative
/// session list
async fn fetch_sessions(
    store: &Arc<dyn CredentialStore>,
    tenant_id: Uuid,
    user_id: Uuid,
) -> AppResult<Vec<UserSession>> {
    match store.get(&keys::sessions(tenant_id, user_id)).await? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(Vec::new()),
    }
}

/// One sync tick: fetch the authoritative session list and push this
/// device's heartbeat. The two are independent; either may fail without
/// blocking the other, and retry is simply the next tick.
async fn run_sync_tick(
    store: &Arc<dyn CredentialStore>,
    inner: &Arc<RwLock<Inner>>,
    events_tx: &mpsc::UnboundedSender<SyncEvent>,
    heartbeat_ttl_secs: u64,
    epoch: u64,
) {
    let binding = {
        let inner = inner.read().await;
        if inner.epoch != epoch {
            return;
        }
        match &inner.binding {
            Some(b) => b.clone(),
            None => return,
        }
    };

    match fetch_sessions(store, binding.tenant_id, binding.user_id).await {
        Ok(sessions) => {
            let mut inner = inner.write().await;
            // The binding may have changed while the fetch was in flight;
            // stale results are discarded
            if inner.epoch == epoch {
                let session_count = sessions.len();
                inner.latest_sessions = sessions;
                drop(inner);
                let _ = events_tx.send(SyncEvent::Synced { session_count });
            }
        }
        Err(e) => {
            warn!(error = %e, "session list fetch failed");
            let _ = events_tx.send(SyncEvent::Error {
                context: "fetch_sessions".to_string(),
                error: e.to_string(),
            });
        }
    }

    let heartbeat = DeviceHeartbeat {
        device_id: binding.profile.device_id.clone(),
        platform: binding.profile.platform,
        app_version: binding.profile.app_version.clone(),
        timestamp: Utc::now(),
    };

    let heartbeat_key = keys::heartbeat(
        binding.tenant_id,
        binding.user_id,
        &binding.profile.device_id,
    );
    let result = async {
        let raw = serde_json::to_string(&heartbeat)?;
        store.set(&heartbeat_key, &raw, Some(heartbeat_ttl_secs)).await
    }
    .await;

    if let Err(e) = result {
        warn!(error = %e, "heartbeat push failed");
        let _ = events_tx.send(SyncEvent::Error {
            context: "push_heartbeat".to_string(),
            error: e.to_string(),
        });
    }
}
