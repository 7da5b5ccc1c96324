use async_trait::async_trait;
use chrono::Utc;
/// Session synchronizer lifecycle: initialization idempotence, rebinding,
/// tick independence of the session fetch and heartbeat push, explicit
/// session termination with out-of-cycle resync, and idempotent cleanup.
use session_service::config::SyncConfig;
use session_service::events::{ChannelTransport, ReconnectPolicy, StreamKind};
use session_service::models::{
    DeepLinkFlow, EventSeverity, Platform, SecurityEvent, SecurityEventKind, UserSession,
};
use session_service::{
    AppError, AppResult, CredentialStore, DeviceProfile, DeviceTokenRegistry,
    EventPropagationBus, MemoryStore, PushCapability, SessionSynchronizer, SyncEvent, SyncState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Duration;
use uuid::Uuid;

/// Store wrapper that can be told to fail session-list reads while leaving
/// every other key working
struct FlakyStore {
    inner: MemoryStore,
    fail_session_reads: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_session_reads: AtomicBool::new(false),
        }
    }

    fn set_fail_session_reads(&self, fail: bool) {
        self.fail_session_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialStore for FlakyStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        if key.starts_with("sessions:") && self.fail_session_reads.load(Ordering::SeqCst) {
            return Err(AppError::Store("session list unavailable".to_string()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> AppResult<()> {
        self.inner.set(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.inner.delete(key).await
    }
}

struct FailingCapability;

#[async_trait]
impl PushCapability for FailingCapability {
    async fn request_push_token(&self, _device_id: &str) -> AppResult<(Platform, String)> {
        Err(AppError::Push("push permission denied".to_string()))
    }
}

struct GrantingCapability;

#[async_trait]
impl PushCapability for GrantingCapability {
    async fn request_push_token(&self, device_id: &str) -> AppResult<(Platform, String)> {
        Ok((Platform::FCM, format!("push-token-{}", device_id)))
    }
}

struct Fixture {
    store: Arc<FlakyStore>,
    registry: Arc<DeviceTokenRegistry>,
    bus: Arc<EventPropagationBus>,
    synchronizer: Arc<SessionSynchronizer>,
}

fn fixture_with(capability: Arc<dyn PushCapability>) -> Fixture {
    let store = Arc::new(FlakyStore::new());
    let registry = Arc::new(DeviceTokenRegistry::new(store.clone()));
    let bus = Arc::new(EventPropagationBus::new(
        Arc::new(ChannelTransport::new()),
        ReconnectPolicy::new(Duration::from_millis(10), 5),
    ));

    let synchronizer = Arc::new(SessionSynchronizer::new(
        store.clone(),
        registry.clone(),
        bus.clone(),
        capability,
        SyncConfig {
            // Long enough that only the immediate first tick fires during a test
            interval_secs: 3600,
            heartbeat_ttl_secs: 900,
        },
    ));

    Fixture {
        store,
        registry,
        bus,
        synchronizer,
    }
}

fn fixture() -> Fixture {
    fixture_with(Arc::new(GrantingCapability))
}

fn profile(device_id: &str) -> DeviceProfile {
    DeviceProfile {
        device_id: device_id.to_string(),
        device_name: "Test Device".to_string(),
        platform: Platform::FCM,
        app_version: "1.0.0".to_string(),
    }
}

fn session(session_id: &str, device_id: &str) -> UserSession {
    UserSession {
        session_id: session_id.to_string(),
        device_id: device_id.to_string(),
        device_name: "Test Device".to_string(),
        platform: Platform::FCM,
        ip_address: Some("198.51.100.7".to_string()),
        user_agent: None,
        last_activity: Utc::now(),
        is_active: true,
        is_trusted: false,
        geo: None,
    }
}

async fn seed_sessions(store: &FlakyStore, tenant_id: Uuid, user_id: Uuid, sessions: &[UserSession]) {
    store
        .set(
            &format!("sessions:{}:{}", tenant_id, user_id),
            &serde_json::to_string(sessions).unwrap(),
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn initialize_registers_token_and_syncs_immediately() {
    let f = fixture();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    seed_sessions(&f.store, tenant_id, user_id, &[session("s-1", "device-1")]).await;

    f.synchronizer
        .initialize(user_id, tenant_id, profile("device-1"))
        .await
        .unwrap();
    assert_eq!(f.synchronizer.state().await, SyncState::Active);

    tokio::time::sleep(Duration::from_millis(50)).await;

    // Immediate first sync pulled the authoritative list
    let sessions = f.synchronizer.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, "s-1");

    // The push token from the capability step landed in the registry
    let tokens = f
        .registry
        .active_tokens_for_user(tenant_id, user_id)
        .await
        .unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].token, "push-token-device-1");

    // And the heartbeat was written
    let heartbeat = f
        .store
        .get(&format!("heartbeat:{}:{}:device-1", tenant_id, user_id))
        .await
        .unwrap();
    assert!(heartbeat.is_some());

    f.synchronizer.cleanup().await;
}

#[tokio::test]
async fn initialize_is_idempotent_for_same_user() {
    let f = fixture();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    f.synchronizer
        .initialize(user_id, tenant_id, profile("device-1"))
        .await
        .unwrap();
    f.synchronizer
        .initialize(user_id, tenant_id, profile("device-1"))
        .await
        .unwrap();

    assert_eq!(f.synchronizer.state().await, SyncState::Active);
    f.synchronizer.cleanup().await;
}

#[tokio::test]
async fn initialize_with_different_user_rebinds() {
    let f = fixture();
    let tenant_id = Uuid::new_v4();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    seed_sessions(&f.store, tenant_id, first, &[session("s-first", "device-1")]).await;
    seed_sessions(
        &f.store,
        tenant_id,
        second,
        &[session("s-second-a", "device-1"), session("s-second-b", "web")],
    )
    .await;

    f.synchronizer
        .initialize(first, tenant_id, profile("device-1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(f.synchronizer.sessions().await.len(), 1);

    f.synchronizer
        .initialize(second, tenant_id, profile("device-1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The old binding's view is gone; the new user's list is authoritative
    let sessions = f.synchronizer.sessions().await;
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.session_id.starts_with("s-second")));

    f.synchronizer.cleanup().await;
}

#[tokio::test]
async fn failed_push_capability_still_starts_sync() {
    let f = fixture_with(Arc::new(FailingCapability));
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();
    let mut events = f.synchronizer.take_event_receiver().unwrap();

    seed_sessions(&f.store, tenant_id, user_id, &[session("s-1", "device-1")]).await;

    f.synchronizer
        .initialize(user_id, tenant_id, profile("device-1"))
        .await
        .unwrap();
    assert_eq!(f.synchronizer.state().await, SyncState::Active);

    tokio::time::sleep(Duration::from_millis(50)).await;

    // No token was registered, but periodic sync runs anyway
    assert!(f
        .registry
        .active_tokens_for_user(tenant_id, user_id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(f.synchronizer.sessions().await.len(), 1);

    // The failure surfaced as a structured error event
    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Error { context, .. } = event {
            if context == "request_push_capability" {
                saw_error = true;
            }
        }
    }
    assert!(saw_error);

    f.synchronizer.cleanup().await;
}

#[tokio::test]
async fn fetch_failure_does_not_block_heartbeat() {
    let f = fixture();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    f.store.set_fail_session_reads(true);

    f.synchronizer
        .initialize(user_id, tenant_id, profile("device-1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The fetch failed on the first tick, the heartbeat still went out
    assert!(f.synchronizer.sessions().await.is_empty());
    let heartbeat = f
        .store
        .get(&format!("heartbeat:{}:{}:device-1", tenant_id, user_id))
        .await
        .unwrap();
    assert!(heartbeat.is_some());

    f.synchronizer.cleanup().await;
}

#[tokio::test]
async fn terminate_session_resyncs_out_of_cycle() {
    let f = fixture();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    seed_sessions(
        &f.store,
        tenant_id,
        user_id,
        &[session("s-keep", "device-1"), session("s-revoke", "old-phone")],
    )
    .await;

    f.synchronizer
        .initialize(user_id, tenant_id, profile("device-1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(f.synchronizer.sessions().await.len(), 2);

    // Subscribe a live client to observe the logout broadcast
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut sub = f.bus.subscribe(StreamKind::Security, user_id, move |frame| {
        if let session_service::EventFrame::Security(event) = frame {
            sink.lock().unwrap().push(event.kind);
        }
    });
    sub.wait_for_status(session_service::ConnectionStatus::Connected)
        .await;

    f.synchronizer.terminate_session("s-revoke").await.unwrap();

    // The local view refreshed immediately, without waiting for the tick
    let sessions = f.synchronizer.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, "s-keep");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(seen
        .lock()
        .unwrap()
        .contains(&SecurityEventKind::Logout));

    sub.unsubscribe();
    f.synchronizer.cleanup().await;
}

#[tokio::test]
async fn terminate_unknown_session_is_not_found() {
    let f = fixture();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    f.synchronizer
        .initialize(user_id, tenant_id, profile("device-1"))
        .await
        .unwrap();

    let err = f
        .synchronizer
        .terminate_session("no-such-session")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    f.synchronizer.cleanup().await;
}

#[tokio::test]
async fn security_events_reach_the_bound_client() {
    let f = fixture();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();
    let mut events = f.synchronizer.take_event_receiver().unwrap();

    f.synchronizer
        .initialize(user_id, tenant_id, profile("device-1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    f.bus
        .broadcast_security_event(SecurityEvent::new(
            SecurityEventKind::MfaChallenge,
            EventSeverity::Warning,
            user_id,
            tenant_id,
            None,
            "verify it's you",
            true,
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut saw_challenge = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Security(event) = event {
            if event.kind == SecurityEventKind::MfaChallenge {
                assert!(event.action_required);
                saw_challenge = true;
            }
        }
    }
    assert!(saw_challenge);

    f.synchronizer.cleanup().await;
}

#[tokio::test]
async fn cleanup_is_idempotent_and_stops_work() {
    let f = fixture();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    f.synchronizer
        .initialize(user_id, tenant_id, profile("device-1"))
        .await
        .unwrap();

    f.synchronizer.cleanup().await;
    f.synchronizer.cleanup().await;
    f.synchronizer.cleanup().await;

    assert_eq!(f.synchronizer.state().await, SyncState::CleanedUp);
    assert!(f.synchronizer.sessions().await.is_empty());

    // A cleaned-up synchronizer refuses session termination
    assert!(f.synchronizer.terminate_session("s-1").await.is_err());
}

#[tokio::test]
async fn deep_links_parse_into_flows() {
    let f = fixture();

    assert_eq!(
        f.synchronizer
            .handle_deep_link("aegis://auth/google?code=c&state=s"),
        Some(DeepLinkFlow::OauthCallback {
            provider: "google".to_string(),
            code: Some("c".to_string()),
            state: Some("s".to_string()),
            error: None,
        })
    );
    assert_eq!(
        f.synchronizer.handle_deep_link("aegis://verify-device?token=t&deviceId=d"),
        Some(DeepLinkFlow::DeviceVerification {
            token: "t".to_string(),
            device_id: Some("d".to_string()),
        })
    );
    assert_eq!(f.synchronizer.handle_deep_link("https://example.com/"), None);
    assert_eq!(f.synchronizer.handle_deep_link("garbage"), None);
}
