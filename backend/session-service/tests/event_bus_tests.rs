use async_trait::async_trait;
/// Reconnect behavior of the event propagation bus measured against a real
/// clock: backoff spacing, the attempt cap, and recovery after a transport
/// comes back.
use session_service::events::{
    BroadcastReceipt, ChannelTransport, ConnectionStatus, EventFrame, EventTransport,
    ReconnectPolicy, StreamKind, TransportStream,
};
use session_service::models::{EventSeverity, SecurityEvent, SecurityEventKind};
use session_service::{AppResult, EventPropagationBus};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;
use tokio::time::Duration;
use uuid::Uuid;

const BASE_MS: u64 = 20;

/// Transport wrapper that records when each subscribe call lands
struct TimedTransport {
    inner: ChannelTransport,
    subscribe_times: Mutex<Vec<Instant>>,
}

impl TimedTransport {
    fn new(inner: ChannelTransport) -> Self {
        Self {
            inner,
            subscribe_times: Mutex::new(Vec::new()),
        }
    }

    fn subscribe_count(&self) -> usize {
        self.subscribe_times.lock().unwrap().len()
    }

    fn gap_ms(&self, from: usize, to: usize) -> u128 {
        let times = self.subscribe_times.lock().unwrap();
        times[to].duration_since(times[from]).as_millis()
    }
}

#[async_trait]
impl EventTransport for TimedTransport {
    async fn subscribe(&self, user_id: Uuid, kind: StreamKind) -> AppResult<TransportStream> {
        self.subscribe_times.lock().unwrap().push(Instant::now());
        self.inner.subscribe(user_id, kind).await
    }

    async fn broadcast(
        &self,
        user_id: Uuid,
        kind: StreamKind,
        frame: EventFrame,
    ) -> AppResult<BroadcastReceipt> {
        self.inner.broadcast(user_id, kind, frame).await
    }
}

fn security_event(user_id: Uuid) -> SecurityEvent {
    SecurityEvent::new(
        SecurityEventKind::SuspiciousActivity,
        EventSeverity::Warning,
        user_id,
        Uuid::new_v4(),
        Some("device-1".to_string()),
        "unusual login location",
        true,
    )
}

#[tokio::test]
async fn backoff_spacing_doubles_and_caps_at_five_attempts() {
    let channel = ChannelTransport::new();
    // Initial connect plus every reconnect fails
    channel.fail_next_subscribes(32, "transport down").await;

    let transport = Arc::new(TimedTransport::new(channel));
    let bus = EventPropagationBus::new(
        transport.clone(),
        ReconnectPolicy::new(Duration::from_millis(BASE_MS), 5),
    );

    let mut handle = bus.subscribe(StreamKind::Security, Uuid::new_v4(), |_| {});
    handle.wait_for_status(ConnectionStatus::Error).await;

    // 1 initial connect + 5 reconnect attempts, then parked: no 6th retry
    assert_eq!(transport.subscribe_count(), 6);
    tokio::time::sleep(Duration::from_millis(BASE_MS * 40)).await;
    assert_eq!(transport.subscribe_count(), 6);
    assert_eq!(handle.status(), ConnectionStatus::Error);

    // After 3 transport errors the 4th reconnect attempt (subscribe #5)
    // waits at least base * 2^3
    assert!(transport.gap_ms(3, 4) >= (BASE_MS * 8) as u128);
    // And earlier attempts kept the doubling floor too
    assert!(transport.gap_ms(0, 1) >= BASE_MS as u128);
    assert!(transport.gap_ms(1, 2) >= (BASE_MS * 2) as u128);
    assert!(transport.gap_ms(2, 3) >= (BASE_MS * 4) as u128);

    handle.unsubscribe();
}

#[tokio::test]
async fn transport_recovery_within_budget_reconnects_and_resets() {
    let channel = ChannelTransport::new();
    channel.fail_next_subscribes(2, "transient outage").await;

    let transport = Arc::new(TimedTransport::new(channel));
    let bus = EventPropagationBus::new(
        transport.clone(),
        ReconnectPolicy::new(Duration::from_millis(BASE_MS), 5),
    );
    let user_id = Uuid::new_v4();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let mut handle = bus.subscribe(StreamKind::Security, user_id, move |frame| {
        if let EventFrame::Security(event) = frame {
            sink.lock().unwrap().push(event.id);
        }
    });

    // Two failures burn attempts 1 and 2, then the third connect succeeds
    handle.wait_for_status(ConnectionStatus::Connected).await;
    assert_eq!(transport.subscribe_count(), 3);

    let event = security_event(user_id);
    let expected_id = event.id;
    let outcome = bus.broadcast_security_event(event).await.unwrap();
    assert_eq!(outcome.sessions_reached, 1);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(received.lock().unwrap().as_slice(), &[expected_id]);

    handle.unsubscribe();
}

#[tokio::test]
async fn events_for_one_user_arrive_in_broadcast_order() {
    let transport = Arc::new(ChannelTransport::new());
    let bus = EventPropagationBus::new(
        transport,
        ReconnectPolicy::new(Duration::from_millis(BASE_MS), 5),
    );
    let user_id = Uuid::new_v4();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let mut handle = bus.subscribe(StreamKind::Security, user_id, move |frame| {
        if let EventFrame::Security(event) = frame {
            sink.lock().unwrap().push(event.description);
        }
    });
    handle.wait_for_status(ConnectionStatus::Connected).await;

    for i in 0..10 {
        let mut event = security_event(user_id);
        event.description = format!("event-{}", i);
        bus.broadcast_security_event(event).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(50)).await;

    let received = received.lock().unwrap();
    let expected: Vec<String> = (0..10).map(|i| format!("event-{}", i)).collect();
    assert_eq!(received.as_slice(), expected.as_slice());

    handle.unsubscribe();
}

#[tokio::test]
async fn permission_and_tier_streams_deliver_independently() {
    use session_service::models::{PermissionChangeEvent, TierChangeEvent};

    let transport = Arc::new(ChannelTransport::new());
    let bus = EventPropagationBus::new(
        transport,
        ReconnectPolicy::new(Duration::from_millis(BASE_MS), 5),
    );
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    let permissions = Arc::new(Mutex::new(Vec::new()));
    let tiers = Arc::new(Mutex::new(Vec::new()));

    let perm_sink = permissions.clone();
    let mut perm_sub = bus.subscribe(StreamKind::Permission, user_id, move |frame| {
        if let EventFrame::Permission(event) = frame {
            perm_sink.lock().unwrap().push(event.after);
        }
    });
    let tier_sink = tiers.clone();
    let mut tier_sub = bus.subscribe(StreamKind::Tier, user_id, move |frame| {
        if let EventFrame::Tier(event) = frame {
            tier_sink.lock().unwrap().push(event.after);
        }
    });
    perm_sub.wait_for_status(ConnectionStatus::Connected).await;
    tier_sub.wait_for_status(ConnectionStatus::Connected).await;

    let now = chrono::Utc::now();
    bus.broadcast_permission_change(PermissionChangeEvent {
        user_id,
        tenant_id,
        before: vec!["read".to_string()],
        after: vec!["read".to_string(), "admin".to_string()],
        reason: "role upgrade".to_string(),
        timestamp: now,
    })
    .await
    .unwrap();
    bus.broadcast_tier_change(TierChangeEvent {
        user_id,
        tenant_id,
        before: "free".to_string(),
        after: "pro".to_string(),
        reason: "subscription purchase".to_string(),
        timestamp: now,
    })
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(
        permissions.lock().unwrap().as_slice(),
        &[vec!["read".to_string(), "admin".to_string()]]
    );
    assert_eq!(tiers.lock().unwrap().as_slice(), &["pro".to_string()]);

    perm_sub.unsubscribe();
    tier_sub.unsubscribe();
}

#[tokio::test]
async fn broadcast_ids_are_unique_per_call() {
    let transport = Arc::new(ChannelTransport::new());
    let bus = EventPropagationBus::new(
        transport,
        ReconnectPolicy::new(Duration::from_millis(BASE_MS), 5),
    );
    let user_id = Uuid::new_v4();

    let a = bus
        .broadcast_security_event(security_event(user_id))
        .await
        .unwrap();
    let b = bus
        .broadcast_security_event(security_event(user_id))
        .await
        .unwrap();

    assert!(a.success && b.success);
    assert_ne!(a.broadcast_id, b.broadcast_id);
}
