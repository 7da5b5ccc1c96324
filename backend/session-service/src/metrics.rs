use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

static AUTH_ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "session_service_auth_attempts_total",
            "Biometric authentication attempts by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create session_service_auth_attempts_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register session_service_auth_attempts_total");
    counter
});

static PUSH_DELIVERED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "session_service_push_delivered_total",
            "Push notifications delivered per platform",
        ),
        &["platform"],
    )
    .expect("failed to create session_service_push_delivered_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register session_service_push_delivered_total");
    counter
});

static PUSH_FAILED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "session_service_push_failed_total",
            "Push notifications that failed delivery per platform",
        ),
        &["platform"],
    )
    .expect("failed to create session_service_push_failed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register session_service_push_failed_total");
    counter
});

static TOKENS_PRUNED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "session_service_tokens_pruned_total",
        "Device tokens deregistered after the platform reported them invalid",
    )
    .expect("failed to create session_service_tokens_pruned_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register session_service_tokens_pruned_total");
    counter
});

static RECONNECT_ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "session_service_reconnect_attempts_total",
            "Subscription reconnect attempts per stream kind",
        ),
        &["stream"],
    )
    .expect("failed to create session_service_reconnect_attempts_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register session_service_reconnect_attempts_total");
    counter
});

static ACTIVE_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "session_service_active_subscriptions",
        "Currently open event subscriptions",
    )
    .expect("failed to create session_service_active_subscriptions");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register session_service_active_subscriptions");
    gauge
});

pub fn auth_attempt(outcome: &str) {
    AUTH_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn push_delivered(platform: &str, count: usize) {
    PUSH_DELIVERED_TOTAL
        .with_label_values(&[platform])
        .inc_by(count as u64);
}

pub fn push_failed(platform: &str, count: usize) {
    PUSH_FAILED_TOTAL
        .with_label_values(&[platform])
        .inc_by(count as u64);
}

pub fn tokens_pruned(count: usize) {
    TOKENS_PRUNED_TOTAL.inc_by(count as u64);
}

pub fn reconnect_attempted(stream: &str) {
    RECONNECT_ATTEMPTS_TOTAL.with_label_values(&[stream]).inc();
}

pub fn subscription_opened() {
    ACTIVE_SUBSCRIPTIONS.inc();
}

pub fn subscription_closed() {
    ACTIVE_SUBSCRIPTIONS.dec();
}

/// Text-encoded metrics snapshot for whatever endpoint the deployment
/// exposes them on
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
