use std::sync::Arc;

use aegis_push_shared::{HttpPushProvider, Platform};
use anyhow::Context;
use session_service::state::AppState;
use session_service::{
    BiometricAuthenticator, ChannelTransport, Config, DeviceTokenRegistry, EventPropagationBus,
    FanOutEngine, ReconnectPolicy, RedisStore, SessionSynchronizer, StaticPushCapability,
};
use tokio::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting session service");

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("failed to load configuration")?;

    let store = Arc::new(
        RedisStore::connect(&config.redis.url)
            .await
            .context("failed to connect credential store")?,
    );

    // Composition root: every service is constructed here and handed its
    // dependencies explicitly; nothing is a process-wide singleton
    let registry = Arc::new(DeviceTokenRegistry::new(store.clone()));

    let mut fanout = FanOutEngine::new(registry.clone());
    for (platform, endpoint) in [
        (Platform::APNs, &config.push.apns_endpoint),
        (Platform::FCM, &config.push.fcm_endpoint),
        (Platform::WebPush, &config.push.webpush_endpoint),
    ] {
        if let Some(endpoint) = endpoint {
            fanout = fanout.with_provider(Arc::new(HttpPushProvider::new(
                platform,
                endpoint.clone(),
                config.push.gateway_api_key.clone(),
            )));
            tracing::info!(platform = platform.as_str(), "push provider configured");
        }
    }

    let transport = Arc::new(ChannelTransport::new());
    let bus = Arc::new(EventPropagationBus::new(
        transport,
        ReconnectPolicy::new(
            Duration::from_millis(config.events.backoff_base_ms),
            config.events.max_reconnect_attempts,
        ),
    ));

    let authenticator = Arc::new(
        BiometricAuthenticator::new(store.clone(), config.biometric.clone())
            .context("failed to build biometric authenticator")?
            .with_event_bus(bus.clone()),
    );

    let capability = Arc::new(StaticPushCapability {
        platform: Platform::WebPush,
        token: format!("dev-{}", uuid::Uuid::new_v4()),
    });
    let synchronizer = Arc::new(SessionSynchronizer::new(
        store.clone(),
        registry.clone(),
        bus.clone(),
        capability,
        config.sync.clone(),
    ));

    let state = AppState {
        config: Arc::new(config),
        store,
        registry,
        authenticator,
        fanout: Arc::new(fanout),
        bus,
        synchronizer,
    };

    tracing::info!(env = %state.config.app.env, "session service ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Shutting down session service");
    state.synchronizer.cleanup().await;

    Ok(())
}
