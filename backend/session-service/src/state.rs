use std::sync::Arc;

use crate::{
    config::Config,
    events::EventPropagationBus,
    services::{BiometricAuthenticator, DeviceTokenRegistry, FanOutEngine, SessionSynchronizer},
    store::CredentialStore,
};

/// Everything the embedding surface (CLI shell, RPC layer, test harness)
/// needs to drive the core. Built once by the composition root; services
/// never reach for globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn CredentialStore>,
    pub registry: Arc<DeviceTokenRegistry>,
    pub authenticator: Arc<BiometricAuthenticator>,
    pub fanout: Arc<FanOutEngine>,
    pub bus: Arc<EventPropagationBus>,
    pub synchronizer: Arc<SessionSynchronizer>,
}
