/// Aegis Push Shared Library
///
/// This library provides the per-platform push delivery contract used by the
/// session service's fan-out engine. Every provider, real or test double,
/// speaks the same language: take a batch of device tokens plus an optimized
/// payload, return how many were delivered, how many failed, and which tokens
/// the platform reported as permanently invalid.
///
/// It handles:
/// - The `PushProvider` trait shared by all delivery platforms
/// - An HTTP-backed provider for gateway-style platform endpoints
/// - A scriptable in-memory provider for tests
/// - Platform identification and payload shaping types
pub mod client;
pub mod errors;
pub mod mock;
pub mod models;

pub use client::{HttpPushProvider, PushProvider};
pub use errors::PushError;
pub use mock::MockPushProvider;
pub use models::{Platform, PlatformPayload, ProviderDelivery};
