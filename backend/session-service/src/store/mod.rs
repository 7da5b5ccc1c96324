/// Credential Store abstraction
///
/// The only shared mutable resource in the service. Everything is a
/// namespaced key holding a JSON value with optional TTL, last-writer-wins
/// per key, no cross-key transactions.
use async_trait::async_trait;

use crate::error::AppResult;

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Writes a value; `ttl_secs = None` means no expiry
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> AppResult<()>;

    async fn delete(&self, key: &str) -> AppResult<()>;
}

/// Key namespace helpers. Every component goes through these so the
/// namespace stays greppable in one place.
pub mod keys {
    use uuid::Uuid;

    use crate::models::BiometricModality;

    pub fn biometric_registration(
        tenant_id: Uuid,
        user_id: Uuid,
        device_id: &str,
        modality: BiometricModality,
    ) -> String {
        format!(
            "biometric_reg:{}:{}:{}:{}",
            tenant_id,
            user_id,
            device_id,
            modality.as_str()
        )
    }

    pub fn biometric_session(token: &str) -> String {
        format!("biometric_session:{}", token)
    }

    pub fn device_token(token: &str) -> String {
        format!("device_token:{}", token)
    }

    /// Index of push-token strings owned by one user
    pub fn user_tokens(tenant_id: Uuid, user_id: Uuid) -> String {
        format!("user_tokens:{}:{}", tenant_id, user_id)
    }

    /// Index of user ids with at least one registered token in the tenant
    pub fn tenant_users(tenant_id: Uuid) -> String {
        format!("tenant_users:{}", tenant_id)
    }

    pub fn sessions(tenant_id: Uuid, user_id: Uuid) -> String {
        format!("sessions:{}:{}", tenant_id, user_id)
    }

    pub fn heartbeat(tenant_id: Uuid, user_id: Uuid, device_id: &str) -> String {
        format!("heartbeat:{}:{}:{}", tenant_id, user_id, device_id)
    }
}
