use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{DeviceToken, Platform};
use crate::store::{keys, CredentialStore};

/// Device Token Registry
///
/// Owns the `device_token:{token}` records plus the per-user and per-tenant
/// indexes the fan-out engine resolves recipients through. A token string
/// identifies one physical device registration; re-registering it updates
/// the record in place instead of duplicating it.
pub struct DeviceTokenRegistry {
    store: Arc<dyn CredentialStore>,
}

impl DeviceTokenRegistry {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Register or refresh a push token
    pub async fn register_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        device_id: &str,
        platform: Platform,
        token: &str,
        app_version: &str,
    ) -> AppResult<DeviceToken> {
        let now = Utc::now();
        let token_key = keys::device_token(token);

        let record = match self.store.get(&token_key).await? {
            Some(raw) => {
                let mut existing: DeviceToken = serde_json::from_str(&raw)?;
                existing.app_version = app_version.to_string();
                existing.is_active = true;
                existing.last_used_at = Some(now);
                debug!(token = token, "refreshed existing device token");
                existing
            }
            None => DeviceToken {
                id: Uuid::new_v4(),
                user_id,
                tenant_id,
                device_id: device_id.to_string(),
                platform,
                token: token.to_string(),
                app_version: app_version.to_string(),
                is_active: true,
                last_used_at: Some(now),
                created_at: now,
            },
        };

        self.store
            .set(&token_key, &serde_json::to_string(&record)?, None)
            .await?;

        self.add_to_index(&keys::user_tokens(tenant_id, user_id), token)
            .await?;
        self.add_to_index(&keys::tenant_users(tenant_id), &user_id.to_string())
            .await?;

        info!(user_id = %user_id, platform = platform.as_str(), "registered device token");
        Ok(record)
    }

    /// Explicit unregister from the owning device
    pub async fn unregister_token(&self, token: &str) -> AppResult<()> {
        self.deactivate(token).await?;
        debug!(token = token, "unregistered device token");
        Ok(())
    }

    /// Deregister a token the delivery platform reported as invalid
    pub async fn mark_invalid(&self, token: &str) -> AppResult<()> {
        self.deactivate(token).await?;
        warn!(token = token, "pruned invalid device token");
        Ok(())
    }

    async fn deactivate(&self, token: &str) -> AppResult<()> {
        let token_key = keys::device_token(token);
        if let Some(raw) = self.store.get(&token_key).await? {
            let mut record: DeviceToken = serde_json::from_str(&raw)?;
            record.is_active = false;
            self.store
                .set(&token_key, &serde_json::to_string(&record)?, None)
                .await?;
        }
        Ok(())
    }

    /// All active tokens of one user
    pub async fn active_tokens_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Vec<DeviceToken>> {
        let index = self
            .read_index(&keys::user_tokens(tenant_id, user_id))
            .await?;

        let mut tokens = Vec::new();
        for token in index {
            if let Some(raw) = self.store.get(&keys::device_token(&token)).await? {
                let record: DeviceToken = serde_json::from_str(&raw)?;
                if record.is_active {
                    tokens.push(record);
                }
            }
        }
        Ok(tokens)
    }

    /// Active tokens of one user grouped by platform
    pub async fn tokens_grouped_by_platform(
        &self,
        tenant_id: Uuid,
        user_ids: &[Uuid],
    ) -> AppResult<HashMap<Platform, Vec<String>>> {
        let mut groups: HashMap<Platform, Vec<String>> = HashMap::new();

        for user_id in user_ids {
            for record in self.active_tokens_for_user(tenant_id, *user_id).await? {
                groups.entry(record.platform).or_default().push(record.token);
            }
        }
        Ok(groups)
    }

    /// Users with at least one registration in the tenant
    pub async fn tenant_user_ids(&self, tenant_id: Uuid) -> AppResult<Vec<Uuid>> {
        let index = self.read_index(&keys::tenant_users(tenant_id)).await?;
        Ok(index
            .iter()
            .filter_map(|raw| Uuid::parse_str(raw).ok())
            .collect())
    }

    async fn read_index(&self, key: &str) -> AppResult<Vec<String>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn add_to_index(&self, key: &str, entry: &str) -> AppResult<()> {
        let mut index = self.read_index(key).await?;
        if !index.iter().any(|e| e == entry) {
            index.push(entry.to_string());
            self.store
                .set(key, &serde_json::to_string(&index)?, None)
                .await?;
        }
        Ok(())
    }
}
