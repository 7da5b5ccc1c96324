/// Notification Fan-Out Engine
///
/// Delivers one payload to every active token of a set of users, platform
/// by platform. Platform groups are sent independently and in parallel so
/// one platform's outage never blocks another's delivery; tokens reported
/// invalid are deregistered only after every group has finished.
use std::collections::HashMap;
use std::sync::Arc;

use aegis_push_shared::{PlatformPayload, ProviderDelivery, PushProvider};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::metrics;
use crate::models::{FanOutResult, NotificationPayload, Platform, PlatformFanOut};
use crate::services::DeviceTokenRegistry;

/// Platform payload limits and defaults applied during optimization
const APNS_MAX_BODY: usize = 1800;
const FCM_MAX_BODY: usize = 3500;
const WEBPUSH_MAX_BODY: usize = 2000;
const DEFAULT_SOUND: &str = "default";
const DEFAULT_ICON: &str = "ic_notification";
const DEFAULT_TTL_SECS: u64 = 86_400;

pub struct FanOutEngine {
    registry: Arc<DeviceTokenRegistry>,
    providers: HashMap<Platform, Arc<dyn PushProvider>>,
}

impl FanOutEngine {
    pub fn new(registry: Arc<DeviceTokenRegistry>) -> Self {
        Self {
            registry,
            providers: HashMap::new(),
        }
    }

    /// Attach a delivery provider; keyed by the platform it reports
    pub fn with_provider(mut self, provider: Arc<dyn PushProvider>) -> Self {
        self.providers.insert(provider.platform(), provider);
        self
    }

    /// Shapes the payload for one platform. Pure; applied once per platform
    /// group, never per token.
    pub fn optimize_for_platform(
        payload: &NotificationPayload,
        platform: Platform,
    ) -> PlatformPayload {
        let max_body = match platform {
            Platform::APNs => APNS_MAX_BODY,
            Platform::FCM => FCM_MAX_BODY,
            Platform::WebPush => WEBPUSH_MAX_BODY,
        };

        let mut body = payload.body.clone();
        if body.len() > max_body {
            body.truncate(max_body);
        }

        let icon = match platform {
            // APNs has no icon concept; the app icon is always used
            Platform::APNs => None,
            _ => Some(
                payload
                    .icon
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ICON.to_string()),
            ),
        };

        PlatformPayload {
            title: payload.title.clone(),
            body,
            data: payload.data.clone(),
            sound: payload
                .sound
                .clone()
                .unwrap_or_else(|| DEFAULT_SOUND.to_string()),
            icon,
            badge: payload.badge,
            ttl_secs: payload.ttl_secs.unwrap_or(DEFAULT_TTL_SECS),
        }
    }

    /// Delivers the payload to all active tokens of the given users
    pub async fn send_to_users(
        &self,
        tenant_id: Uuid,
        user_ids: &[Uuid],
        payload: &NotificationPayload,
    ) -> AppResult<FanOutResult> {
        let groups = self
            .registry
            .tokens_grouped_by_platform(tenant_id, user_ids)
            .await?;

        if groups.values().all(|tokens| tokens.is_empty()) {
            info!(tenant_id = %tenant_id, "fan-out found no active tokens");
            return Ok(FanOutResult::empty());
        }

        let mut tasks = Vec::new();
        let mut unrouted_failed = 0usize;
        let mut per_platform = Vec::new();

        for (platform, tokens) in groups {
            if tokens.is_empty() {
                continue;
            }

            let Some(provider) = self.providers.get(&platform) else {
                warn!(
                    platform = platform.as_str(),
                    tokens = tokens.len(),
                    "no provider configured, tokens skipped"
                );
                unrouted_failed += tokens.len();
                per_platform.push(PlatformFanOut {
                    platform,
                    delivered: 0,
                    failed: tokens.len(),
                });
                continue;
            };

            // Optimized once for the whole platform group
            let optimized = Self::optimize_for_platform(payload, platform);
            let provider = provider.clone();

            tasks.push(tokio::spawn(async move {
                let delivery = match provider.send(&tokens, &optimized).await {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        // Platform unreachable: the whole group failed, but
                        // none of its tokens are invalid
                        error!(
                            platform = platform.as_str(),
                            error = %e,
                            "platform delivery failed"
                        );
                        ProviderDelivery {
                            delivered: 0,
                            failed: tokens.len(),
                            invalid_tokens: Vec::new(),
                        }
                    }
                };
                (platform, delivery)
            }));
        }

        let mut total = ProviderDelivery::default();
        total.failed += unrouted_failed;

        for task in futures::future::join_all(tasks).await {
            match task {
                Ok((platform, delivery)) => {
                    metrics::push_delivered(platform.as_str(), delivery.delivered);
                    metrics::push_failed(platform.as_str(), delivery.failed);
                    per_platform.push(PlatformFanOut {
                        platform,
                        delivered: delivery.delivered,
                        failed: delivery.failed,
                    });
                    total.merge(delivery);
                }
                Err(e) => {
                    error!(error = %e, "platform delivery task panicked");
                }
            }
        }

        // Prune only after every platform group has completed
        for token in &total.invalid_tokens {
            if let Err(e) = self.registry.mark_invalid(token).await {
                warn!(token = token, error = %e, "failed to prune invalid token");
            }
        }
        metrics::tokens_pruned(total.invalid_tokens.len());

        info!(
            tenant_id = %tenant_id,
            delivered = total.delivered,
            failed = total.failed,
            pruned = total.invalid_tokens.len(),
            "fan-out complete"
        );

        Ok(FanOutResult {
            success: total.delivered > 0,
            delivered_count: total.delivered,
            failed_count: total.failed,
            invalid_tokens: total.invalid_tokens,
            per_platform,
        })
    }

    /// Delivers the payload to every user with a registration in the
    /// tenant, minus the exclusion list
    pub async fn send_to_tenant(
        &self,
        tenant_id: Uuid,
        payload: &NotificationPayload,
        exclude_user_ids: &[Uuid],
    ) -> AppResult<FanOutResult> {
        let user_ids: Vec<Uuid> = self
            .registry
            .tenant_user_ids(tenant_id)
            .await?
            .into_iter()
            .filter(|id| !exclude_user_ids.contains(id))
            .collect();

        if user_ids.is_empty() {
            return Ok(FanOutResult::empty());
        }

        self.send_to_users(tenant_id, &user_ids, payload).await
    }
}
