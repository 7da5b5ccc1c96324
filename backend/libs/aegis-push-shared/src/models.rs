use serde::{Deserialize, Serialize};

/// Delivery platform enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    /// Apple Push Notification Service (iOS/macOS)
    APNs,
    /// Firebase Cloud Messaging (Android)
    FCM,
    /// Web Push (browsers)
    WebPush,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::APNs => "apns",
            Platform::FCM => "fcm",
            Platform::WebPush => "webpush",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "apns" | "ios" => Some(Platform::APNs),
            "fcm" | "android" => Some(Platform::FCM),
            "webpush" | "web" => Some(Platform::WebPush),
            _ => None,
        }
    }

    pub fn all() -> [Platform; 3] {
        [Platform::APNs, Platform::FCM, Platform::WebPush]
    }
}

/// Payload already shaped for one platform: body truncated to the platform
/// limit, sound and TTL defaults filled in. Built once per platform group,
/// never per token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformPayload {
    pub title: String,
    pub body: String,

    /// Custom data as JSON
    pub data: Option<serde_json::Value>,

    pub sound: String,

    /// Notification icon resource; `None` on platforms that have no icon
    /// concept (APNs)
    pub icon: Option<String>,
    pub badge: Option<u32>,

    /// Time-to-live the platform should keep the message for
    pub ttl_secs: u64,
}

/// Per-platform delivery outcome reported by a provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderDelivery {
    /// Tokens the platform accepted
    pub delivered: usize,

    /// Tokens the platform rejected transiently (retryable)
    pub failed: usize,

    /// Tokens the platform reported as permanently invalid; the caller is
    /// expected to deregister these after the fan-out completes
    pub invalid_tokens: Vec<String>,
}

impl ProviderDelivery {
    pub fn merge(&mut self, other: ProviderDelivery) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.invalid_tokens.extend(other.invalid_tokens);
    }
}
