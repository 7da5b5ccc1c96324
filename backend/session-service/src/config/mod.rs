use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub redis: RedisConfig,
    pub biometric: BiometricConfig,
    pub sync: SyncConfig,
    pub events: EventsConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiometricConfig {
    /// Hard lockout threshold; reset only by re-registration
    pub max_failures: u32,
    pub session_ttl_secs: u64,
    /// Requests older than this are rejected as replays
    pub max_request_age_secs: i64,
    /// Requests further in the future than this are rejected as clock skew
    pub max_clock_skew_secs: i64,
    /// Minimum signature similarity accepted by the matcher
    pub similarity_threshold: f64,
    /// Base64-encoded 256-bit master key for enrollment template encryption;
    /// per-tenant keys are derived from it
    pub template_key_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub interval_secs: u64,
    /// TTL on heartbeat records; stale devices age out of the store
    pub heartbeat_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub backoff_base_ms: u64,
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub apns_endpoint: Option<String>,
    pub fcm_endpoint: Option<String>,
    pub webpush_endpoint: Option<String>,
    pub gateway_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            biometric: BiometricConfig {
                max_failures: std::env::var("BIOMETRIC_MAX_FAILURES")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                session_ttl_secs: std::env::var("BIOMETRIC_SESSION_TTL_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()?,
                max_request_age_secs: std::env::var("BIOMETRIC_MAX_REQUEST_AGE_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()?,
                max_clock_skew_secs: std::env::var("BIOMETRIC_MAX_CLOCK_SKEW_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
                similarity_threshold: std::env::var("BIOMETRIC_SIMILARITY_THRESHOLD")
                    .unwrap_or_else(|_| "0.85".to_string())
                    .parse()?,
                template_key_base64: std::env::var("BIOMETRIC_TEMPLATE_KEY")?,
            },
            sync: SyncConfig {
                interval_secs: std::env::var("SESSION_SYNC_INTERVAL_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()?,
                heartbeat_ttl_secs: std::env::var("SESSION_HEARTBEAT_TTL_SECS")
                    .unwrap_or_else(|_| "900".to_string())
                    .parse()?,
            },
            events: EventsConfig {
                backoff_base_ms: std::env::var("EVENTS_BACKOFF_BASE_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()?,
                max_reconnect_attempts: std::env::var("EVENTS_MAX_RECONNECT_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
            },
            push: PushConfig {
                apns_endpoint: std::env::var("PUSH_APNS_ENDPOINT").ok(),
                fcm_endpoint: std::env::var("PUSH_FCM_ENDPOINT").ok(),
                webpush_endpoint: std::env::var("PUSH_WEBPUSH_ENDPOINT").ok(),
                gateway_api_key: std::env::var("PUSH_GATEWAY_API_KEY").ok(),
            },
        })
    }
}

impl BiometricConfig {
    /// Defaults suitable for tests; the template key is a fixed all-zero key
    /// and must never be used outside test code.
    #[doc(hidden)]
    pub fn for_tests() -> Self {
        use base64::engine::{general_purpose::STANDARD, Engine};
        Self {
            max_failures: 5,
            session_ttl_secs: 3600,
            max_request_age_secs: 300,
            max_clock_skew_secs: 60,
            similarity_threshold: 0.85,
            template_key_base64: STANDARD.encode([0u8; 32]),
        }
    }
}
