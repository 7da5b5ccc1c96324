use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use aegis_push_shared::Platform;

/// Biometric method enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum BiometricModality {
    Fingerprint,
    Face,
    Voice,
    Iris,
}

impl BiometricModality {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiometricModality::Fingerprint => "fingerprint",
            BiometricModality::Face => "face",
            BiometricModality::Voice => "voice",
            BiometricModality::Iris => "iris",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fingerprint" => Some(BiometricModality::Fingerprint),
            "face" => Some(BiometricModality::Face),
            "voice" => Some(BiometricModality::Voice),
            "iris" => Some(BiometricModality::Iris),
            _ => None,
        }
    }

    pub fn all() -> [BiometricModality; 4] {
        [
            BiometricModality::Fingerprint,
            BiometricModality::Face,
            BiometricModality::Voice,
            BiometricModality::Iris,
        ]
    }
}

/// Enrollment template ciphertext with the material needed to decrypt it
/// later. The template itself never touches the store in the clear.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptedTemplate {
    /// Base64 ciphertext including the GCM tag
    pub ciphertext: String,

    /// Base64 12-byte IV, freshly random per encryption
    pub iv: String,

    /// Cipher identifier, currently always "aes-256-gcm"
    pub algorithm: String,
}

/// One enrolled biometric credential
///
/// At most one active registration exists per
/// (tenant, user, device, modality) tuple; re-enrollment overwrites in
/// place. Registrations are deactivated, never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiometricRegistration {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub modality: BiometricModality,

    /// Public half of the device-held key pair, hex-encoded
    pub public_key: String,
    pub key_algorithm: String,

    pub template: EncryptedTemplate,

    pub is_active: bool,

    /// Consecutive failed attempts since the last success or enrollment
    pub failure_count: u32,

    /// Hard lockout threshold; only re-registration clears a lockout
    pub max_failures: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl BiometricRegistration {
    pub fn is_locked_out(&self) -> bool {
        self.failure_count >= self.max_failures
    }
}

/// Challenge-response authentication request. Transient; validated once and
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiometricAuthRequest {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub modality: BiometricModality,

    /// Client-chosen challenge nonce
    pub challenge: String,

    /// Signature the device computed over the challenge
    pub signature: String,

    /// Public key the device claims to hold
    pub public_key: String,

    pub timestamp: DateTime<Utc>,
}

/// Typed reason an authentication attempt was rejected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthRejection {
    /// Timestamp outside the accepted window
    ReplayOrClockSkew,
    NotRegistered,
    Disabled,
    LockedOut,
    VerificationFailed,
}

impl AuthRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthRejection::ReplayOrClockSkew => "replay_or_clock_skew",
            AuthRejection::NotRegistered => "not_registered",
            AuthRejection::Disabled => "disabled",
            AuthRejection::LockedOut => "locked_out",
            AuthRejection::VerificationFailed => "verification_failed",
        }
    }
}

/// Outcome of an authentication attempt. Every path through the
/// authenticator produces one of these; nothing is thrown across the
/// component boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum BiometricAuthOutcome {
    Success {
        token: String,
        expires_at: DateTime<Utc>,
    },
    Rejected {
        reason: AuthRejection,
        /// Whether the client must re-enroll before retrying
        requires_reregistration: bool,
    },
}

impl BiometricAuthOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BiometricAuthOutcome::Success { .. })
    }

    pub fn rejection(&self) -> Option<AuthRejection> {
        match self {
            BiometricAuthOutcome::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Bearer session token record, owned by the biometric authenticator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokenRecord {
    pub token: String,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub device_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Push token registered by one physical device
///
/// Unique per token string; re-registration from the same device updates
/// the existing record instead of duplicating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub device_id: String,
    pub platform: Platform,
    pub token: String,
    pub app_version: String,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One authenticated device session as seen by the synchronizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    pub session_id: String,
    pub device_id: String,
    pub device_name: String,
    pub platform: Platform,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,

    /// Previously verified device, exempt from extra login friction
    pub is_trusted: bool,
    pub geo: Option<String>,
}

/// Periodic liveness record this device writes on every sync tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHeartbeat {
    pub device_id: String,
    pub platform: Platform,
    pub app_version: String,
    pub timestamp: DateTime<Utc>,
}

/// Security event kind enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventKind {
    Login,
    Logout,
    NewDevice,
    SuspiciousActivity,
    MfaChallenge,
    SessionExpired,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::Login => "login",
            SecurityEventKind::Logout => "logout",
            SecurityEventKind::NewDevice => "new_device",
            SecurityEventKind::SuspiciousActivity => "suspicious_activity",
            SecurityEventKind::MfaChallenge => "mfa_challenge",
            SecurityEventKind::SessionExpired => "session_expired",
        }
    }
}

/// Event severity level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

/// Immutable security event. Consumers de-duplicate by `id`; the same
/// incident may arrive both as a live event and as a push notification in
/// either order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub kind: SecurityEventKind,
    pub severity: EventSeverity,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub device_id: Option<String>,
    pub description: String,
    pub timestamp: DateTime<Utc>,

    /// Whether the client must act (e.g. complete an MFA challenge)
    pub action_required: bool,
}

impl SecurityEvent {
    pub fn new(
        kind: SecurityEventKind,
        severity: EventSeverity,
        user_id: Uuid,
        tenant_id: Uuid,
        device_id: Option<String>,
        description: impl Into<String>,
        action_required: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            user_id,
            tenant_id,
            device_id,
            description: description.into(),
            timestamp: Utc::now(),
            action_required,
        }
    }
}

/// Broadcast when a user's permission set changes. Not persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionChangeEvent {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast when a user's tier changes. Not persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierChangeEvent {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub before: String,
    pub after: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Platform-agnostic notification payload handed to the fan-out engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
    pub sound: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<u32>,
    pub ttl_secs: Option<u64>,
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: None,
            sound: None,
            icon: None,
            badge: None,
            ttl_secs: None,
        }
    }
}

/// Per-platform slice of a fan-out outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformFanOut {
    pub platform: Platform,
    pub delivered: usize,
    pub failed: usize,
}

/// Aggregate fan-out outcome
///
/// `success` is false only when no tokens were found or nothing was
/// delivered; a partial platform outage still counts as success for the
/// platforms that were up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutResult {
    pub success: bool,
    pub delivered_count: usize,
    pub failed_count: usize,
    pub invalid_tokens: Vec<String>,
    pub per_platform: Vec<PlatformFanOut>,
}

impl FanOutResult {
    pub fn empty() -> Self {
        Self {
            success: false,
            delivered_count: 0,
            failed_count: 0,
            invalid_tokens: Vec::new(),
            per_platform: Vec::new(),
        }
    }
}

/// Parsed authentication deep link
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum DeepLinkFlow {
    OauthCallback {
        provider: String,
        code: Option<String>,
        state: Option<String>,
        error: Option<String>,
    },
    PasswordReset {
        token: String,
    },
    EmailVerification {
        token: String,
    },
    DeviceVerification {
        token: String,
        device_id: Option<String>,
    },
}
