/// Biometric Authenticator
///
/// Challenge-response verification against locally-signed biometric
/// credentials, with replay protection, a hard failure lockout and opaque
/// bearer session tokens. Every path returns a typed outcome; nothing is
/// thrown across the component boundary.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BiometricConfig;
use crate::crypto::{self, TemplateCipher};
use crate::error::AppResult;
use crate::events::EventPropagationBus;
use crate::metrics;
use crate::models::{
    AuthRejection, BiometricAuthOutcome, BiometricAuthRequest, BiometricModality,
    BiometricRegistration, EventSeverity, SecurityEvent, SecurityEventKind, SessionTokenRecord,
};
use crate::store::{keys, CredentialStore};

pub struct BiometricAuthenticator {
    store: Arc<dyn CredentialStore>,
    cipher: TemplateCipher,
    config: BiometricConfig,
    events: Option<Arc<EventPropagationBus>>,

    /// Serializes failure-counter updates per registration tuple so two
    /// concurrent attempts cannot both observe the pre-increment count
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BiometricAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>, config: BiometricConfig) -> AppResult<Self> {
        let cipher = TemplateCipher::new(&config.template_key_base64)?;
        Ok(Self {
            store,
            cipher,
            config,
            events: None,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Wire the event bus; security events are emitted through it when set
    pub fn with_event_bus(mut self, events: Arc<EventPropagationBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Enroll or re-enroll a biometric credential
    ///
    /// Overwrites any existing registration for the tuple, resets the
    /// failure counter and re-activates it; re-registration is the only way
    /// out of a lockout.
    pub async fn register_biometric(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        device_id: &str,
        modality: BiometricModality,
        public_key: &str,
        key_algorithm: &str,
        enrollment_template: &[u8],
    ) -> AppResult<BiometricRegistration> {
        let key = keys::biometric_registration(tenant_id, user_id, device_id, modality);
        let previous = self.load_registration(&key).await?;

        let now = Utc::now();
        let registration = BiometricRegistration {
            tenant_id,
            user_id,
            device_id: device_id.to_string(),
            modality,
            public_key: public_key.to_string(),
            key_algorithm: key_algorithm.to_string(),
            template: self.cipher.encrypt_template(tenant_id, enrollment_template)?,
            is_active: true,
            failure_count: 0,
            max_failures: self.config.max_failures,
            created_at: previous.as_ref().map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
            last_used_at: None,
        };

        self.save_registration(&key, &registration).await?;

        info!(
            user_id = %user_id,
            device_id = device_id,
            modality = modality.as_str(),
            "biometric registered"
        );

        if previous.is_none() {
            self.emit(SecurityEvent::new(
                SecurityEventKind::NewDevice,
                EventSeverity::Info,
                user_id,
                tenant_id,
                Some(device_id.to_string()),
                format!("biometric {} enrolled on new device", modality.as_str()),
                false,
            ))
            .await;
        }

        Ok(registration)
    }

    /// Verify a challenge-response request and issue a session token
    pub async fn authenticate(
        &self,
        request: &BiometricAuthRequest,
    ) -> AppResult<BiometricAuthOutcome> {
        let now = Utc::now();
        let age = now - request.timestamp;

        // Replay / clock-skew window check comes before any store access
        if age > Duration::seconds(self.config.max_request_age_secs)
            || age < -Duration::seconds(self.config.max_clock_skew_secs)
        {
            metrics::auth_attempt(AuthRejection::ReplayOrClockSkew.as_str());
            return Ok(rejected(AuthRejection::ReplayOrClockSkew, false));
        }

        let key = keys::biometric_registration(
            request.tenant_id,
            request.user_id,
            &request.device_id,
            request.modality,
        );

        // Hold the per-tuple lock across the read-modify-write of the
        // failure counter
        let guard = self.tuple_lock(&key).await;
        let _held = guard.lock().await;

        let Some(mut registration) = self.load_registration(&key).await? else {
            metrics::auth_attempt(AuthRejection::NotRegistered.as_str());
            return Ok(rejected(AuthRejection::NotRegistered, true));
        };

        if !registration.is_active {
            metrics::auth_attempt(AuthRejection::Disabled.as_str());
            return Ok(rejected(AuthRejection::Disabled, true));
        }

        if registration.is_locked_out() {
            metrics::auth_attempt(AuthRejection::LockedOut.as_str());
            return Ok(rejected(AuthRejection::LockedOut, true));
        }

        if registration.public_key != request.public_key {
            self.record_failure(&key, &mut registration).await?;
            metrics::auth_attempt(AuthRejection::VerificationFailed.as_str());
            return Ok(rejected(AuthRejection::VerificationFailed, false));
        }

        let expected = crypto::expected_signature(
            &request.challenge,
            &registration.public_key,
            request.timestamp,
        );
        let similarity = crypto::signature_similarity(&expected, &request.signature);

        if similarity < self.config.similarity_threshold {
            self.record_failure(&key, &mut registration).await?;
            metrics::auth_attempt(AuthRejection::VerificationFailed.as_str());
            return Ok(rejected(AuthRejection::VerificationFailed, false));
        }

        registration.failure_count = 0;
        registration.last_used_at = Some(now);
        registration.updated_at = now;
        self.save_registration(&key, &registration).await?;

        let token = crypto::generate_session_token();
        let expires_at = now + Duration::seconds(self.config.session_ttl_secs as i64);
        let record = SessionTokenRecord {
            token: token.clone(),
            user_id: request.user_id,
            tenant_id: request.tenant_id,
            device_id: request.device_id.clone(),
            expires_at,
        };

        self.store
            .set(
                &keys::biometric_session(&token),
                &serde_json::to_string(&record)?,
                Some(self.config.session_ttl_secs),
            )
            .await?;

        metrics::auth_attempt("success");
        info!(
            user_id = %request.user_id,
            device_id = %request.device_id,
            modality = request.modality.as_str(),
            "biometric authentication succeeded"
        );

        self.emit(SecurityEvent::new(
            SecurityEventKind::Login,
            EventSeverity::Info,
            request.user_id,
            request.tenant_id,
            Some(request.device_id.clone()),
            format!("biometric login via {}", request.modality.as_str()),
            false,
        ))
        .await;

        Ok(BiometricAuthOutcome::Success { token, expires_at })
    }

    /// Deactivate registrations for a device; `None` modality means all
    pub async fn unregister_biometric(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        device_id: &str,
        modality: Option<BiometricModality>,
    ) -> AppResult<()> {
        let modalities: Vec<BiometricModality> = match modality {
            Some(m) => vec![m],
            None => BiometricModality::all().to_vec(),
        };

        for m in modalities {
            let key = keys::biometric_registration(tenant_id, user_id, device_id, m);
            if let Some(mut registration) = self.load_registration(&key).await? {
                registration.is_active = false;
                registration.updated_at = Utc::now();
                self.save_registration(&key, &registration).await?;
                info!(
                    user_id = %user_id,
                    device_id = device_id,
                    modality = m.as_str(),
                    "biometric unregistered"
                );
            }
        }
        Ok(())
    }

    /// Validates a bearer session token; expired or mismatched-owner tokens
    /// are purged and report false
    pub async fn validate_session_token(
        &self,
        token: &str,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> AppResult<bool> {
        let key = keys::biometric_session(token);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(false);
        };

        let record: SessionTokenRecord = serde_json::from_str(&raw)?;
        let valid = record.user_id == user_id
            && record.tenant_id == tenant_id
            && record.expires_at > Utc::now();

        if !valid {
            self.store.delete(&key).await?;
        }
        Ok(valid)
    }

    /// Explicitly revoke one session token
    pub async fn invalidate_session_token(&self, token: &str) -> AppResult<()> {
        self.store.delete(&keys::biometric_session(token)).await
    }

    async fn record_failure(
        &self,
        key: &str,
        registration: &mut BiometricRegistration,
    ) -> AppResult<()> {
        registration.failure_count += 1;
        registration.updated_at = Utc::now();
        self.save_registration(key, registration).await?;

        warn!(
            user_id = %registration.user_id,
            device_id = %registration.device_id,
            failure_count = registration.failure_count,
            "biometric verification failed"
        );

        if registration.is_locked_out() {
            self.emit(SecurityEvent::new(
                SecurityEventKind::SuspiciousActivity,
                EventSeverity::Warning,
                registration.user_id,
                registration.tenant_id,
                Some(registration.device_id.clone()),
                format!(
                    "biometric {} locked out after {} failures",
                    registration.modality.as_str(),
                    registration.failure_count
                ),
                true,
            ))
            .await;
        }
        Ok(())
    }

    async fn load_registration(&self, key: &str) -> AppResult<Option<BiometricRegistration>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save_registration(
        &self,
        key: &str,
        registration: &BiometricRegistration,
    ) -> AppResult<()> {
        self.store
            .set(key, &serde_json::to_string(registration)?, None)
            .await
    }

    async fn tuple_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn emit(&self, event: SecurityEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.broadcast_security_event(event).await {
                warn!(error = %e, "failed to broadcast security event");
            }
        }
    }
}

fn rejected(reason: AuthRejection, requires_reregistration: bool) -> BiometricAuthOutcome {
    BiometricAuthOutcome::Rejected {
        reason,
        requires_reregistration,
    }
}
