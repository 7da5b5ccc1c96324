use chrono::{Duration, Utc};
/// End-to-end biometric authentication flows against the in-memory
/// credential store:
/// - enrollment, challenge-response success and session token issuance
/// - failure counting, hard lockout and re-enrollment recovery
/// - replay-window rejection
/// - session token validation and purging
use session_service::config::BiometricConfig;
use session_service::crypto;
use session_service::models::{
    AuthRejection, BiometricAuthOutcome, BiometricAuthRequest, BiometricModality,
};
use session_service::{BiometricAuthenticator, MemoryStore};
use std::sync::Arc;
use uuid::Uuid;

fn authenticator() -> BiometricAuthenticator {
    BiometricAuthenticator::new(Arc::new(MemoryStore::new()), BiometricConfig::for_tests())
        .unwrap()
}

fn request_signed_with(
    user_id: Uuid,
    tenant_id: Uuid,
    device_id: &str,
    public_key: &str,
) -> BiometricAuthRequest {
    let timestamp = Utc::now();
    let challenge = format!("challenge-{}", Uuid::new_v4());
    let signature = crypto::expected_signature(&challenge, public_key, timestamp);

    BiometricAuthRequest {
        tenant_id,
        user_id,
        device_id: device_id.to_string(),
        modality: BiometricModality::Fingerprint,
        challenge,
        signature,
        public_key: public_key.to_string(),
        timestamp,
    }
}

#[tokio::test]
async fn register_and_authenticate_with_matching_key() {
    let auth = authenticator();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    auth.register_biometric(
        user_id,
        tenant_id,
        "device-1",
        BiometricModality::Fingerprint,
        "key-k",
        "ed25519",
        b"enrollment-template",
    )
    .await
    .unwrap();

    let outcome = auth
        .authenticate(&request_signed_with(user_id, tenant_id, "device-1", "key-k"))
        .await
        .unwrap();

    let (token, expires_at) = match outcome {
        BiometricAuthOutcome::Success { token, expires_at } => (token, expires_at),
        other => panic!("expected success, got {:?}", other),
    };

    assert!(!token.is_empty());

    // expires_at is about one hour out
    let ttl = expires_at - Utc::now();
    assert!(ttl > Duration::minutes(59));
    assert!(ttl <= Duration::hours(1));

    assert!(auth
        .validate_session_token(&token, user_id, tenant_id)
        .await
        .unwrap());
}

#[tokio::test]
async fn different_public_key_fails_and_counts() {
    let auth = authenticator();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    auth.register_biometric(
        user_id,
        tenant_id,
        "device-1",
        BiometricModality::Fingerprint,
        "key-k",
        "ed25519",
        b"enrollment-template",
    )
    .await
    .unwrap();

    let outcome = auth
        .authenticate(&request_signed_with(
            user_id,
            tenant_id,
            "device-1",
            "another-key",
        ))
        .await
        .unwrap();

    assert_eq!(outcome.rejection(), Some(AuthRejection::VerificationFailed));

    // One more failure, then a success resets the counter: the lockout
    // threshold of 5 is never reached across this sequence
    auth.authenticate(&request_signed_with(
        user_id,
        tenant_id,
        "device-1",
        "another-key",
    ))
    .await
    .unwrap();

    let outcome = auth
        .authenticate(&request_signed_with(user_id, tenant_id, "device-1", "key-k"))
        .await
        .unwrap();
    assert!(outcome.is_success());

    for _ in 0..4 {
        auth.authenticate(&request_signed_with(
            user_id,
            tenant_id,
            "device-1",
            "another-key",
        ))
        .await
        .unwrap();
    }

    // 4 consecutive failures post-reset: still below the threshold
    let outcome = auth
        .authenticate(&request_signed_with(user_id, tenant_id, "device-1", "key-k"))
        .await
        .unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn lockout_is_hard_until_reregistration() {
    let auth = authenticator();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    auth.register_biometric(
        user_id,
        tenant_id,
        "device-1",
        BiometricModality::Fingerprint,
        "key-k",
        "ed25519",
        b"enrollment-template",
    )
    .await
    .unwrap();

    for _ in 0..5 {
        let outcome = auth
            .authenticate(&request_signed_with(
                user_id,
                tenant_id,
                "device-1",
                "wrong-key",
            ))
            .await
            .unwrap();
        assert_eq!(outcome.rejection(), Some(AuthRejection::VerificationFailed));
    }

    // Every subsequent attempt reports the lockout, no matter how valid
    for _ in 0..3 {
        let outcome = auth
            .authenticate(&request_signed_with(user_id, tenant_id, "device-1", "key-k"))
            .await
            .unwrap();
        assert_eq!(outcome.rejection(), Some(AuthRejection::LockedOut));
        match outcome {
            BiometricAuthOutcome::Rejected {
                requires_reregistration,
                ..
            } => assert!(requires_reregistration),
            _ => unreachable!(),
        }
    }

    // Re-enrollment is the only way out
    auth.register_biometric(
        user_id,
        tenant_id,
        "device-1",
        BiometricModality::Fingerprint,
        "key-k",
        "ed25519",
        b"enrollment-template",
    )
    .await
    .unwrap();

    let outcome = auth
        .authenticate(&request_signed_with(user_id, tenant_id, "device-1", "key-k"))
        .await
        .unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn stale_timestamp_always_rejected() {
    let auth = authenticator();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    auth.register_biometric(
        user_id,
        tenant_id,
        "device-1",
        BiometricModality::Fingerprint,
        "key-k",
        "ed25519",
        b"enrollment-template",
    )
    .await
    .unwrap();

    // Correctly signed for its timestamp, but the timestamp is stale
    let mut request = request_signed_with(user_id, tenant_id, "device-1", "key-k");
    request.timestamp = Utc::now() - Duration::minutes(6);
    request.signature =
        crypto::expected_signature(&request.challenge, &request.public_key, request.timestamp);

    let outcome = auth.authenticate(&request).await.unwrap();
    assert_eq!(outcome.rejection(), Some(AuthRejection::ReplayOrClockSkew));
}

#[tokio::test]
async fn expired_session_token_is_purged() {
    let store = Arc::new(MemoryStore::new());
    let auth = BiometricAuthenticator::new(store.clone(), BiometricConfig::for_tests()).unwrap();
    let user_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();

    auth.register_biometric(
        user_id,
        tenant_id,
        "device-1",
        BiometricModality::Fingerprint,
        "key-k",
        "ed25519",
        b"enrollment-template",
    )
    .await
    .unwrap();

    let outcome = auth
        .authenticate(&request_signed_with(user_id, tenant_id, "device-1", "key-k"))
        .await
        .unwrap();
    let token = match outcome {
        BiometricAuthOutcome::Success { token, .. } => token,
        other => panic!("expected success, got {:?}", other),
    };

    store
        .expire_now(&format!("biometric_session:{}", token))
        .await;

    assert!(!auth
        .validate_session_token(&token, user_id, tenant_id)
        .await
        .unwrap());
}
