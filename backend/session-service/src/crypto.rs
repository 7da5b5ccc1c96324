/// Crypto helpers for the biometric authenticator
///
/// Enrollment templates are encrypted with AES-256-GCM under a key derived
/// per tenant from a single master key, so a leaked tenant key exposes only
/// that tenant's templates. The IV is randomly generated for each
/// encryption and stored alongside the ciphertext.
///
/// Challenge verification is deterministic: the expected signature is an
/// HMAC-SHA256 over the challenge and timestamp keyed by the registered
/// public key, and the supplied signature is compared against it with a
/// positional similarity score to tolerate biometric-matcher variance.
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::{general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::EncryptedTemplate;

const TEMPLATE_ALGORITHM: &str = "aes-256-gcm";
const IV_LEN: usize = 12;

/// Template encryption service holding the master key
#[derive(Debug)]
pub struct TemplateCipher {
    master_key: [u8; 32],
}

impl TemplateCipher {
    /// Builds the cipher from a base64-encoded 256-bit master key
    pub fn new(key_base64: &str) -> AppResult<Self> {
        let key_bytes = STANDARD
            .decode(key_base64)
            .map_err(|e| AppError::Crypto(format!("failed to decode master key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(AppError::Crypto(format!(
                "master key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let mut master_key = [0u8; 32];
        master_key.copy_from_slice(&key_bytes);
        Ok(Self { master_key })
    }

    /// Derives the tenant-scoped template key
    fn tenant_key(&self, tenant_id: Uuid) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(Some(tenant_id.as_bytes()), &self.master_key);
        let mut okm = [0u8; 32];
        // Expand cannot fail for a 32-byte output with SHA-256
        hk.expand(b"biometric-template", &mut okm)
            .unwrap_or_else(|_| unreachable!("hkdf expand with 32-byte output"));
        okm
    }

    pub fn encrypt_template(
        &self,
        tenant_id: Uuid,
        plaintext: &[u8],
    ) -> AppResult<EncryptedTemplate> {
        let key = self.tenant_key(tenant_id);
        let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key));

        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| AppError::Crypto("template encryption failed".to_string()))?;

        Ok(EncryptedTemplate {
            ciphertext: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(iv),
            algorithm: TEMPLATE_ALGORITHM.to_string(),
        })
    }

    pub fn decrypt_template(
        &self,
        tenant_id: Uuid,
        template: &EncryptedTemplate,
    ) -> AppResult<Vec<u8>> {
        if template.algorithm != TEMPLATE_ALGORITHM {
            return Err(AppError::Crypto(format!(
                "unsupported template algorithm: {}",
                template.algorithm
            )));
        }

        let iv = STANDARD
            .decode(&template.iv)
            .map_err(|e| AppError::Crypto(format!("failed to decode IV: {}", e)))?;
        if iv.len() != IV_LEN {
            return Err(AppError::Crypto("IV must be 12 bytes".to_string()));
        }

        let ciphertext = STANDARD
            .decode(&template.ciphertext)
            .map_err(|e| AppError::Crypto(format!("failed to decode ciphertext: {}", e)))?;

        let key = self.tenant_key(tenant_id);
        let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key));

        cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
            .map_err(|_| AppError::Crypto("template decryption failed".to_string()))
    }
}

/// Deterministic expected signature over (challenge, public key, timestamp)
pub fn expected_signature(
    challenge: &str,
    public_key: &str,
    timestamp: DateTime<Utc>,
) -> String {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(public_key.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(challenge.as_bytes());
    mac.update(timestamp.timestamp().to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Positional similarity between two signature strings in [0, 1]
///
/// The fraction of positions where both strings carry the same character,
/// over the longer length. Exact match scores 1.0; disjoint lengths are
/// penalized proportionally.
pub fn signature_similarity(a: &str, b: &str) -> f64 {
    let longer = a.len().max(b.len());
    if longer == 0 {
        return 1.0;
    }

    let matching = a
        .bytes()
        .zip(b.bytes())
        .filter(|(x, y)| x == y)
        .count();

    matching as f64 / longer as f64
}

/// Random, unguessable 32-byte session token, hex-encoded
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
