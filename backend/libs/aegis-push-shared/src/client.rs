use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::PushError;
use crate::models::{Platform, PlatformPayload, ProviderDelivery};

/// Trait for push notification providers
///
/// One implementation per delivery platform. A provider receives the whole
/// token batch for its platform in one call so platform SDK batching can be
/// used where available.
#[async_trait::async_trait]
pub trait PushProvider: Send + Sync {
    /// The platform this provider delivers to
    fn platform(&self) -> Platform;

    /// Sends one payload to a batch of device tokens
    ///
    /// # Arguments
    /// * `tokens` - Device tokens registered for this provider's platform
    /// * `payload` - Payload already optimized for this platform
    ///
    /// # Returns
    /// The delivery counts and the tokens the platform reported invalid.
    /// An `Err` means the platform itself was unreachable; the caller treats
    /// every token in the batch as failed but not invalid.
    async fn send(
        &self,
        tokens: &[String],
        payload: &PlatformPayload,
    ) -> Result<ProviderDelivery, PushError>;
}

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    tokens: &'a [String],
    payload: &'a PlatformPayload,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    delivered: usize,
    failed: usize,
    #[serde(default)]
    invalid_tokens: Vec<String>,
}

/// HTTP-backed push provider
///
/// Speaks to a platform delivery gateway over JSON: POST the token batch and
/// payload, read back `{delivered, failed, invalid_tokens}`. The gateway is
/// whatever stands in front of the real platform SDK (APNs, FCM, a web-push
/// relay); this client does not know the platform wire protocol.
pub struct HttpPushProvider {
    platform: Platform,
    endpoint: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl HttpPushProvider {
    pub fn new(platform: Platform, endpoint: String, api_key: Option<String>) -> Self {
        Self {
            platform,
            endpoint,
            api_key,
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl PushProvider for HttpPushProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn send(
        &self,
        tokens: &[String],
        payload: &PlatformPayload,
    ) -> Result<ProviderDelivery, PushError> {
        let request = GatewayRequest { tokens, payload };

        let mut builder = self
            .http_client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");

        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| PushError::SendRequestError(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let body: GatewayResponse = response
                    .json()
                    .await
                    .map_err(|e| PushError::ResponseParseError(e.to_string()))?;

                debug!(
                    platform = self.platform.as_str(),
                    delivered = body.delivered,
                    failed = body.failed,
                    invalid = body.invalid_tokens.len(),
                    "push gateway delivery complete"
                );

                Ok(ProviderDelivery {
                    delivered: body.delivered,
                    failed: body.failed,
                    invalid_tokens: body.invalid_tokens,
                })
            }
            status => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());

                warn!(
                    platform = self.platform.as_str(),
                    %status,
                    "push gateway rejected send"
                );

                Err(PushError::ApiError(status.to_string(), error_text))
            }
        }
    }
}
