use std::collections::VecDeque;
use std::sync::Mutex;

use crate::errors::PushError;
use crate::models::{Platform, PlatformPayload, ProviderDelivery};
use crate::PushProvider;

/// Recorded call made against a [`MockPushProvider`]
#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub tokens: Vec<String>,
    pub payload: PlatformPayload,
}

enum ScriptedOutcome {
    Deliver,
    Invalidate(Vec<String>),
    Unreachable(String),
}

/// Scriptable in-memory push provider for tests
///
/// By default every token is delivered. Outcomes can be queued to simulate
/// invalid tokens or a platform outage; each queued outcome applies to one
/// `send` call, after which the provider reverts to delivering everything.
pub struct MockPushProvider {
    platform: Platform,
    script: Mutex<VecDeque<ScriptedOutcome>>,
    calls: Mutex<Vec<RecordedSend>>,
}

impl MockPushProvider {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue one send that reports the given tokens as permanently invalid
    pub fn queue_invalid_tokens(&self, tokens: Vec<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedOutcome::Invalidate(tokens));
    }

    /// Queue one send that fails as if the platform were down
    pub fn queue_outage(&self, reason: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedOutcome::Unreachable(reason.to_string()));
    }

    /// Queue one send that delivers everything (useful to interleave outcomes)
    pub fn queue_success(&self) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedOutcome::Deliver);
    }

    /// All sends recorded so far
    pub fn calls(&self) -> Vec<RecordedSend> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl PushProvider for MockPushProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn send(
        &self,
        tokens: &[String],
        payload: &PlatformPayload,
    ) -> Result<ProviderDelivery, PushError> {
        self.calls.lock().unwrap().push(RecordedSend {
            tokens: tokens.to_vec(),
            payload: payload.clone(),
        });

        let outcome = self.script.lock().unwrap().pop_front();
        match outcome {
            None | Some(ScriptedOutcome::Deliver) => Ok(ProviderDelivery {
                delivered: tokens.len(),
                failed: 0,
                invalid_tokens: Vec::new(),
            }),
            Some(ScriptedOutcome::Invalidate(invalid)) => {
                let invalid_tokens: Vec<String> = tokens
                    .iter()
                    .filter(|t| invalid.contains(t))
                    .cloned()
                    .collect();
                Ok(ProviderDelivery {
                    delivered: tokens.len() - invalid_tokens.len(),
                    failed: invalid_tokens.len(),
                    invalid_tokens,
                })
            }
            Some(ScriptedOutcome::Unreachable(reason)) => {
                Err(PushError::SendRequestError(reason))
            }
        }
    }
}
