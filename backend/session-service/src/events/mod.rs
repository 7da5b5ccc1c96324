pub mod bus;
pub mod reconnect;
pub mod transport;

pub use bus::{BroadcastOutcome, EventPropagationBus, SubscriptionHandle};
pub use reconnect::{ConnectionStatus, ReconnectMachine, ReconnectPolicy};
pub use transport::{BroadcastReceipt, ChannelTransport, EventTransport, TransportStream};

use serde::{Deserialize, Serialize};

use crate::models::{PermissionChangeEvent, SecurityEvent, TierChangeEvent};

/// Stream kind enumeration. Each kind is an independent long-lived
/// subscription; ordering is guaranteed within one kind, never across kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamKind {
    Permission,
    Tier,
    Security,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Permission => "permission",
            StreamKind::Tier => "tier",
            StreamKind::Security => "security",
        }
    }

    pub fn all() -> [StreamKind; 3] {
        [StreamKind::Permission, StreamKind::Tier, StreamKind::Security]
    }
}

/// One event as carried on a stream. Typed per category so subscribers
/// never dispatch on string event names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stream", rename_all = "lowercase")]
pub enum EventFrame {
    Permission(PermissionChangeEvent),
    Tier(TierChangeEvent),
    Security(SecurityEvent),
}

impl EventFrame {
    pub fn kind(&self) -> StreamKind {
        match self {
            EventFrame::Permission(_) => StreamKind::Permission,
            EventFrame::Tier(_) => StreamKind::Tier,
            EventFrame::Security(_) => StreamKind::Security,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventSeverity, SecurityEventKind};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_frame_kind_mapping() {
        let security = EventFrame::Security(SecurityEvent::new(
            SecurityEventKind::Login,
            EventSeverity::Info,
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            "login",
            false,
        ));
        assert_eq!(security.kind(), StreamKind::Security);

        let tier = EventFrame::Tier(TierChangeEvent {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            before: "free".to_string(),
            after: "pro".to_string(),
            reason: "upgrade".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(tier.kind(), StreamKind::Tier);
    }
}
