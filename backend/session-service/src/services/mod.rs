pub mod biometric;
pub mod deep_link;
pub mod device_tokens;
pub mod fanout;
pub mod session_sync;

pub use biometric::BiometricAuthenticator;
pub use device_tokens::DeviceTokenRegistry;
pub use fanout::FanOutEngine;
pub use session_sync::{
    DeviceProfile, PushCapability, SessionSynchronizer, StaticPushCapability, SyncEvent,
    SyncState,
};
