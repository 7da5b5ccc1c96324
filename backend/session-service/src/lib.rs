pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use events::{
    ChannelTransport, ConnectionStatus, EventFrame, EventPropagationBus, EventTransport,
    ReconnectPolicy, StreamKind, SubscriptionHandle,
};
pub use services::*;
pub use store::{CredentialStore, MemoryStore, RedisStore};
