pub mod schema;

pub use schema::{
    AuthConfig, Config, ConversationConfig, GatewayConfig, PersistenceConfig, ProviderConfig,
};
