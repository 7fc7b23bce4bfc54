pub mod bridge;
pub mod store;

pub use bridge::{PersistenceBridge, RetryPolicy};
pub use store::{Exchange, ExchangeSink, SqliteExchangeStore};
