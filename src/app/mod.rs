pub mod chat;
pub mod dispatch;

pub use dispatch::dispatch;
