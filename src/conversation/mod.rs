//! In-memory conversation core: session records, the message lifecycle and
//! the stateful façade the UI layers talk to.

pub mod context;
pub mod controller;
pub mod store;
pub mod types;

pub use context::{ConversationContext, ConversationSnapshot, SendOutcome};
pub use controller::MessageLifecycle;
pub use store::{InMemorySessionStore, SessionStore};
pub use types::{
    APOLOGY_TEXT, Message, MessageState, MessageStatus, NewMessage, Role, Session, SessionSummary,
};
