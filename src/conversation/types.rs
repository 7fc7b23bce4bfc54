use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text shown in place of an assistant reply whose completion failed.
pub const APOLOGY_TEXT: &str = "Sorry, I couldn't process your message. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Flat lifecycle status as the UI sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Error,
}

/// Where a message is in its lifecycle.
///
/// User messages are created `Sent`. Assistant replies start as `Pending`
/// placeholders and are resolved exactly once to `Sent` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MessageState {
    #[serde(rename = "sending")]
    Pending,
    Sent {
        text: String,
    },
    #[serde(rename = "error")]
    Failed {
        text: String,
        #[serde(rename = "errorMessage")]
        detail: String,
    },
}

impl MessageState {
    pub fn sent(text: impl Into<String>) -> Self {
        Self::Sent { text: text.into() }
    }

    /// Failure resolution carrying the fixed apology plus the raw detail.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::Failed {
            text: APOLOGY_TEXT.to_string(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(flatten)]
    pub state: MessageState,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Displayed text; empty while the reply is still pending.
    pub fn text(&self) -> &str {
        match &self.state {
            MessageState::Pending => "",
            MessageState::Sent { text } | MessageState::Failed { text, .. } => text,
        }
    }

    pub fn status(&self) -> MessageStatus {
        match self.state {
            MessageState::Pending => MessageStatus::Sending,
            MessageState::Sent { .. } => MessageStatus::Sent,
            MessageState::Failed { .. } => MessageStatus::Error,
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match &self.state {
            MessageState::Failed { detail, .. } => Some(detail),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, MessageState::Pending)
    }
}

/// Partial message handed to the store; id and timestamp are assigned on append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: Role,
    pub state: MessageState,
}

impl NewMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            state: MessageState::sent(text),
        }
    }

    pub fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            state: MessageState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    pub messages: Vec<Message>,
    pub last_updated: DateTime<Utc>,
}

impl Session {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            message_count: self.messages.len(),
            last_updated: self.last_updated,
        }
    }
}

/// Listing projection of a session (no message bodies).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub message_count: usize,
    pub last_updated: DateTime<Utc>,
}
