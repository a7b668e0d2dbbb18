//! The append-only conversation log of one run.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub ordinal: u32,
    pub role: Role,
    pub content: String,
    pub is_prefilled: bool,
    /// What actually crossed the terminal boundary: extracted keystrokes for
    /// assistant messages, visible screen text for environment replies.
    pub underlying_communication: Option<String>,
}

/// Ordered messages with ordinals assigned on append, starting at 0.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return a reference to it with its ordinal filled in.
    pub fn push(
        &mut self,
        role: Role,
        content: impl Into<String>,
        is_prefilled: bool,
        underlying_communication: Option<String>,
    ) -> &ChatMessage {
        let ordinal = u32::try_from(self.messages.len()).unwrap_or(u32::MAX);
        self.messages.push(ChatMessage {
            ordinal,
            role,
            content: content.into(),
            is_prefilled,
            underlying_communication,
        });
        &self.messages[self.messages.len() - 1]
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Everything except the most recent message.
    pub fn all_but_last(&self) -> &[ChatMessage] {
        match self.messages.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    #[cfg(test)]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
