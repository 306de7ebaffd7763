//! Conversation context supplied to the language model on every turn

mod aggregator;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use aggregator::{
    AssistantContextAggregator, ContextAggregatorPair, ResponseGate, UserContextAggregator,
};

/// Role tag of a context message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

impl ContextMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered message history for one session
#[derive(Debug, Clone, Default)]
pub struct LlmContext {
    messages: Vec<ContextMessage>,
}

/// Context shared between the aggregators, the LLM stage and event handlers
pub type SharedContext = Arc<Mutex<LlmContext>>;

impl LlmContext {
    /// Create a context seeded with initial messages
    #[must_use]
    pub const fn new(messages: Vec<ContextMessage>) -> Self {
        Self { messages }
    }

    /// Wrap into a [`SharedContext`]
    #[must_use]
    pub fn shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    /// Append a message at the end of the history
    pub fn add_message(&mut self, message: ContextMessage) {
        tracing::trace!(
            role = message.role.as_str(),
            len = message.content.len(),
            "context message added"
        );
        self.messages.push(message);
    }

    /// Messages in insertion order
    #[must_use]
    pub fn messages(&self) -> &[ContextMessage] {
        &self.messages
    }

    #[must_use]
    pub fn last(&self) -> Option<&ContextMessage> {
        self.messages.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
