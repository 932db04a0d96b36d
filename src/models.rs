//! Core data models for short-term memory

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::MemoryError;

//
// ================= Limits =================
//

pub const MAX_MESSAGES_LIMIT: usize = 10_000;
pub const MAX_TOKENS_LIMIT: usize = 1_000_000;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Summary,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Summary => "summary",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context-windowing strategy selector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    SlidingWindow,
    TokenThreshold,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::SlidingWindow => "sliding_window",
            StrategyKind::TokenThreshold => "token_threshold",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sliding_window" => Ok(StrategyKind::SlidingWindow),
            "token_threshold" => Ok(StrategyKind::TokenThreshold),
            other => Err(MemoryError::InvalidConfig(format!(
                "unknown strategy '{}'",
                other
            ))),
        }
    }
}

//
// ================= Messages =================
//

/// A message as submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A message after it has been written to a session log.
///
/// `token_count` is computed once at write time and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Seconds since the Unix epoch; also the sorted-set score
    pub timestamp: f64,
    pub token_count: usize,
}

impl StoredMessage {
    /// Strip identity, keeping what a caller originally submitted
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

//
// ================= Session Config =================
//

/// Per-session override; unset fields fall back to process defaults
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default)]
    pub strategy: Option<StrategyKind>,
    #[serde(default)]
    pub max_messages: Option<usize>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

impl SessionConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(max_messages) = self.max_messages {
            validate_max_messages(max_messages)?;
        }
        if let Some(max_tokens) = self.max_tokens {
            validate_max_tokens(max_tokens)?;
        }
        Ok(())
    }

    /// Field-by-field merge over `defaults`
    pub fn resolve(&self, defaults: &EffectiveConfig) -> EffectiveConfig {
        EffectiveConfig {
            strategy: self.strategy.unwrap_or(defaults.strategy),
            max_messages: self.max_messages.unwrap_or(defaults.max_messages),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
        }
    }
}

pub(crate) fn validate_max_messages(value: usize) -> crate::Result<()> {
    if value == 0 || value > MAX_MESSAGES_LIMIT {
        return Err(MemoryError::InvalidConfig(format!(
            "max_messages must be between 1 and {}, got {}",
            MAX_MESSAGES_LIMIT, value
        )));
    }
    Ok(())
}

pub(crate) fn validate_max_tokens(value: usize) -> crate::Result<()> {
    if value == 0 || value > MAX_TOKENS_LIMIT {
        return Err(MemoryError::InvalidConfig(format!(
            "max_tokens must be between 1 and {}, got {}",
            MAX_TOKENS_LIMIT, value
        )));
    }
    Ok(())
}

/// Fully resolved windowing parameters for one request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub strategy: StrategyKind,
    pub max_messages: usize,
    pub max_tokens: usize,
}

//
// ================= Context =================
//

/// Bounded view of a session handed back to a caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Context {
    pub session_id: String,
    pub messages: Vec<StoredMessage>,
    pub strategy: StrategyKind,
    pub total_tokens: usize,
}

impl Context {
    pub fn new(session_id: &str, messages: Vec<StoredMessage>, strategy: StrategyKind) -> Self {
        let total_tokens = messages.iter().map(|m| m.token_count).sum();
        Self {
            session_id: session_id.to_string(),
            messages,
            strategy,
            total_tokens,
        }
    }
}
