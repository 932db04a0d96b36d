//! Context Summarization
//!
//! Condenses an overflowed prefix of a session log into a single summary
//! via the chat-completions collaborator.

use tracing::{info, warn};

use crate::error::MemoryError;
use crate::llm::{ChatCompletionRequest, ChatCompletions, ChatMessage};
use crate::models::StoredMessage;

pub const SUMMARY_INSTRUCTION: &str =
    "Summarize the following conversation concisely while preserving key facts.";

/// Summarizes conversation context with a fixed model and temperature
#[derive(Debug, Clone)]
pub struct ContextSummarizer {
    model: String,
    temperature: f32,
}

impl ContextSummarizer {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
        }
    }

    /// One `"<role>: <content>"` line per message, newline-joined
    pub fn format_transcript(messages: &[StoredMessage]) -> String {
        messages
            .iter()
            .map(|msg| format!("{}: {}", msg.role, msg.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn build_request(&self, messages: &[StoredMessage]) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(SUMMARY_INSTRUCTION),
                ChatMessage::user(Self::format_transcript(messages)),
            ],
            temperature: self.temperature,
        }
    }

    /// Summary text of `messages`; an empty string is a valid result
    pub async fn summarize(
        &self,
        client: &dyn ChatCompletions,
        messages: &[StoredMessage],
    ) -> crate::Result<String> {
        info!(model = %self.model, messages = messages.len(), "summarizing session prefix");

        let response = client.complete(&self.build_request(messages)).await?;
        match response.first_content() {
            Some(summary) => Ok(summary),
            None => {
                warn!(model = %self.model, "summarizer returned no choices");
                Err(MemoryError::SummarizerUnavailable(
                    "response contained no choices".to_string(),
                ))
            }
        }
    }
}
