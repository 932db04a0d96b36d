//! Test doubles shared by the memory and service tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::MemoryError;
use crate::llm::{ChatCompletionRequest, ChatCompletionResponse, ChatCompletions, Choice, ChoiceMessage};
use crate::memory::in_memory::InMemoryBackend;
use crate::memory::keys::SessionKeys;
use crate::memory::store::MessageStore;
use crate::memory::tokens::TokenCounter;
use crate::models::Message;

/// Summarizer that returns a fixed reply (or fails) and records requests
#[derive(Default)]
pub struct ScriptedSummarizer {
    reply: Option<String>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl ScriptedSummarizer {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ChatCompletions for ScriptedSummarizer {
    async fn complete(&self, request: &ChatCompletionRequest) -> crate::Result<ChatCompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        match &self.reply {
            Some(text) => Ok(ChatCompletionResponse {
                choices: vec![Choice {
                    message: ChoiceMessage {
                        content: Some(text.clone()),
                    },
                    finish_reason: Some("stop".to_string()),
                }],
            }),
            None => Err(MemoryError::SummarizerUnavailable("scripted failure".to_string())),
        }
    }
}

/// What happens to the session while a summary is "in flight"
pub enum Interference {
    Append(Message),
    DeleteThenAppend(Message),
    Outage(Arc<InMemoryBackend>),
}

/// Summarizer that disturbs the session before it answers
pub struct RacingSummarizer {
    pub store: Arc<MessageStore>,
    pub session_id: String,
    pub interference: Interference,
}

impl RacingSummarizer {
    pub fn new(store: Arc<MessageStore>, session_id: &str, interference: Interference) -> Self {
        Self {
            store,
            session_id: session_id.to_string(),
            interference,
        }
    }
}

#[async_trait::async_trait]
impl ChatCompletions for RacingSummarizer {
    async fn complete(&self, _request: &ChatCompletionRequest) -> crate::Result<ChatCompletionResponse> {
        match &self.interference {
            Interference::Append(message) => {
                self.store.append(&self.session_id, vec![message.clone()]).await?;
            }
            Interference::DeleteThenAppend(message) => {
                self.store.delete(&self.session_id).await?;
                self.store.append(&self.session_id, vec![message.clone()]).await?;
            }
            Interference::Outage(backend) => backend.set_unavailable(true),
        }
        Ok(ChatCompletionResponse {
            choices: vec![Choice {
                message: ChoiceMessage {
                    content: Some("raced summary".to_string()),
                },
                finish_reason: None,
            }],
        })
    }
}

pub fn memory_store(backend: Arc<InMemoryBackend>, ttl_seconds: u64) -> MessageStore {
    MessageStore::new(
        backend,
        TokenCounter::for_encoding("cl100k_base").expect("cl100k_base loads"),
        SessionKeys::default(),
        ttl_seconds,
    )
}
