//! Short-Term Memory
//!
//! Per-session message logs, session configuration overrides, and the
//! windowing strategies that bound what a session hands back as context.

pub mod backend;
pub mod in_memory;
pub mod keys;
pub mod redis_backend;
pub mod session_config;
pub mod store;
pub mod strategy;
pub mod summarizer;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{ScoredMember, StoreBackend, SwapOutcome};
pub use in_memory::InMemoryBackend;
pub use keys::SessionKeys;
pub use redis_backend::RedisBackend;
pub use session_config::SessionConfigStore;
pub use store::MessageStore;
pub use strategy::{SlidingWindow, StrategyRegistry, TokenThreshold, WindowStrategy};
pub use summarizer::ContextSummarizer;
pub use tokens::TokenCounter;
