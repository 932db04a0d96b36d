//! Session Memory
//!
//! Short-term conversational memory for agents:
//! - Append-only per-session message logs kept in a sorted-set store
//! - Sliding-window and token-threshold context strategies
//! - LLM-backed compaction of overflowing sessions
//! - Per-session configuration overrides over process defaults
//!
//! FLOW:
//! APPEND → STORE → (CONTEXT REQUEST) → STRATEGY → [SUMMARIZE → REPLACE] → CONTEXT

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod models;
pub mod service;

pub use error::{MemoryError, Result};

// Re-export common types
pub use config::Settings;
pub use models::*;
pub use service::{AppContext, ShortTermMemory};
