//! Context windowing strategies
//!
//! A strategy turns a session log into a bounded `Context`. Sliding window
//! is a pure read; token threshold compacts the log through the summarizer
//! once the budget is exceeded.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::store::MessageStore;
use super::summarizer::ContextSummarizer;
use crate::error::MemoryError;
use crate::llm::ChatCompletions;
use crate::models::{Context, EffectiveConfig, Message, MessageRole, StrategyKind};
use crate::Result;

/// Share of the log folded into the summary on compaction
const SUMMARIZE_FRACTION: f64 = 0.6;

#[async_trait::async_trait]
pub trait WindowStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn apply(
        &self,
        store: &MessageStore,
        session_id: &str,
        summarizer: &dyn ChatCompletions,
        config: &EffectiveConfig,
    ) -> Result<Context>;
}

/// Last `max_messages` entries; never mutates the log
pub struct SlidingWindow;

#[async_trait::async_trait]
impl WindowStrategy for SlidingWindow {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SlidingWindow
    }

    async fn apply(
        &self,
        store: &MessageStore,
        session_id: &str,
        _summarizer: &dyn ChatCompletions,
        config: &EffectiveConfig,
    ) -> Result<Context> {
        let limit = i64::try_from(config.max_messages).unwrap_or(i64::MAX);
        let messages = store.list(session_id, Some(limit)).await?;
        Ok(Context::new(session_id, messages, self.kind()))
    }
}

/// Summarize the oldest part of the log once it exceeds `max_tokens`
pub struct TokenThreshold {
    summarizer: ContextSummarizer,
}

impl TokenThreshold {
    pub fn new(summarizer: ContextSummarizer) -> Self {
        Self { summarizer }
    }

    /// Number of leading entries to summarize; at least one
    pub fn split_index(len: usize) -> usize {
        ((len as f64 * SUMMARIZE_FRACTION).floor() as usize).max(1)
    }
}

#[async_trait::async_trait]
impl WindowStrategy for TokenThreshold {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TokenThreshold
    }

    async fn apply(
        &self,
        store: &MessageStore,
        session_id: &str,
        summarizer: &dyn ChatCompletions,
        config: &EffectiveConfig,
    ) -> Result<Context> {
        // Version first: any write after this point fails the swap below.
        let version = store.version(session_id).await?;
        let messages = store.list(session_id, None).await?;
        if messages.is_empty() {
            return Ok(Context::new(session_id, Vec::new(), self.kind()));
        }

        let total: usize = messages.iter().map(|m| m.token_count).sum();
        if total <= config.max_tokens {
            debug!(session_id, total, budget = config.max_tokens, "within token budget");
            return Ok(Context::new(session_id, messages, self.kind()));
        }

        let split = Self::split_index(messages.len());
        let (prefix, tail) = messages.split_at(split);
        info!(
            session_id,
            total,
            budget = config.max_tokens,
            summarized = prefix.len(),
            kept = tail.len(),
            "compacting session log"
        );

        let summary = self.summarizer.summarize(summarizer, prefix).await?;

        let mut rewritten = Vec::with_capacity(tail.len() + 1);
        rewritten.push(Message::new(MessageRole::Summary, summary));
        rewritten.extend(tail.iter().map(|m| m.to_message()));

        store.replace_if_version(session_id, version, rewritten).await?;

        let compacted = store.list(session_id, None).await?;
        Ok(Context::new(session_id, compacted, self.kind()))
    }
}

/// Maps each `StrategyKind` to its implementation
pub struct StrategyRegistry {
    strategies: HashMap<StrategyKind, Arc<dyn WindowStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Registry with both built-in strategies
    pub fn with_defaults(summarizer: ContextSummarizer) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SlidingWindow));
        registry.register(Arc::new(TokenThreshold::new(summarizer)));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn WindowStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: StrategyKind) -> Result<Arc<dyn WindowStrategy>> {
        self.strategies.get(&kind).cloned().ok_or_else(|| {
            MemoryError::InvalidConfig(format!("no strategy registered for {}", kind))
        })
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::in_memory::InMemoryBackend;
    use crate::memory::summarizer::SUMMARY_INSTRUCTION;
    use crate::memory::testing::{memory_store, Interference, RacingSummarizer, ScriptedSummarizer};
    use crate::models::StoredMessage;
    use serde_json::{json, Map};

    fn config(max_messages: usize, max_tokens: usize, strategy: StrategyKind) -> EffectiveConfig {
        EffectiveConfig {
            strategy,
            max_messages,
            max_tokens,
        }
    }

    fn user(content: &str) -> Message {
        Message::new(MessageRole::User, content)
    }

    fn contents(messages: &[StoredMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    fn threshold() -> TokenThreshold {
        TokenThreshold::new(ContextSummarizer::new("gpt-4.1-mini", 0.1))
    }

    #[test]
    fn test_split_index() {
        assert_eq!(TokenThreshold::split_index(1), 1);
        assert_eq!(TokenThreshold::split_index(2), 1);
        assert_eq!(TokenThreshold::split_index(5), 3);
        assert_eq!(TokenThreshold::split_index(10), 6);
    }

    #[tokio::test]
    async fn test_sliding_window_truncates() {
        let store = memory_store(Arc::new(InMemoryBackend::new()), 0);
        store
            .append("session", vec![user("one"), user("two"), user("three")])
            .await
            .unwrap();
        let llm = ScriptedSummarizer::replying("summary");

        let ctx = SlidingWindow
            .apply(&store, "session", &llm, &config(2, 8000, StrategyKind::SlidingWindow))
            .await
            .unwrap();

        assert_eq!(ctx.strategy, StrategyKind::SlidingWindow);
        assert_eq!(contents(&ctx.messages), vec!["two", "three"]);
        assert_eq!(
            ctx.total_tokens,
            ctx.messages.iter().map(|m| m.token_count).sum::<usize>()
        );
        assert_eq!(llm.calls(), 0);
        assert_eq!(store.count("session").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_sliding_window_ignores_summarizer_outage() {
        let store = memory_store(Arc::new(InMemoryBackend::new()), 0);
        store.append("session", vec![user("one")]).await.unwrap();

        let ctx = SlidingWindow
            .apply(
                &store,
                "session",
                &ScriptedSummarizer::failing(),
                &config(10, 1, StrategyKind::SlidingWindow),
            )
            .await
            .unwrap();
        assert_eq!(contents(&ctx.messages), vec!["one"]);
    }

    #[tokio::test]
    async fn test_token_threshold_under_budget_is_idempotent() {
        let store = memory_store(Arc::new(InMemoryBackend::new()), 0);
        store
            .append("session", vec![user("one"), user("two")])
            .await
            .unwrap();
        let llm = ScriptedSummarizer::replying("unused");
        let cfg = config(50, 8000, StrategyKind::TokenThreshold);

        let first = threshold().apply(&store, "session", &llm, &cfg).await.unwrap();
        let second = threshold().apply(&store, "session", &llm, &cfg).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(contents(&first.messages), vec!["one", "two"]);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_token_threshold_empty_log() {
        let store = memory_store(Arc::new(InMemoryBackend::new()), 0);
        let llm = ScriptedSummarizer::replying("unused");

        let ctx = threshold()
            .apply(&store, "empty", &llm, &config(50, 1, StrategyKind::TokenThreshold))
            .await
            .unwrap();

        assert!(ctx.messages.is_empty());
        assert_eq!(ctx.total_tokens, 0);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_token_threshold_summarizes() {
        let store = memory_store(Arc::new(InMemoryBackend::new()), 0);
        let mut metadata = Map::new();
        metadata.insert("channel".to_string(), json!("sms"));
        store
            .append(
                "session",
                vec![user("one"), user("two").with_metadata(metadata.clone())],
            )
            .await
            .unwrap();
        let original = store.list("session", None).await.unwrap();
        let llm = ScriptedSummarizer::replying("summary text");

        let ctx = threshold()
            .apply(&store, "session", &llm, &config(50, 1, StrategyKind::TokenThreshold))
            .await
            .unwrap();

        assert_eq!(ctx.strategy, StrategyKind::TokenThreshold);
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[0].role, MessageRole::Summary);
        assert_eq!(ctx.messages[0].content, "summary text");

        let tail = &ctx.messages[1];
        assert_eq!(tail.role, MessageRole::User);
        assert_eq!(tail.content, "two");
        assert_eq!(tail.metadata, Some(metadata));
        assert_ne!(tail.id, original[1].id);

        assert_eq!(ctx.total_tokens, ctx.messages.iter().map(|m| m.token_count).sum::<usize>());
        assert_eq!(store.list("session", None).await.unwrap(), ctx.messages);

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].content, SUMMARY_INSTRUCTION);
        assert_eq!(requests[0].messages[1].content, "user: one");
        assert_eq!(requests[0].temperature, 0.1);
    }

    #[tokio::test]
    async fn test_token_threshold_split_keeps_tail_order() {
        let store = memory_store(Arc::new(InMemoryBackend::new()), 0);
        store
            .append(
                "session",
                vec![user("a"), user("b"), user("c"), user("d"), user("e")],
            )
            .await
            .unwrap();
        let llm = ScriptedSummarizer::replying("");

        let ctx = threshold()
            .apply(&store, "session", &llm, &config(50, 1, StrategyKind::TokenThreshold))
            .await
            .unwrap();

        // empty summary text is still a summary entry
        assert_eq!(contents(&ctx.messages), vec!["", "d", "e"]);
        assert_eq!(ctx.messages[0].role, MessageRole::Summary);
        assert_eq!(llm.requests()[0].messages[1].content, "user: a\nuser: b\nuser: c");
    }

    #[tokio::test]
    async fn test_summarizer_failure_leaves_log_untouched() {
        let store = memory_store(Arc::new(InMemoryBackend::new()), 0);
        store
            .append("session", vec![user("one"), user("two")])
            .await
            .unwrap();
        let before = store.list("session", None).await.unwrap();

        let err = threshold()
            .apply(
                &store,
                "session",
                &ScriptedSummarizer::failing(),
                &config(50, 1, StrategyKind::TokenThreshold),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MemoryError::SummarizerUnavailable(_)));
        assert_eq!(store.list("session", None).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_concurrent_append_is_not_lost() {
        let store = Arc::new(memory_store(Arc::new(InMemoryBackend::new()), 0));
        store
            .append("session", vec![user("one"), user("two")])
            .await
            .unwrap();
        let racer = RacingSummarizer::new(
            store.clone(),
            "session",
            Interference::Append(user("late")),
        );

        let err = threshold()
            .apply(&store, "session", &racer, &config(50, 1, StrategyKind::TokenThreshold))
            .await
            .unwrap_err();

        assert!(matches!(err, MemoryError::VersionConflict { .. }));
        assert_eq!(
            contents(&store.list("session", None).await.unwrap()),
            vec!["one", "two", "late"]
        );
    }

    #[tokio::test]
    async fn test_delete_during_compaction_is_not_resurrected() {
        let store = Arc::new(memory_store(Arc::new(InMemoryBackend::new()), 0));
        store
            .append("session", vec![user("a"), user("b")])
            .await
            .unwrap();
        let racer = RacingSummarizer::new(
            store.clone(),
            "session",
            Interference::DeleteThenAppend(user("fresh")),
        );

        let err = threshold()
            .apply(&store, "session", &racer, &config(50, 1, StrategyKind::TokenThreshold))
            .await
            .unwrap_err();

        assert!(matches!(err, MemoryError::VersionConflict { .. }));
        assert_eq!(contents(&store.list("session", None).await.unwrap()), vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_store_outage_during_replace_leaves_log_untouched() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(memory_store(backend.clone(), 0));
        store
            .append("session", vec![user("one"), user("two")])
            .await
            .unwrap();
        let before = store.list("session", None).await.unwrap();
        let racer = RacingSummarizer::new(
            store.clone(),
            "session",
            Interference::Outage(backend.clone()),
        );

        let err = threshold()
            .apply(&store, "session", &racer, &config(50, 1, StrategyKind::TokenThreshold))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::StoreUnavailable(_)));

        backend.set_unavailable(false);
        assert_eq!(store.list("session", None).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_compaction_refreshes_ttl() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = memory_store(backend.clone(), 3600);
        store
            .append("session", vec![user("one"), user("two")])
            .await
            .unwrap();
        let after_append = backend.expiry_calls().await.len();

        threshold()
            .apply(
                &store,
                "session",
                &ScriptedSummarizer::replying("short"),
                &config(50, 1, StrategyKind::TokenThreshold),
            )
            .await
            .unwrap();

        let calls = backend.expiry_calls().await;
        assert_eq!(
            &calls[after_append..],
            &[
                ("stm:session:session:messages".to_string(), 3600),
                ("stm:session:session:version".to_string(), 3600),
            ]
        );
    }

    #[test]
    fn test_registry_dispatch() {
        let registry = StrategyRegistry::with_defaults(ContextSummarizer::new("m", 0.0));
        assert_eq!(
            registry.get(StrategyKind::TokenThreshold).unwrap().kind(),
            StrategyKind::TokenThreshold
        );
        assert_eq!(
            registry.get(StrategyKind::SlidingWindow).unwrap().kind(),
            StrategyKind::SlidingWindow
        );

        let empty = StrategyRegistry::new();
        assert!(matches!(
            empty.get(StrategyKind::SlidingWindow),
            Err(MemoryError::InvalidConfig(_))
        ));
    }
}
