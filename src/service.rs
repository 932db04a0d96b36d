//! Short-term memory service
//!
//! `AppContext` is built once at startup and holds every shared client.
//! `ShortTermMemory` is the operation surface the HTTP layer maps onto.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Settings;
use crate::llm::{ChatCompletions, OpenAiClient};
use crate::memory::{
    ContextSummarizer, InMemoryBackend, MessageStore, RedisBackend, SessionConfigStore,
    SessionKeys, StoreBackend, StrategyRegistry, TokenCounter,
};
use crate::models::{Context, EffectiveConfig, Message, SessionConfig, StoredMessage};
use crate::Result;

pub struct ShortTermMemory {
    messages: MessageStore,
    configs: SessionConfigStore,
    strategies: StrategyRegistry,
    summarizer: Arc<dyn ChatCompletions>,
    defaults: EffectiveConfig,
}

impl ShortTermMemory {
    pub fn new(
        messages: MessageStore,
        configs: SessionConfigStore,
        strategies: StrategyRegistry,
        summarizer: Arc<dyn ChatCompletions>,
        defaults: EffectiveConfig,
    ) -> Self {
        Self {
            messages,
            configs,
            strategies,
            summarizer,
            defaults,
        }
    }

    pub fn defaults(&self) -> &EffectiveConfig {
        &self.defaults
    }

    pub async fn append(&self, session_id: &str, messages: Vec<Message>) -> Result<Vec<StoredMessage>> {
        self.messages.append(session_id, messages).await
    }

    /// Bounded context under the session's effective configuration
    pub async fn context(&self, session_id: &str) -> Result<Context> {
        let config = self.configs.get(session_id, &self.defaults).await?;
        let strategy = self.strategies.get(config.strategy)?;
        strategy
            .apply(&self.messages, session_id, self.summarizer.as_ref(), &config)
            .await
    }

    pub async fn list(&self, session_id: &str, limit: Option<i64>) -> Result<Vec<StoredMessage>> {
        self.messages.list(session_id, limit).await
    }

    pub async fn count(&self, session_id: &str) -> Result<usize> {
        self.messages.count(session_id).await
    }

    /// Drop the log and the config override
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.messages.delete(session_id).await?;
        self.configs.delete(session_id).await?;
        info!(session_id, "session deleted");
        Ok(())
    }

    /// Store an override and return the configuration now in effect
    pub async fn set_config(&self, session_id: &str, config: SessionConfig) -> Result<EffectiveConfig> {
        let stored = self
            .configs
            .set(session_id, config, self.defaults.strategy)
            .await?;
        Ok(stored.resolve(&self.defaults))
    }

    pub async fn config(&self, session_id: &str) -> Result<EffectiveConfig> {
        self.configs.get(session_id, &self.defaults).await
    }
}

/// Process-wide state, constructed once and shared by reference
pub struct AppContext {
    pub settings: Settings,
    pub memory: ShortTermMemory,
}

impl AppContext {
    /// Wire the production collaborators described by `settings`
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let backend: Arc<dyn StoreBackend> = match settings.redis_url.as_deref() {
            Some(url) => {
                info!("Session store backend: redis");
                Arc::new(RedisBackend::new(url)?)
            }
            None => {
                warn!("REDIS_URL not set; session store backend: in-memory (not shared, not durable)");
                Arc::new(InMemoryBackend::new())
            }
        };
        let summarizer: Arc<dyn ChatCompletions> = Arc::new(OpenAiClient::from_settings(&settings)?);

        Self::with_parts(settings, backend, summarizer)
    }

    /// Wire the service around caller-supplied store and summarizer
    pub fn with_parts(
        settings: Settings,
        backend: Arc<dyn StoreBackend>,
        summarizer: Arc<dyn ChatCompletions>,
    ) -> Result<Self> {
        settings.validate()?;

        let keys = SessionKeys::new(settings.key_prefix.clone());
        let tokens = TokenCounter::new(
            settings.stm_token_encoding.as_deref(),
            Some(settings.resolved_stm_summarization_model()),
        )?;
        info!(encoding = tokens.encoding(), "token counter ready");

        let messages = MessageStore::new(
            backend.clone(),
            tokens,
            keys.clone(),
            settings.stm_session_ttl_seconds,
        );
        let configs = SessionConfigStore::new(backend, keys, settings.stm_session_ttl_seconds);
        let strategies = StrategyRegistry::with_defaults(ContextSummarizer::new(
            settings.resolved_stm_summarization_model(),
            settings.llm_temperature,
        ));

        let memory = ShortTermMemory::new(
            messages,
            configs,
            strategies,
            summarizer,
            settings.stm_defaults(),
        );

        Ok(Self { settings, memory })
    }
}
