//! Per-session windowing overrides
//!
//! Lives under its own key, independent of the message log: a session can
//! have a config without messages and vice versa.

use std::sync::Arc;

use tracing::debug;

use super::backend::StoreBackend;
use super::keys::SessionKeys;
use crate::error::MemoryError;
use crate::models::{EffectiveConfig, SessionConfig, StrategyKind};
use crate::Result;

pub struct SessionConfigStore {
    backend: Arc<dyn StoreBackend>,
    keys: SessionKeys,
    ttl_seconds: u64,
}

impl SessionConfigStore {
    pub fn new(backend: Arc<dyn StoreBackend>, keys: SessionKeys, ttl_seconds: u64) -> Self {
        Self {
            backend,
            keys,
            ttl_seconds,
        }
    }

    async fn touch_ttl(&self, key: &str) -> Result<()> {
        if self.ttl_seconds > 0 && self.backend.supports_expiry() {
            self.backend.expire(key, self.ttl_seconds).await?;
        }
        Ok(())
    }

    /// Stored override, if any. Refreshes the key's TTL when present.
    pub async fn load(&self, session_id: &str) -> Result<Option<SessionConfig>> {
        let key = self.keys.config(session_id);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };

        self.touch_ttl(&key).await?;
        let config = serde_json::from_str::<SessionConfig>(&raw)
            .map_err(|e| MemoryError::corrupt(&key, e))?;
        Ok(Some(config))
    }

    /// Stored override merged field by field over `defaults`
    pub async fn get(&self, session_id: &str, defaults: &EffectiveConfig) -> Result<EffectiveConfig> {
        Ok(match self.load(session_id).await? {
            Some(config) => config.resolve(defaults),
            None => *defaults,
        })
    }

    /// Validate and persist an override. An unset strategy is stored as
    /// `default_strategy`; the other fields stay unset.
    pub async fn set(
        &self,
        session_id: &str,
        config: SessionConfig,
        default_strategy: StrategyKind,
    ) -> Result<SessionConfig> {
        config.validate()?;

        let stored = SessionConfig {
            strategy: Some(config.strategy.unwrap_or(default_strategy)),
            ..config
        };
        let key = self.keys.config(session_id);
        self.backend.set(&key, &serde_json::to_string(&stored)?).await?;
        self.touch_ttl(&key).await?;

        debug!(session_id, strategy = ?stored.strategy, "session config stored");
        Ok(stored)
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.backend.delete(&[self.keys.config(session_id)]).await
    }
}
