//! Process settings
//!
//! Read once at startup from the environment (after `.env` is loaded)
//! and handed to every component through `AppContext`.

use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::MemoryError;
use crate::models::{validate_max_messages, validate_max_tokens, EffectiveConfig, StrategyKind};
use crate::Result;

pub const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// OpenAI-compatible chat providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    /// Deployment-scoped endpoint under `AZURE_ENDPOINT`
    AzureOpenAi,
    Grok,
    Anthropic,
    OpenRouter,
    Kimi,
    Glm,
    Minimax,
    Together,
    DeepSeek,
}

impl LlmProvider {
    /// `None` for providers whose endpoint is per-tenant
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            LlmProvider::OpenAi => Some("https://api.openai.com/v1"),
            LlmProvider::AzureOpenAi => None,
            LlmProvider::Grok => Some("https://api.x.ai/v1"),
            LlmProvider::Anthropic => Some("https://api.anthropic.com/v1"),
            LlmProvider::OpenRouter => Some("https://openrouter.ai/api/v1"),
            LlmProvider::Kimi => Some("https://api.moonshot.cn/v1"),
            LlmProvider::Glm => Some("https://open.bigmodel.cn/api/paas/v4"),
            LlmProvider::Minimax => Some("https://api.minimax.chat/v1"),
            LlmProvider::Together => Some("https://api.together.xyz/v1"),
            LlmProvider::DeepSeek => Some("https://api.deepseek.com/v1"),
        }
    }
}

impl FromStr for LlmProvider {
    type Err = MemoryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "azure_openai" | "azure" => Ok(LlmProvider::AzureOpenAi),
            "grok" => Ok(LlmProvider::Grok),
            "anthropic" => Ok(LlmProvider::Anthropic),
            "openrouter" => Ok(LlmProvider::OpenRouter),
            "kimi" => Ok(LlmProvider::Kimi),
            "glm" => Ok(LlmProvider::Glm),
            "minimax" => Ok(LlmProvider::Minimax),
            "together" => Ok(LlmProvider::Together),
            "deepseek" => Ok(LlmProvider::DeepSeek),
            other => Err(MemoryError::InvalidConfig(format!(
                "unknown LLM_PROVIDER '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    pub redis_url: Option<String>,
    pub key_prefix: String,

    pub stm_default_strategy: StrategyKind,
    pub stm_max_messages: usize,
    pub stm_max_tokens: usize,
    pub stm_summarization_model: String,
    /// 0 disables expiry refresh
    pub stm_session_ttl_seconds: u64,
    pub stm_token_encoding: Option<String>,

    pub llm_provider: LlmProvider,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_base_url: String,
    pub azure_endpoint: String,
    pub llm_api_version: String,
    pub llm_temperature: f32,
    pub llm_timeout_secs: u64,

    pub port: u16,
}

// Keeps the API key out of logs.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("redis_url", &self.redis_url)
            .field("key_prefix", &self.key_prefix)
            .field("stm_default_strategy", &self.stm_default_strategy)
            .field("stm_max_messages", &self.stm_max_messages)
            .field("stm_max_tokens", &self.stm_max_tokens)
            .field("stm_summarization_model", &self.stm_summarization_model)
            .field("stm_session_ttl_seconds", &self.stm_session_ttl_seconds)
            .field("stm_token_encoding", &self.stm_token_encoding)
            .field("llm_provider", &self.llm_provider)
            .field("llm_api_key", &if self.llm_api_key.is_empty() { "" } else { "***" })
            .field("llm_model", &self.llm_model)
            .field("llm_base_url", &self.llm_base_url)
            .field("azure_endpoint", &self.azure_endpoint)
            .field("llm_api_version", &self.llm_api_version)
            .field("llm_temperature", &self.llm_temperature)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("port", &self.port)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "stm".to_string(),
            stm_default_strategy: StrategyKind::SlidingWindow,
            stm_max_messages: 50,
            stm_max_tokens: 8000,
            stm_summarization_model: String::new(),
            stm_session_ttl_seconds: 86_400,
            stm_token_encoding: None,
            llm_provider: LlmProvider::OpenAi,
            llm_api_key: String::new(),
            llm_model: "gpt-4.1-mini".to_string(),
            llm_base_url: String::new(),
            azure_endpoint: String::new(),
            llm_api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            llm_temperature: 0.1,
            llm_timeout_secs: 60,
            port: 8080,
        }
    }
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    ///
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut settings = Settings::default();

        settings.redis_url = get("REDIS_URL");
        if let Some(prefix) = get("STM_KEY_PREFIX") {
            settings.key_prefix = prefix;
        }
        if let Some(strategy) = get("STM_DEFAULT_STRATEGY") {
            settings.stm_default_strategy = strategy.parse()?;
        }
        if let Some(raw) = get("STM_MAX_MESSAGES") {
            settings.stm_max_messages = parse_number("STM_MAX_MESSAGES", &raw)?;
        }
        if let Some(raw) = get("STM_MAX_TOKENS") {
            settings.stm_max_tokens = parse_number("STM_MAX_TOKENS", &raw)?;
        }
        if let Some(model) = get("STM_SUMMARIZATION_MODEL") {
            settings.stm_summarization_model = model;
        }
        if let Some(raw) = get("STM_SESSION_TTL_SECONDS") {
            settings.stm_session_ttl_seconds = parse_number("STM_SESSION_TTL_SECONDS", &raw)?;
        }
        settings.stm_token_encoding = get("STM_TOKEN_ENCODING");

        if let Some(provider) = get("LLM_PROVIDER") {
            settings.llm_provider = provider.parse()?;
        }
        if let Some(key) = get("LLM_API_KEY") {
            settings.llm_api_key = key;
        }
        if let Some(model) = get("LLM_MODEL") {
            settings.llm_model = model;
        }
        if let Some(url) = get("LLM_BASE_URL") {
            settings.llm_base_url = url;
        }
        if let Some(endpoint) = get("AZURE_ENDPOINT") {
            settings.azure_endpoint = endpoint;
        }
        if let Some(version) = get("LLM_API_VERSION") {
            settings.llm_api_version = version;
        }
        if let Some(raw) = get("LLM_TEMPERATURE") {
            settings.llm_temperature = parse_number("LLM_TEMPERATURE", &raw)?;
        }
        if let Some(raw) = get("LLM_TIMEOUT_SECS") {
            settings.llm_timeout_secs = parse_number("LLM_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = get("PORT").or_else(|| get("API_PORT")) {
            settings.port = parse_number("PORT", &raw)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolved_llm_base_url().is_empty() {
            return Err(MemoryError::InvalidConfig(format!(
                "AZURE_ENDPOINT is required when LLM_PROVIDER={:?}",
                self.llm_provider
            )));
        }
        if self.llm_provider == LlmProvider::AzureOpenAi && self.llm_api_version.is_empty() {
            return Err(MemoryError::InvalidConfig(
                "LLM_API_VERSION must not be empty".to_string(),
            ));
        }
        validate_max_messages(self.stm_max_messages)?;
        validate_max_tokens(self.stm_max_tokens)?;
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(MemoryError::InvalidConfig(format!(
                "LLM_TEMPERATURE must be between 0.0 and 2.0, got {}",
                self.llm_temperature
            )));
        }
        Ok(())
    }

    /// Explicit URL first (`AZURE_ENDPOINT` for Azure), then the provider
    /// table; empty when neither is available.
    pub fn resolved_llm_base_url(&self) -> String {
        let explicit = match self.llm_provider {
            LlmProvider::AzureOpenAi if !self.azure_endpoint.is_empty() => &self.azure_endpoint,
            _ => &self.llm_base_url,
        };
        if explicit.is_empty() {
            self.llm_provider
                .default_base_url()
                .unwrap_or_default()
                .to_string()
        } else {
            explicit.trim_end_matches('/').to_string()
        }
    }

    pub fn resolved_stm_summarization_model(&self) -> &str {
        if self.stm_summarization_model.is_empty() {
            &self.llm_model
        } else {
            &self.stm_summarization_model
        }
    }

    /// Process-wide windowing defaults
    pub fn stm_defaults(&self) -> EffectiveConfig {
        EffectiveConfig {
            strategy: self.stm_default_strategy,
            max_messages: self.stm_max_messages,
            max_tokens: self.stm_max_tokens,
        }
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| MemoryError::InvalidConfig(format!("{} has invalid value '{}'", key, raw)))
}
