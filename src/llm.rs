//! Chat-completions client used for summarization
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol, including the
//! Azure OpenAI deployment-scoped variant.
//! Uses a long-lived reqwest::Client for connection pooling.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::config::{LlmProvider, Settings};
use crate::error::MemoryError;

/// Chat-completions collaborator (mockable in tests)
#[async_trait::async_trait]
pub trait ChatCompletions: Send + Sync {
    async fn complete(&self, request: &ChatCompletionRequest) -> crate::Result<ChatCompletionResponse>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// Content of the first choice; `None` when there are no choices.
    /// A null content reads as an empty string.
    pub fn first_content(&self) -> Option<String> {
        self.choices
            .first()
            .map(|choice| choice.message.content.clone().unwrap_or_default())
    }
}

/// URL and auth layout of the upstream API
#[derive(Debug, Clone, PartialEq, Eq)]
enum Dialect {
    /// `{base}/chat/completions` with a bearer token
    OpenAi,
    /// `{endpoint}/openai/deployments/{model}/chat/completions?api-version=..`
    /// with an `api-key` header; the model names the deployment
    Azure { api_version: String },
}

/// Reusable OpenAI-compatible client (connection-pooled)
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    dialect: Dialect,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> crate::Result<Self> {
        Self::with_dialect(base_url, api_key, timeout, Dialect::OpenAi)
    }

    pub fn azure(
        endpoint: &str,
        api_key: &str,
        api_version: &str,
        timeout: Duration,
    ) -> crate::Result<Self> {
        Self::with_dialect(
            endpoint,
            api_key,
            timeout,
            Dialect::Azure {
                api_version: api_version.to_string(),
            },
        )
    }

    fn with_dialect(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        dialect: Dialect,
    ) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                MemoryError::SummarizerUnavailable(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            dialect,
        })
    }

    pub fn from_settings(settings: &Settings) -> crate::Result<Self> {
        let base_url = settings.resolved_llm_base_url();
        let timeout = Duration::from_secs(settings.llm_timeout_secs);
        match settings.llm_provider {
            LlmProvider::AzureOpenAi => Self::azure(
                &base_url,
                &settings.llm_api_key,
                &settings.llm_api_version,
                timeout,
            ),
            _ => Self::new(&base_url, &settings.llm_api_key, timeout),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        match &self.dialect {
            Dialect::OpenAi => format!("{}/chat/completions", self.base_url),
            Dialect::Azure { .. } => format!(
                "{}/openai/deployments/{}/chat/completions",
                self.base_url, model
            ),
        }
    }

    fn request(&self, request: &ChatCompletionRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.endpoint(&request.model)).json(request);
        match &self.dialect {
            Dialect::OpenAi => {
                if !self.api_key.is_empty() {
                    builder = builder.bearer_auth(&self.api_key);
                }
            }
            Dialect::Azure { api_version } => {
                builder = builder
                    .query(&[("api-version", api_version.as_str())])
                    .header("api-key", &self.api_key);
            }
        }
        builder
    }
}

#[async_trait::async_trait]
impl ChatCompletions for OpenAiClient {
    async fn complete(&self, request: &ChatCompletionRequest) -> crate::Result<ChatCompletionResponse> {
        debug!(model = %request.model, "calling chat completions");

        let response = self.request(request).send().await.map_err(|e| {
            error!("Chat completions request failed: {}", e);
            MemoryError::SummarizerUnavailable(format!("request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Chat completions error response: {}", error_text);
            return Err(MemoryError::SummarizerUnavailable(format!(
                "upstream returned {}: {}",
                status, error_text
            )));
        }

        response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!("Failed to parse chat completions response: {}", e);
            MemoryError::SummarizerUnavailable(format!("unparseable response: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = ChatCompletionRequest {
            model: "gpt-4.1-mini".to_string(),
            messages: vec![
                ChatMessage::system("Summarize."),
                ChatMessage::user("user: hi"),
            ],
            temperature: 0.1,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4.1-mini");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "user: hi");
    }

    #[test]
    fn test_first_content() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "cmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "short summary"}, "finish_reason": "stop"}
            ]
        }))
        .unwrap();
        assert_eq!(response.first_content().as_deref(), Some("short summary"));

        let null_content: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        }))
        .unwrap();
        assert_eq!(null_content.first_content().as_deref(), Some(""));

        let empty: ChatCompletionResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.first_content(), None);
    }

    fn summary_request(model: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user("x")],
            temperature: 0.1,
        }
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let client = OpenAiClient::new("http://localhost:4000/v1/", "", Duration::from_secs(5)).unwrap();
        assert_eq!(client.endpoint("m"), "http://localhost:4000/v1/chat/completions");
    }

    #[test]
    fn test_openai_request_uses_bearer_auth() {
        let client = OpenAiClient::new("https://api.openai.com/v1", "sk-test", Duration::from_secs(5)).unwrap();
        let built = client.request(&summary_request("gpt-4.1-mini")).build().unwrap();

        assert_eq!(built.url().as_str(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(built.headers()["authorization"], "Bearer sk-test");
        assert!(built.headers().get("api-key").is_none());
    }

    #[test]
    fn test_azure_request_targets_deployment() {
        let client = OpenAiClient::azure(
            "https://acme.openai.azure.com/",
            "az-key",
            "2024-10-21",
            Duration::from_secs(5),
        )
        .unwrap();
        let built = client.request(&summary_request("summarizer-deploy")).build().unwrap();

        assert_eq!(
            built.url().as_str(),
            "https://acme.openai.azure.com/openai/deployments/summarizer-deploy/chat/completions?api-version=2024-10-21"
        );
        assert_eq!(built.headers()["api-key"], "az-key");
        assert!(built.headers().get("authorization").is_none());
    }

    #[test]
    fn test_from_settings_selects_dialect() {
        let settings = Settings {
            llm_provider: LlmProvider::AzureOpenAi,
            azure_endpoint: "https://acme.openai.azure.com".to_string(),
            ..Settings::default()
        };
        let client = OpenAiClient::from_settings(&settings).unwrap();
        assert_eq!(
            client.dialect,
            Dialect::Azure {
                api_version: "2024-10-21".to_string()
            }
        );
        assert_eq!(
            client.endpoint("gpt-4.1-mini"),
            "https://acme.openai.azure.com/openai/deployments/gpt-4.1-mini/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_summarizer_unavailable() {
        let client = OpenAiClient::new("http://127.0.0.1:1/v1", "key", Duration::from_secs(2)).unwrap();
        let request = ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::user("x")],
            temperature: 0.0,
        };
        let err = client.complete(&request).await.unwrap_err();
        assert!(matches!(err, MemoryError::SummarizerUnavailable(_)));
    }
}
