//! OpenAI-compatible chat-completions backend.
//!
//! Used for DeepSeek; any endpoint that accepts the OpenAI request format
//! works by changing the base URL.

use std::time::Duration;

use async_trait::async_trait;
use modsentry_types::SecretString;
use modsentry_types::config::DeepSeekConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{Backend, classification_from_answer};
use crate::error::{BackendError, Result};
use crate::http::{build_client, error_for_status};
use crate::types::{Classification, Pricing, Ruleset, estimate_tokens};

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
}

pub struct OpenAiCompatBackend {
    name: String,
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    params: SamplingParams,
    pricing: Pricing,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(flatten)]
    params: SamplingParams,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenAiCompatBackend {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: SecretString,
        model: impl Into<String>,
        params: SamplingParams,
        pricing: Pricing,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            http: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            model: model.into(),
            params,
            pricing,
        })
    }

    /// DeepSeek with its configured model and sampling parameters.
    pub fn deepseek(config: &DeepSeekConfig, timeout: Duration) -> Result<Self> {
        Self::new(
            "deepseek",
            &config.base_url,
            config.api_key.clone(),
            config.model.clone(),
            SamplingParams {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                top_p: config.top_p,
                frequency_penalty: config.frequency_penalty,
                presence_penalty: config.presence_penalty,
            },
            Pricing::DEEPSEEK,
            timeout,
        )
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(&self, text: &str, ruleset: &Ruleset) -> Result<Classification> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: ruleset.prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            params: self.params,
        };

        debug!(provider = %self.name, model = %self.model, "sending chat completion request");

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_status(&self.name, &self.model, response).await);
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            BackendError::malformed(format!("unparseable chat completion body: {e}"), &body)
        })?;

        let answer = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| BackendError::malformed("response has no choices", &body))?;

        let (input, output) = match &parsed.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => (
                estimate_tokens(ruleset.prompt()) + estimate_tokens(text),
                estimate_tokens(&answer),
            ),
        };
        let usage = self.pricing.usage(input, output);
        debug!(
            provider = %self.name,
            input_tokens = input,
            output_tokens = output,
            cost = usage.estimated_cost,
            "chat completion response received"
        );

        classification_from_answer(&self.name, &answer, usage)
    }

    async fn check_health(&self) -> Result<()> {
        let response = self
            .http
            .get(self.models_url())
            .bearer_auth(self.api_key.expose())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for_status(&self.name, &self.model, response).await);
        }
        let models: ModelList = response.json().await?;
        if !models.data.is_empty() && !models.data.iter().any(|m| m.id == self.model) {
            return Err(BackendError::FatalConfig(format!(
                "model '{}' is not offered by {}",
                self.model, self.name
            )));
        }
        info!(provider = %self.name, model = %self.model, "api is accessible");
        Ok(())
    }
}

impl std::fmt::Debug for OpenAiCompatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatBackend")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> OpenAiCompatBackend {
        let cfg = DeepSeekConfig {
            api_key: "sk-test".into(),
            base_url: base.into(),
            ..DeepSeekConfig::default()
        };
        OpenAiCompatBackend::deepseek(&cfg, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn urls() {
        let b = backend("https://api.deepseek.com/");
        assert_eq!(b.completions_url(), "https://api.deepseek.com/chat/completions");
        assert_eq!(b.models_url(), "https://api.deepseek.com/models");
    }

    #[test]
    fn request_carries_sampling_params() {
        let b = backend("https://api.deepseek.com");
        let req = ChatRequest {
            model: &b.model,
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            params: b.params,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "deepseek-chat");
        assert_eq!(v["max_tokens"], 1000);
        assert_eq!(v["top_p"], 0.9);
        assert_eq!(v["frequency_penalty"], 0.5);
        assert_eq!(v["presence_penalty"], 0.0);
    }

    #[test]
    fn debug_redacts_key() {
        let dbg = format!("{:?}", backend("https://x"));
        assert!(!dbg.contains("sk-test"));
        assert!(dbg.contains("REDACTED"));
    }
}
