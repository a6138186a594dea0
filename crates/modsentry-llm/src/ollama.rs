//! Local Ollama backend (`/api/generate`).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use modsentry_types::config::OllamaConfig;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::backend::{Backend, classification_from_answer};
use crate::error::{BackendError, Result};
use crate::http::{build_client, error_for_status};
use crate::types::{Classification, Pricing, Ruleset, estimate_tokens};

/// Talks to a local Ollama server. Free to call, so usage carries no cost.
pub struct OllamaBackend {
    http: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaBackend {
    pub fn new(config: &OllamaConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            url: config.url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.url)
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn classify(&self, text: &str, ruleset: &Ruleset) -> Result<Classification> {
        let prompt = ruleset.combined_prompt(text);
        let started = Instant::now();

        let response = self
            .http
            .post(self.generate_url())
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_status(self.name(), &self.model, response).await);
        }

        let body = response.text().await?;
        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::malformed(format!("unparseable generate body: {e}"), &body))?;

        let input = parsed
            .prompt_eval_count
            .unwrap_or_else(|| estimate_tokens(&prompt));
        let output = parsed
            .eval_count
            .unwrap_or_else(|| estimate_tokens(&parsed.response));

        debug!(
            model = %self.model,
            latency_ms = started.elapsed().as_millis() as u64,
            input_tokens = input,
            output_tokens = output,
            "ollama answer received"
        );

        classification_from_answer(self.name(), &parsed.response, Pricing::FREE.usage(input, output))
    }

    async fn check_health(&self) -> Result<()> {
        let response = self.http.get(self.tags_url()).send().await.map_err(|e| {
            BackendError::Unavailable(format!("cannot reach ollama at {}: {e}", self.url))
        })?;
        if !response.status().is_success() {
            return Err(error_for_status(self.name(), &self.model, response).await);
        }
        let tags: TagsResponse = response.json().await?;
        let names: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
        if !names.iter().any(|n| n.contains(self.model.as_str())) {
            return Err(BackendError::FatalConfig(format!(
                "model '{}' not found; available models: {}",
                self.model,
                names.join(", ")
            )));
        }
        info!(model = %self.model, "ollama model is available");
        Ok(())
    }
}

impl std::fmt::Debug for OllamaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaBackend")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> OllamaConfig {
        OllamaConfig {
            url: url.into(),
            model: "gemma3:latest".into(),
        }
    }

    #[test]
    fn urls_strip_trailing_slash() {
        let b = OllamaBackend::new(&config("http://localhost:11434/"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(b.generate_url(), "http://localhost:11434/api/generate");
        assert_eq!(b.tags_url(), "http://localhost:11434/api/tags");
    }

    #[test]
    fn generate_response_tolerates_missing_counts() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"model":"m","response":"DECISION: KEEP","done":true}"#)
                .unwrap();
        assert_eq!(parsed.response, "DECISION: KEEP");
        assert!(parsed.eval_count.is_none());
    }
}
