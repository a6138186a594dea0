//! Google Gemini backend (`models/{model}:generateContent`).

use std::time::Duration;

use async_trait::async_trait;
use modsentry_types::SecretString;
use modsentry_types::config::GeminiConfig;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::backend::{Backend, classification_from_answer};
use crate::error::{BackendError, Result};
use crate::http::{build_client, error_for_status};
use crate::types::{Classification, Pricing, Ruleset, estimate_tokens};

pub struct GeminiBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_output_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

impl GeminiBackend {
    pub fn new(config: &GeminiConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
        })
    }

    fn model_url(&self) -> String {
        format!("{}/models/{}", self.base_url, self.model)
    }

    fn generate_url(&self) -> String {
        format!("{}:generateContent", self.model_url())
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn classify(&self, text: &str, ruleset: &Ruleset) -> Result<Classification> {
        let prompt = ruleset.combined_prompt(text);
        let response = self
            .http
            .post(self.generate_url())
            .header("x-goog-api-key", self.api_key.expose())
            .json(&json!({
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                "generationConfig": {
                    "maxOutputTokens": self.max_output_tokens,
                    "temperature": self.temperature,
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_status(self.name(), &self.model, response).await);
        }

        let body = response.text().await?;
        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            BackendError::malformed(format!("unparseable generateContent body: {e}"), &body)
        })?;

        if parsed.candidates.is_empty() {
            let reason = parsed
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason.clone())
                .unwrap_or_else(|| "no candidates".into());
            return Err(BackendError::malformed(
                format!("gemini returned no answer: {reason}"),
                &body,
            ));
        }

        let answer = parsed.text();
        let (input, output) = match &parsed.usage_metadata {
            Some(u) => (u.prompt_token_count, u.candidates_token_count),
            None => (estimate_tokens(&prompt), estimate_tokens(&answer)),
        };
        debug!(
            model = %self.model,
            finish_reason = parsed
                .candidates
                .first()
                .and_then(|c| c.finish_reason.as_deref())
                .unwrap_or("unknown"),
            input_tokens = input,
            output_tokens = output,
            "gemini answer received"
        );

        classification_from_answer(self.name(), &answer, Pricing::GEMINI.usage(input, output))
    }

    async fn check_health(&self) -> Result<()> {
        let response = self
            .http
            .get(self.model_url())
            .header("x-goog-api-key", self.api_key.expose())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for_status(self.name(), &self.model, response).await);
        }
        info!(model = %self.model, "gemini api is accessible");
        Ok(())
    }
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key)
            .finish()
    }
}
