//! The [`Backend`] trait and the startup factory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use modsentry_types::config::{BackendConfig, BackendKind};
use modsentry_types::Usage;
use tracing::{debug, info};

use crate::decision::extract_decision;
use crate::error::{BackendError, Result};
use crate::gemini::GeminiBackend;
use crate::ollama::OllamaBackend;
use crate::openai_compat::OpenAiCompatBackend;
use crate::types::{Classification, Ruleset};

/// A classifier that turns item text into an ACT/NO_ACT verdict.
///
/// Implementations handle the protocol details of one provider and map every
/// failure onto [`BackendError`]. They do not retry: retry/backoff is applied
/// uniformly by the pipeline.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Provider name as recorded in audit records ("ollama", "gemini", ...).
    fn name(&self) -> &str;

    /// Classify `text` against `ruleset`.
    async fn classify(&self, text: &str, ruleset: &Ruleset) -> Result<Classification>;

    /// Cheap reachability/credential check, run once at startup.
    async fn check_health(&self) -> Result<()>;
}

/// Build the configured backend.
///
/// Missing credentials are reported as [`BackendError::FatalConfig`], which
/// aborts startup.
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn Backend>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    info!(provider = %config.provider, "building analysis backend");
    let backend: Arc<dyn Backend> = match config.provider {
        BackendKind::Ollama => Arc::new(OllamaBackend::new(&config.ollama, timeout)?),
        BackendKind::Gemini => {
            if config.gemini.api_key.is_empty() {
                return Err(BackendError::FatalConfig(
                    "gemini api key is not set (GEMINI_API_KEY)".into(),
                ));
            }
            Arc::new(GeminiBackend::new(&config.gemini, timeout)?)
        }
        BackendKind::Deepseek => {
            if config.deepseek.api_key.is_empty() {
                return Err(BackendError::FatalConfig(
                    "deepseek api key is not set (DEEPSEEK_API_KEY)".into(),
                ));
            }
            Arc::new(OpenAiCompatBackend::deepseek(&config.deepseek, timeout)?)
        }
    };
    Ok(backend)
}

/// Turn a model answer into a [`Classification`].
pub(crate) fn classification_from_answer(
    provider: &str,
    answer: &str,
    usage: Usage,
) -> Result<Classification> {
    if answer.trim().is_empty() {
        return Err(BackendError::malformed("empty answer", answer));
    }
    let decision = extract_decision(answer)
        .ok_or_else(|| BackendError::malformed("no decision found in answer", answer))?;
    debug!(provider, decision = ?decision, "decision extracted");
    Ok(Classification {
        verdict: decision.verdict(),
        reasoning: answer.trim().to_owned(),
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use modsentry_types::VerdictKind;

    #[test]
    fn missing_cloud_keys_are_fatal() {
        let mut cfg = BackendConfig::default();
        cfg.provider = BackendKind::Deepseek;
        let err = build_backend(&cfg).err().unwrap();
        assert_eq!(err.class(), FailureClass::FatalConfig);

        cfg.provider = BackendKind::Gemini;
        let err = build_backend(&cfg).err().unwrap();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn builds_each_variant() {
        let mut cfg = BackendConfig::default();
        cfg.provider = BackendKind::Ollama;
        assert_eq!(build_backend(&cfg).unwrap().name(), "ollama");

        cfg.provider = BackendKind::Gemini;
        cfg.gemini.api_key = "g".into();
        assert_eq!(build_backend(&cfg).unwrap().name(), "gemini");

        cfg.provider = BackendKind::Deepseek;
        cfg.deepseek.api_key = "d".into();
        assert_eq!(build_backend(&cfg).unwrap().name(), "deepseek");
    }

    #[test]
    fn answer_mapping() {
        let c = classification_from_answer("p", "Spam.\nDECISION: REMOVE\n", Usage::default())
            .unwrap();
        assert_eq!(c.verdict, VerdictKind::Act);
        assert_eq!(c.reasoning, "Spam.\nDECISION: REMOVE");

        let err = classification_from_answer("p", "   ", Usage::default()).unwrap_err();
        assert_eq!(err.class(), FailureClass::Malformed);

        let err = classification_from_answer("p", "no idea", Usage::default()).unwrap_err();
        match err {
            BackendError::Malformed { excerpt, .. } => assert_eq!(excerpt, "no idea"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
