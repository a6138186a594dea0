//! Configuration schema.
//!
//! All structs accept both `snake_case` and `camelCase` field names via
//! `#[serde(alias)]`, and every field has a default so a partial file (or no
//! file at all, with credentials supplied through the environment) is valid
//! input. Unknown fields are ignored.
//!
//! The loaded [`Config`] is immutable for the life of the process and is
//! passed explicitly to each component constructor.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::secret::SecretString;

pub(crate) fn default_true() -> bool {
    true
}

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration for a modsentry process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Content source (Reddit account and subreddit).
    #[serde(default)]
    pub source: SourceConfig,

    /// Analysis backend selection and per-provider settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Poll cadence.
    #[serde(default)]
    pub poll: PollConfig,

    /// Outbound backend call budget.
    #[serde(default, alias = "rateLimit")]
    pub rate_limit: RateLimitConfig,

    /// Retry/backoff policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Where durable state lives.
    #[serde(default)]
    pub state: StateConfig,

    /// Moderation behaviour (safe mode, whitelist).
    #[serde(default)]
    pub moderation: ModerationConfig,

    /// Public removal log on a subreddit wiki page.
    #[serde(default)]
    pub wiki: WikiConfig,
}

impl Config {
    /// Check that everything needed to run the service is present and sane.
    ///
    /// Missing fields are reported together so an operator can fix them in
    /// one go.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        let s = &self.source;
        if s.client_id.is_empty() {
            missing.push("source.client_id".to_owned());
        }
        if s.client_secret.is_empty() {
            missing.push("source.client_secret".to_owned());
        }
        if s.username.is_empty() {
            missing.push("source.username".to_owned());
        }
        if s.password.is_empty() {
            missing.push("source.password".to_owned());
        }
        if s.user_agent.is_empty() {
            missing.push("source.user_agent".to_owned());
        }
        if s.subreddit.is_empty() {
            missing.push("source.subreddit".to_owned());
        }
        match self.backend.provider {
            BackendKind::Gemini if self.backend.gemini.api_key.is_empty() => {
                missing.push("backend.gemini.api_key".to_owned());
            }
            BackendKind::Deepseek if self.backend.deepseek.api_key.is_empty() => {
                missing.push("backend.deepseek.api_key".to_owned());
            }
            _ => {}
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        self.validate_values()
    }

    /// Value checks that do not involve credentials.
    ///
    /// Used on its own by commands that never talk to the source (`status`,
    /// `checkpoint`, `audit`).
    pub fn validate_values(&self) -> Result<(), ConfigError> {
        if self.poll.interval_secs == 0 {
            return Err(invalid("poll.interval_secs", "must be greater than zero"));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(invalid("retry.base_delay_ms", "must be greater than zero"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid(
                "retry.max_delay_ms",
                "must not be smaller than retry.base_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_fraction) {
            return Err(invalid("retry.jitter_fraction", "must be within 0.0..=1.0"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(invalid("backend.timeout_secs", "must be greater than zero"));
        }
        if self.wiki.enabled {
            if self.wiki.page.trim().is_empty() {
                return Err(invalid("wiki.page", "must not be empty"));
            }
            if self.wiki.update_threshold == 0 {
                return Err(invalid("wiki.update_threshold", "must be greater than zero"));
            }
        }
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides using an arbitrary lookup (the process environment in
    /// production, a map in tests). Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("REDDIT_CLIENT_ID") {
            self.source.client_id = v;
        }
        if let Some(v) = get("REDDIT_CLIENT_SECRET") {
            self.source.client_secret = v.into();
        }
        if let Some(v) = get("REDDIT_USERNAME") {
            self.source.username = v;
        }
        if let Some(v) = get("REDDIT_PASSWORD") {
            self.source.password = v.into();
        }
        if let Some(v) = get("REDDIT_USER_AGENT") {
            self.source.user_agent = v;
        }
        if let Some(v) = get("SUBREDDIT_TO_MONITOR") {
            self.source.subreddit = v;
        }

        if let Some(v) = get("LLM_PROVIDER") {
            self.backend.provider = v.parse()?;
        }
        if let Some(v) = get("OLLAMA_URL") {
            self.backend.ollama.url = v;
        }
        if let Some(v) = get("OLLAMA_MODEL") {
            self.backend.ollama.model = v;
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.backend.gemini.api_key = v.into();
        }
        if let Some(v) = get("GEMINI_MODEL") {
            self.backend.gemini.model = v;
        }
        if let Some(v) = get("DEEPSEEK_API_KEY") {
            self.backend.deepseek.api_key = v.into();
        }
        if let Some(v) = get("DEEPSEEK_MODEL") {
            self.backend.deepseek.model = v;
        }

        if let Some(v) = get("SAFE_MODE") {
            self.moderation.safe_mode = parse_bool("SAFE_MODE", &v)?;
        }
        if let Some(v) = get("MODERATOR_USERNAME") {
            self.moderation.moderator_username = Some(v);
        }

        if let Some(v) = get("WIKI_TRANSPARENCY_ENABLED") {
            self.wiki.enabled = parse_bool("WIKI_TRANSPARENCY_ENABLED", &v)?;
        }
        if let Some(v) = get("WIKI_PAGE_NAME") {
            self.wiki.page = v;
        }
        if let Some(v) = get("WIKI_AUTO_UPDATE_THRESHOLD") {
            self.wiki.update_threshold = parse_number("WIKI_AUTO_UPDATE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("WIKI_RATE_LIMIT_DELAY") {
            self.wiki.min_update_interval_secs = parse_number("WIKI_RATE_LIMIT_DELAY", &v)?;
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(invalid(field, &format!("expected a boolean, got '{other}'"))),
    }
}

fn parse_number<T: FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(field, &format!("expected a number, got '{}'", raw.trim())))
}

/// Expand a leading `~/` to the home directory.
fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

// ── Source ───────────────────────────────────────────────────────────────

/// Reddit account, app credentials and the monitored subreddit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default, alias = "clientId")]
    pub client_id: String,

    #[serde(default, alias = "clientSecret")]
    pub client_secret: SecretString,

    /// Bot account name. Comments by this account are never analyzed.
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: SecretString,

    #[serde(default, alias = "userAgent")]
    pub user_agent: String,

    /// Subreddit name without the `r/` prefix.
    #[serde(default)]
    pub subreddit: String,

    /// Host for the OAuth token endpoint.
    #[serde(default = "default_auth_base_url", alias = "authBaseUrl")]
    pub auth_base_url: String,

    /// Host for authenticated API calls.
    #[serde(default = "default_api_base_url", alias = "apiBaseUrl")]
    pub api_base_url: String,

    /// Page size for comment listings (Reddit caps it at 100).
    #[serde(default = "default_fetch_limit", alias = "fetchLimit")]
    pub fetch_limit: u32,

    /// Per-request timeout.
    #[serde(default = "default_source_timeout", alias = "timeoutSecs")]
    pub timeout_secs: u64,
}

fn default_auth_base_url() -> String {
    "https://www.reddit.com".into()
}
fn default_api_base_url() -> String {
    "https://oauth.reddit.com".into()
}
fn default_fetch_limit() -> u32 {
    100
}
fn default_source_timeout() -> u64 {
    30
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: SecretString::default(),
            username: String::new(),
            password: SecretString::default(),
            user_agent: String::new(),
            subreddit: String::new(),
            auth_base_url: default_auth_base_url(),
            api_base_url: default_api_base_url(),
            fetch_limit: default_fetch_limit(),
            timeout_secs: default_source_timeout(),
        }
    }
}

// ── Backend ──────────────────────────────────────────────────────────────

/// The closed set of analysis backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local Ollama server.
    Ollama,
    /// Google Gemini API.
    Gemini,
    /// DeepSeek (OpenAI-compatible chat completions).
    #[default]
    Deepseek,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Gemini => "gemini",
            Self::Deepseek => "deepseek",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "gemini" => Ok(Self::Gemini),
            "deepseek" => Ok(Self::Deepseek),
            other => Err(invalid(
                "backend.provider",
                &format!("unknown provider '{other}' (expected ollama, gemini or deepseek)"),
            )),
        }
    }
}

/// Backend selection plus settings for every variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Which backend to build at startup.
    #[serde(default)]
    pub provider: BackendKind,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub deepseek: DeepSeekConfig,

    /// Per-call timeout for `classify`. A timeout counts as unavailable.
    #[serde(default = "default_backend_timeout", alias = "timeoutSecs")]
    pub timeout_secs: u64,

    /// Replacement ruleset prompt. The built-in moderation prompt is used
    /// when absent.
    #[serde(default)]
    pub ruleset: Option<String>,
}

fn default_backend_timeout() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: BackendKind::default(),
            ollama: OllamaConfig::default(),
            gemini: GeminiConfig::default(),
            deepseek: DeepSeekConfig::default(),
            timeout_secs: default_backend_timeout(),
            ruleset: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}
fn default_ollama_model() -> String {
    "gemma3:latest".into()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_ollama_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default, alias = "apiKey")]
    pub api_key: SecretString,

    #[serde(default = "default_gemini_model")]
    pub model: String,

    #[serde(default = "default_gemini_base_url", alias = "baseUrl")]
    pub base_url: String,

    #[serde(default = "default_max_output_tokens", alias = "maxOutputTokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".into()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_max_output_tokens() -> u32 {
    1000
}
fn default_temperature() -> f64 {
    0.1
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: SecretString::default(),
            model: default_gemini_model(),
            base_url: default_gemini_base_url(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// DeepSeek chat-completions settings. The sampling defaults are tuned for
/// terse, deterministic moderation answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepSeekConfig {
    #[serde(default, alias = "apiKey")]
    pub api_key: SecretString,

    #[serde(default = "default_deepseek_model")]
    pub model: String,

    #[serde(default = "default_deepseek_base_url", alias = "baseUrl")]
    pub base_url: String,

    #[serde(default = "default_max_output_tokens", alias = "maxTokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_top_p", alias = "topP")]
    pub top_p: f64,

    #[serde(default = "default_frequency_penalty", alias = "frequencyPenalty")]
    pub frequency_penalty: f64,

    #[serde(default, alias = "presencePenalty")]
    pub presence_penalty: f64,
}

fn default_deepseek_model() -> String {
    "deepseek-chat".into()
}
fn default_deepseek_base_url() -> String {
    "https://api.deepseek.com".into()
}
fn default_top_p() -> f64 {
    0.9
}
fn default_frequency_penalty() -> f64 {
    0.5
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            api_key: SecretString::default(),
            model: default_deepseek_model(),
            base_url: default_deepseek_base_url(),
            max_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            frequency_penalty: default_frequency_penalty(),
            presence_penalty: 0.0,
        }
    }
}

// ── Poll / rate limit / retry ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Fixed interval between poll ticks.
    #[serde(default = "default_poll_interval", alias = "intervalSecs")]
    pub interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    60
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
        }
    }
}

/// Ceilings on outbound backend calls. `0` disables a window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_minute", alias = "perMinute")]
    pub per_minute: u32,

    #[serde(default = "default_per_hour", alias = "perHour")]
    pub per_hour: u32,
}

fn default_per_minute() -> u32 {
    60
}
fn default_per_hour() -> u32 {
    3600
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
        }
    }
}

/// Exponential backoff shared by backend retries (via the queue) and the
/// bounded in-place retries of source calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backend retries before an item is finalized as SKIP.
    #[serde(default = "default_max_attempts", alias = "maxAttempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms", alias = "baseDelayMs")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms", alias = "maxDelayMs")]
    pub max_delay_ms: u64,

    /// Random jitter added on top of each delay, as a fraction of it.
    #[serde(default, alias = "jitterFraction")]
    pub jitter_fraction: f64,

    /// In-place retries for source calls (fetch, remove).
    #[serde(default = "default_max_attempts", alias = "sourceMaxRetries")]
    pub source_max_retries: u32,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_fraction: 0.0,
            source_max_retries: default_max_attempts(),
        }
    }
}

// ── State ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding `checkpoint.json`, `queue.json` and `audit.jsonl`.
    #[serde(default = "default_state_dir")]
    pub dir: String,

    /// Attempts for each durable snapshot write before giving up.
    #[serde(default = "default_write_attempts", alias = "writeAttempts")]
    pub write_attempts: u32,
}

fn default_state_dir() -> String {
    "~/.modsentry/state".into()
}
fn default_write_attempts() -> u32 {
    3
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            write_attempts: default_write_attempts(),
        }
    }
}

impl StateConfig {
    /// The state directory with `~/` expanded.
    pub fn dir_path(&self) -> PathBuf {
        expand_home(&self.dir)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir_path().join("checkpoint.json")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.dir_path().join("queue.json")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.dir_path().join("audit.jsonl")
    }

    pub fn wiki_path(&self) -> PathBuf {
        self.dir_path().join("wiki.json")
    }
}

// ── Moderation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Log what would be removed without touching the source.
    #[serde(default = "default_true", alias = "safeMode")]
    pub safe_mode: bool,

    /// Authors whose comments are never analyzed.
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,

    /// Human moderator account, implicitly whitelisted.
    #[serde(default, alias = "moderatorUsername")]
    pub moderator_username: Option<String>,

    /// Per-call timeout for applying an action.
    #[serde(default = "default_action_timeout", alias = "actionTimeoutSecs")]
    pub action_timeout_secs: u64,
}

fn default_whitelist() -> Vec<String> {
    vec!["AutoModerator".into()]
}
fn default_action_timeout() -> u64 {
    30
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            safe_mode: true,
            whitelist: default_whitelist(),
            moderator_username: None,
            action_timeout_secs: default_action_timeout(),
        }
    }
}

impl ModerationConfig {
    /// Whether `author` is exempt from moderation (case-insensitive).
    pub fn is_whitelisted(&self, author: &str) -> bool {
        self.whitelist
            .iter()
            .chain(self.moderator_username.iter())
            .any(|w| w.eq_ignore_ascii_case(author))
    }
}

// ── Wiki ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiConfig {
    /// Keep a public log of removed comments on a wiki page.
    #[serde(default)]
    pub enabled: bool,

    /// Wiki page name under the monitored subreddit.
    #[serde(default = "default_wiki_page")]
    pub page: String,

    /// Removals collected before the page is republished.
    #[serde(default = "default_wiki_threshold", alias = "updateThreshold")]
    pub update_threshold: u32,

    /// Minimum time between automatic page edits.
    #[serde(default = "default_wiki_interval", alias = "minUpdateIntervalSecs")]
    pub min_update_interval_secs: u64,

    /// Entries kept in the local log and shown on the page, newest first.
    #[serde(default = "default_wiki_max_entries", alias = "maxEntries")]
    pub max_entries: usize,
}

fn default_wiki_page() -> String {
    "removed_comments".into()
}
fn default_wiki_threshold() -> u32 {
    10
}
fn default_wiki_interval() -> u64 {
    60
}
fn default_wiki_max_entries() -> usize {
    500
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            page: default_wiki_page(),
            update_threshold: default_wiki_threshold(),
            min_update_interval_secs: default_wiki_interval(),
            max_entries: default_wiki_max_entries(),
        }
    }
}
