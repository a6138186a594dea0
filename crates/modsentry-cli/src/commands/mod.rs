//! CLI command implementations for `modsentry`.
//!
//! - [`run`] -- The long-running moderation service.
//! - [`status`] -- Read-only view of durable state.
//! - [`check`] -- Backend health probe.
//! - [`checkpoint`] -- Show or reset the poll checkpoint.
//! - [`audit`] -- Audit log inspection.
//! - [`wiki`] -- Wiki removal log status, publish and reset.

pub mod audit;
pub mod check;
pub mod checkpoint;
pub mod run;
pub mod status;
pub mod wiki;

use std::path::{Path, PathBuf};

use modsentry_types::Config;

/// Environment variable naming an explicit config file.
const CONFIG_ENV: &str = "MODSENTRY_CONFIG";

/// Load configuration from the given path override or via auto-discovery.
///
/// Discovery order:
/// 1. `config_override` (the `--config` flag); must exist
/// 2. `MODSENTRY_CONFIG` env var
/// 3. `~/.modsentry/config.json`
///
/// Falls back to defaults when no file is found. Environment overrides
/// (`REDDIT_*`, `GEMINI_API_KEY`, `SAFE_MODE`, ...) are applied last.
pub fn load_config(config_override: Option<&str>) -> anyhow::Result<Config> {
    let mut config = match config_override {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!("config file not found: {path_str}");
            }
            read_config(path)?
        }
        None => match config_path() {
            Some(path) => read_config(&path)?,
            None => {
                tracing::debug!("no config file found, using defaults");
                Config::default()
            }
        },
    };

    config
        .apply_env_overrides()
        .map_err(|e| anyhow::anyhow!("invalid environment override: {e}"))?;
    Ok(config)
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Discover the config file path, if one exists.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV)
        && !env_path.trim().is_empty()
    {
        let p = PathBuf::from(env_path);
        return p.exists().then_some(p);
    }
    let home = dirs::home_dir()?;
    let p = home.join(".modsentry").join("config.json");
    p.exists().then_some(p)
}
