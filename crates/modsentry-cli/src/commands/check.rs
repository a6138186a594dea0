//! `modsentry check` -- probe the configured analysis backend.

use modsentry_llm::{BackendError, FailureClass, build_backend};
use modsentry_types::Config;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let backend = build_backend(&config.backend)?;
    println!("Checking {} backend...", backend.name());

    match backend.check_health().await {
        Ok(()) => {
            println!("  OK: {} is reachable and configured", backend.name());
            Ok(())
        }
        Err(e) => {
            let hint = match (&e, e.class()) {
                (BackendError::RateLimited { .. }, _) => "provider is throttling, try again later",
                (_, FailureClass::FatalConfig) => "fix the configuration before running",
                (_, FailureClass::Malformed) => "provider answered with an unexpected payload",
                (_, FailureClass::Unavailable) => "provider is unreachable or failing",
            };
            println!("  FAILED: {e}");
            println!("  {hint}");
            anyhow::bail!("{} backend health check failed", backend.name())
        }
    }
}
