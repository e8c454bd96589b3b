use std::{path::Path, sync::Arc, time::Duration};

use crate::{
    backend::InMemoryBackend,
    infra::{self, config::AppConfig, error::AppError},
    usecases::context::AppContext,
};

const BACKEND_SEEDED: &str = "BACKEND_SEEDED";

pub fn bootstrap(config_path: Option<&Path>) -> Result<AppContext, AppError> {
    let config = infra::config::load(config_path)?;
    let guard = infra::logging::init(&config.logging)?;

    Ok(build_context(config).with_log_guard(guard))
}

pub(crate) fn build_context(config: AppConfig) -> AppContext {
    let backend = Arc::new(InMemoryBackend::new(Duration::from_millis(
        config.backend.latency_ms,
    )));

    for username in &config.backend.users {
        backend.register_user(username);
    }

    tracing::debug!(
        code = BACKEND_SEEDED,
        users = config.backend.users.len(),
        latency_ms = config.backend.latency_ms,
        "simulated backend seeded"
    );

    AppContext::new(config, backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::AuthContext;

    #[test]
    fn seeds_configured_users() {
        let context = build_context(AppConfig::default());

        assert!(context.backend.find_user("alice").is_some());
        assert!(context.backend.find_user("bob").is_some());
        assert!(matches!(context.sign_in("alice"), AuthContext::SignedIn(_)));
    }

    #[test]
    fn unknown_user_stays_signed_out() {
        let context = build_context(AppConfig::default());

        assert_eq!(context.sign_in("mallory"), AuthContext::SignedOut);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = infra::config::load(Some(Path::new("./missing-config.toml")))
            .expect("defaults should load");

        let context = build_context(config);

        assert_eq!(context.config, AppConfig::default());
    }
}
