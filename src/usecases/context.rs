use std::sync::Arc;

use tracing_appender::non_blocking::WorkerGuard;

use crate::{
    backend::InMemoryBackend,
    domain::identity::AuthContext,
    infra::config::AppConfig,
};

#[derive(Debug)]
pub struct AppContext {
    pub config: AppConfig,
    pub backend: Arc<InMemoryBackend>,
    log_guard: Option<WorkerGuard>,
}

impl AppContext {
    pub fn new(config: AppConfig, backend: Arc<InMemoryBackend>) -> Self {
        Self {
            config,
            backend,
            log_guard: None,
        }
    }

    /// Keeps the file log writer alive for as long as the context.
    pub fn with_log_guard(mut self, guard: Option<WorkerGuard>) -> Self {
        self.log_guard = guard;
        self
    }

    /// Signs in as a registered username; unknown names stay signed out.
    pub fn sign_in(&self, username: &str) -> AuthContext {
        self.backend
            .find_user(username)
            .map(AuthContext::signed_in)
            .unwrap_or_default()
    }
}
