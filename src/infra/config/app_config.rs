use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::unread::DEFAULT_BADGE_CEILING;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub logging: LogConfig,
    pub backend: BackendConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    /// Write logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file: None,
        }
    }
}

/// Settings of the simulated hosted backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Artificial delay applied to every remote call.
    pub latency_ms: u64,
    /// Usernames registered at startup.
    pub users: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            users: vec!["alice".to_owned(), "bob".to_owned()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatConfig {
    pub badge_ceiling: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            badge_ceiling: DEFAULT_BADGE_CEILING,
        }
    }
}
