//! Client configuration

use flowdbg_common::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Client configuration, read from `~/.flowdbg/config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the debug engine
    pub server_url: String,

    /// Flow picked by `flowdbg debug` when none is named
    pub default_flow: Option<String>,

    /// Context handed to new sessions unless `--context` is given
    pub initial_context: Context,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8088".to_string(),
            default_flow: None,
            initial_context: Context::new(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply the `--server` / `FLOWDBG_SERVER` override
    pub fn with_server(mut self, server: Option<String>) -> Self {
        if let Some(url) = server.filter(|s| !s.is_empty()) {
            self.server_url = url;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = ClientConfig::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.server_url, "http://127.0.0.1:8088");
        assert!(config.default_flow.is_none());
    }

    #[test]
    fn test_load_with_context_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
server_url = "http://engine:9000"
default_flow = "user_registration"

[initial_context]
email = "dev@example.com"
retries = 2
"#,
        )
        .unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.server_url, "http://engine:9000");
        assert_eq!(config.default_flow.as_deref(), Some("user_registration"));
        assert_eq!(config.initial_context["email"], "dev@example.com");
        assert_eq!(config.initial_context["retries"], 2);
    }

    #[test]
    fn test_server_override() {
        let config = ClientConfig::default().with_server(Some("https://dbg.internal".to_string()));
        assert_eq!(config.server_url, "https://dbg.internal");

        let config = ClientConfig::default().with_server(Some(String::new()));
        assert_eq!(config.server_url, "http://127.0.0.1:8088");
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let config = ClientConfig {
            default_flow: Some("password_reset".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded.default_flow.as_deref(), Some("password_reset"));
    }
}
