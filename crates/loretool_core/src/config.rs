use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "loretool/0.1";
pub const DEFAULT_CONFIG_FILENAME: &str = "loretool.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default)]
    pub store: StoreSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StoreSection {
    pub url: Option<String>,
    pub user_agent: Option<String>,
}

impl StoreConfig {
    /// Resolve the store base URL: env SUPABASE_URL > env NEXT_PUBLIC_SUPABASE_URL > config.
    /// The NEXT_PUBLIC_ fallback exists because the store credentials live in the
    /// `.env.local` file shared with the companion web app.
    pub fn store_url(&self) -> Option<String> {
        for key in ["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"] {
            if let Ok(value) = env::var(key) {
                let trimmed = value.trim().to_string();
                if !trimmed.is_empty() {
                    return Some(trimmed);
                }
            }
        }
        self.store.url.clone()
    }

    /// Resolve user agent: env LORETOOL_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Ok(value) = env::var("LORETOOL_USER_AGENT") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.store
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

/// Resolve the service-role key. Environment only: the key bypasses row-level
/// security and must never be written to the config file.
pub fn service_role_key() -> Option<String> {
    env::var("SUPABASE_SERVICE_ROLE_KEY")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Load and parse a StoreConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<StoreConfig> {
    if !config_path.exists() {
        return Ok(StoreConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: StoreConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_no_url() {
        let config = StoreConfig::default();
        assert!(config.store.url.is_none());
        assert!(config.store.user_agent.is_none());
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/loretool.toml")).expect("load config");
        assert!(config.store.url.is_none());
    }

    #[test]
    fn load_config_parses_store_section() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("loretool.toml");
        fs::write(
            &config_path,
            r#"
[store]
url = "https://example.supabase.co"
user_agent = "test-agent/1.0"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.store.url.as_deref(),
            Some("https://example.supabase.co")
        );
        assert_eq!(config.store.user_agent.as_deref(), Some("test-agent/1.0"));
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("loretool.toml");
        fs::write(&config_path, "[other]\nkey = \"value\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.store.url.is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("loretool.toml");
        fs::write(&config_path, "[store\nurl = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn default_user_agent() {
        let config = StoreConfig::default();
        assert_eq!(config.user_agent(), "loretool/0.1");
    }

    #[test]
    fn config_user_agent_wins_over_default() {
        let config = StoreConfig {
            store: StoreSection {
                url: None,
                user_agent: Some("custom/2.0".to_string()),
            },
        };
        assert_eq!(config.user_agent(), "custom/2.0");
    }
}
