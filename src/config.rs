use serde::Deserialize;
use std::{env, fs, path::Path};

/// Environment variable that overrides `[mailgun] signing_key`.
pub const SIGNING_KEY_ENV: &str = "MAILGUN_SIGNING_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub mailgun: MailgunConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_db_path() -> String {
    "data/intake.db".to_string()
}

fn default_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_max_timestamp_age_secs")]
    pub max_timestamp_age_secs: i64,
    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_timestamp_age_secs: default_max_timestamp_age_secs(),
            processing_timeout_secs: default_processing_timeout_secs(),
        }
    }
}

fn default_max_timestamp_age_secs() -> i64 {
    crate::signature::MAX_TIMESTAMP_AGE_SECS
}

fn default_processing_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailgunConfig {
    pub signing_key: Option<String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let mut cfg: Config = toml::from_str(&content)?;
        cfg.apply_env(env::var(SIGNING_KEY_ENV).ok());
        Ok(cfg)
    }

    /// Load `path` if it exists, otherwise run on defaults plus environment.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut cfg = Config::default();
        cfg.apply_env(env::var(SIGNING_KEY_ENV).ok());
        Ok(cfg)
    }

    fn apply_env(&mut self, signing_key: Option<String>) {
        if let Some(key) = signing_key.filter(|k| !k.trim().is_empty()) {
            self.mailgun.signing_key = Some(key);
        }
    }

    /// The signing key, if one is configured and non-empty.
    pub fn signing_key(&self) -> Option<&str> {
        self.mailgun
            .signing_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.server.bind_addr, "127.0.0.1:8080");
        assert_eq!(cfg.server.db_path, "data/intake.db");
        assert_eq!(cfg.webhook.max_timestamp_age_secs, 300);
        assert_eq!(cfg.webhook.processing_timeout_secs, 60);
        assert_eq!(cfg.signing_key(), None);
    }

    #[test]
    fn test_sections_parse() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            bind_addr = "0.0.0.0:9000"

            [webhook]
            processing_timeout_secs = 5

            [mailgun]
            signing_key = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(cfg.server.db_path, "data/intake.db");
        assert_eq!(cfg.webhook.processing_timeout_secs, 5);
        assert_eq!(cfg.signing_key(), Some("abc"));
    }

    #[test]
    fn test_env_overrides_file_key() {
        let mut cfg: Config = toml::from_str("[mailgun]\nsigning_key = \"file\"").unwrap();
        cfg.apply_env(Some("from-env".into()));
        assert_eq!(cfg.signing_key(), Some("from-env"));

        cfg.apply_env(Some("   ".into()));
        assert_eq!(cfg.signing_key(), Some("from-env"));
    }

    #[test]
    fn test_blank_key_counts_as_missing() {
        let cfg: Config = toml::from_str("[mailgun]\nsigning_key = \"  \"").unwrap();
        assert_eq!(cfg.signing_key(), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intake.toml");
        fs::write(&path, "[server]\ndb_path = \"/tmp/x.db\"\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.server.db_path, "/tmp/x.db");
    }
}
