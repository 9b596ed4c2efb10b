use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    /// Bot token - loaded from env DISCORD_TOKEN
    #[serde(default)]
    pub token: String,
    /// Channel the table and announcements live in.
    #[serde(default)]
    pub channel_id: u64,
    /// REST API base URL
    #[serde(default = "default_discord_api_url")]
    pub api_url: String,
    /// Role or user (ID or name) to ping on each announcement.
    #[serde(default)]
    pub mention: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Supabase project URL
    #[serde(default)]
    pub url: String,
    /// Supabase key - loaded from env SUPABASE_KEY
    #[serde(default)]
    pub key: String,
    /// Rows requested per poll.
    #[serde(default = "default_fetch_limit")]
    pub limit: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Bounded event history (JSON array).
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
    /// Cursor and message references (JSON object).
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_discord_api_url() -> String {
    "https://discord.com/api/v10".to_string()
}
fn default_fetch_limit() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_poll_interval() -> u64 {
    60
}
fn default_history_file() -> PathBuf {
    PathBuf::from("solves.json")
}
fn default_state_file() -> PathBuf {
    PathBuf::from("state.json")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            channel_id: 0,
            api_url: default_discord_api_url(),
            mention: None,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key: String::new(),
            limit: default_fetch_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            history_file: default_history_file(),
            state_file: default_state_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.overlay(|key| std::env::var(key).ok())
    }

    /// Build the whole config from environment variables and defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Config {
            discord: DiscordConfig::default(),
            backend: BackendConfig::default(),
            poller: PollerConfig::default(),
            logging: LoggingConfig::default(),
        };
        base.overlay(lookup)
    }

    /// Environment wins over the file. Secrets are never expected in the file.
    fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("DISCORD_TOKEN") {
            self.discord.token = token;
        }
        if let Some(raw) = lookup("CHANNEL_ID") {
            self.discord.channel_id = parse_num("CHANNEL_ID", &raw)?;
        }
        if let Some(url) = lookup("DISCORD_API_URL") {
            self.discord.api_url = url;
        }
        if let Some(mention) = lookup("MENTION_ROLE_ID") {
            self.discord.mention = Some(mention);
        }
        if let Some(url) = lookup("SUPABASE_URL") {
            self.backend.url = url;
        }
        if let Some(key) = lookup("SUPABASE_KEY") {
            self.backend.key = key;
        }
        if let Some(raw) = lookup("POLL_INTERVAL") {
            self.poller.interval_secs = parse_num("POLL_INTERVAL", &raw)?;
        }
        if let Some(path) = lookup("SOLVES_FILE") {
            self.poller.history_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("STATE_FILE") {
            self.poller.state_file = PathBuf::from(path);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(raw) = lookup("LOG_JSON") {
            self.logging.json = matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }

        // "0" was the old placeholder for "nobody".
        if let Some(m) = &self.discord.mention {
            let m = m.trim();
            if m.is_empty() || m == "0" {
                self.discord.mention = None;
            }
        }

        if self.poller.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "POLL_INTERVAL".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(self)
    }

    pub fn has_credentials(&self) -> bool {
        !self.discord.token.is_empty()
    }

    /// Fail with the name of the first required setting that is missing.
    pub fn require_backend(&self) -> Result<(), ConfigError> {
        if self.backend.url.is_empty() {
            return Err(ConfigError::MissingEnv("SUPABASE_URL".to_string()));
        }
        if self.backend.key.is_empty() {
            return Err(ConfigError::MissingEnv("SUPABASE_KEY".to_string()));
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(env(&[])).unwrap();
        assert_eq!(config.poller.interval_secs, 60);
        assert_eq!(config.poller.history_file, PathBuf::from("solves.json"));
        assert_eq!(config.poller.state_file, PathBuf::from("state.json"));
        assert_eq!(config.backend.limit, 100);
        assert_eq!(config.backend.timeout_secs, 30);
        assert_eq!(config.discord.api_url, "https://discord.com/api/v10");
        assert!(config.discord.mention.is_none());
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_env_overlay() {
        let config = Config::from_lookup(env(&[
            ("DISCORD_TOKEN", "tok"),
            ("CHANNEL_ID", "123456789012345678"),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_KEY", "anon"),
            ("POLL_INTERVAL", "15"),
            ("SOLVES_FILE", "/data/solves.json"),
            ("STATE_FILE", "/data/state.json"),
            ("MENTION_ROLE_ID", "998877"),
            ("LOG_JSON", "true"),
        ]))
        .unwrap();

        assert!(config.has_credentials());
        assert_eq!(config.discord.channel_id, 123456789012345678);
        assert_eq!(config.poller.interval_secs, 15);
        assert_eq!(config.poller.history_file, PathBuf::from("/data/solves.json"));
        assert_eq!(config.discord.mention.as_deref(), Some("998877"));
        assert!(config.logging.json);
        assert!(config.require_backend().is_ok());
    }

    #[test]
    fn test_zero_mention_means_none() {
        let config = Config::from_lookup(env(&[("MENTION_ROLE_ID", "0")])).unwrap();
        assert!(config.discord.mention.is_none());
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let err = Config::from_lookup(env(&[("CHANNEL_ID", "general")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = Config::from_lookup(env(&[("POLL_INTERVAL", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_require_backend() {
        let config = Config::from_lookup(env(&[("SUPABASE_URL", "https://x")])).unwrap();
        match config.require_backend() {
            Err(ConfigError::MissingEnv(name)) => assert_eq!(name, "SUPABASE_KEY"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_toml_file_sections() {
        let raw = r#"
            [discord]
            channel_id = 42
            mention = "ctf-ping"

            [poller]
            interval_secs = 30
            history_file = "h.json"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        let config = config.overlay(env(&[("DISCORD_TOKEN", "t")])).unwrap();
        assert_eq!(config.discord.channel_id, 42);
        assert_eq!(config.discord.mention.as_deref(), Some("ctf-ping"));
        assert_eq!(config.poller.interval_secs, 30);
        assert_eq!(config.poller.history_file, PathBuf::from("h.json"));
        assert_eq!(config.poller.state_file, PathBuf::from("state.json"));
        assert_eq!(config.discord.token, "t");
    }
}
