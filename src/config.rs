//! Configuration file parser for ~/.config/ldrmirror/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::storage::SubscriptionSort;
use crate::sync::Credentials;

/// Environment variable that overrides the configured password.
pub const PASSWORD_ENV: &str = "LDR_PASSWORD";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The password is held as a `SecretString` and never printed by `Debug`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the reader service, e.g. `https://reader.example.com/`.
    pub api_base_url: Option<String>,

    pub login_id: Option<String>,

    /// Overridden by `LDR_PASSWORD` when set.
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,

    /// Hours between timed sync cycles. 0 = no timer.
    pub sync_interval_hours: u64,

    /// Fetch unread items only during sync.
    pub sync_unread_only: bool,

    /// Mark every synced subscription read on the server after a cycle.
    pub auto_touch_all: bool,

    /// Open subscriptions in unread-only mode.
    pub view_unread_only: bool,

    pub subscription_sort: SubscriptionSort,

    pub settle_delay_ms: u64,
    pub subscription_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            login_id: None,
            password: None,
            sync_interval_hours: 3,
            sync_unread_only: true,
            auto_touch_all: false,
            view_unread_only: false,
            subscription_sort: SubscriptionSort::default(),
            settle_delay_ms: 500,
            subscription_delay_ms: 100,
            request_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("login_id", &self.login_id)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("sync_interval_hours", &self.sync_interval_hours)
            .field("sync_unread_only", &self.sync_unread_only)
            .field("auto_touch_all", &self.auto_touch_all)
            .field("view_unread_only", &self.view_unread_only)
            .field("subscription_sort", &self.subscription_sort)
            .field("settle_delay_ms", &self.settle_delay_ms)
            .field("subscription_delay_ms", &self.subscription_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.map(SecretString::from))
}

const KNOWN_KEYS: [&str; 11] = [
    "api_base_url",
    "login_id",
    "password",
    "sync_interval_hours",
    "sync_unread_only",
    "auto_touch_all",
    "view_unread_only",
    "subscription_sort",
    "settle_delay_ms",
    "subscription_delay_ms",
    "request_timeout_secs",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file, then apply `LDR_PASSWORD`.
    ///
    /// - Missing or empty file → defaults
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load_file(path)?;
        Ok(config.with_password_override(std::env::var(PASSWORD_ENV).ok()))
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            path = %path.display(),
            base_url = config.api_base_url.as_deref().unwrap_or("-"),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Replace the password when an override is present and non-empty.
    pub fn with_password_override(mut self, password: Option<String>) -> Self {
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            self.password = Some(SecretString::from(password));
        }
        self
    }

    /// Login credentials, if both the id and the password are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        let login_id = self.login_id.as_deref().filter(|id| !id.is_empty())?;
        let password = self.password.clone()?;
        Some(Credentials::new(login_id, password))
    }

    /// Timer interval; `None` disables the timer.
    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_hours > 0).then(|| Duration::from_secs(self.sync_interval_hours * 3600))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `$HOME/.config/ldrmirror`
    pub fn default_dir() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(PathBuf::from(home).join(".config").join("ldrmirror"))
    }
}

// ============================================================================
// Tests
// ============================================================================
