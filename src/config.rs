//! Configuration management for the OBS connector
//!
//! One TOML document holds everything: OBS WebSocket settings, relay and API
//! endpoints, and where the API key lives in the credential vault. The OBS
//! section is what the settings surface edits; the rest is rarely touched.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::session::DEFAULT_LOG_CAPACITY;

/// Current settings document version. Older documents are rewritten on load.
pub const CONFIG_VERSION: &str = "1.0";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Settings document version
    #[serde(default = "default_version")]
    pub version: String,

    /// OBS WebSocket configuration
    #[serde(default)]
    pub obs: LocalToolSettings,

    /// Cloud relay socket configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Credential vault entry
    #[serde(default)]
    pub credential: CredentialConfig,

    /// In-app log configuration
    #[serde(default)]
    pub logs: LogConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

/// OBS WebSocket connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalToolSettings {
    /// Host or WebSocket URL of the OBS machine
    #[serde(default = "default_obs_address")]
    pub address: String,

    /// OBS WebSocket port
    #[serde(default = "default_obs_port")]
    pub port: u16,

    /// OBS WebSocket password, empty when authentication is disabled
    #[serde(default)]
    pub password: String,

    /// Attempt one OBS connection as soon as the API key is accepted
    #[serde(default = "default_true")]
    pub connect_on_start: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay socket base URL
    #[serde(default = "default_relay_url")]
    pub url: String,

    /// Client name sent with REGISTER
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Delay between reconnection attempts (ms)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Bound on a single connection attempt (ms)
    #[serde(default = "default_timeout")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key verification endpoint
    #[serde(default = "default_verify_url")]
    pub verify_url: String,

    /// Endpoint receiving forwarded OBS events
    #[serde(default = "default_event_url")]
    pub event_url: String,

    /// Request timeout (ms)
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Whether OBS events are forwarded to the API
    #[serde(default = "default_true")]
    pub forward_obs_events: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Vault service name
    #[serde(default = "default_credential_service")]
    pub service: String,

    /// Vault account name
    #[serde(default = "default_credential_account")]
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Number of log entries kept in memory (0 = unbounded)
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,
}

// Default value functions
fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

fn default_obs_address() -> String {
    "ws://localhost".to_string()
}

fn default_obs_port() -> u16 {
    4455
}

fn default_true() -> bool {
    true
}

fn default_relay_url() -> String {
    "wss://websocket.botofthespecter.com".to_string()
}

fn default_client_name() -> String {
    "OBS Connector".to_string()
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_timeout() -> u64 {
    5000
}

fn default_verify_url() -> String {
    "https://api.botofthespecter.com/checkkey".to_string()
}

fn default_event_url() -> String {
    "https://api.botofthespecter.com/SEND_OBS_EVENT".to_string()
}

fn default_credential_service() -> String {
    "BotOfTheSpecter".to_string()
}

fn default_credential_account() -> String {
    "apiAuthKey".to_string()
}

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl Default for LocalToolSettings {
    fn default() -> Self {
        Self {
            address: default_obs_address(),
            port: default_obs_port(),
            password: String::new(),
            connect_on_start: true,
        }
    }
}

impl LocalToolSettings {
    /// Password to send, `None` when authentication is disabled
    pub fn password(&self) -> Option<&str> {
        if self.password.is_empty() {
            None
        } else {
            Some(&self.password)
        }
    }

    /// Host part of the address; OBS is dialed by host and port, so any
    /// `ws://`/`wss://` scheme and trailing slash are dropped.
    pub fn host(&self) -> &str {
        let address = self.address.trim();
        let address = address
            .strip_prefix("ws://")
            .or_else(|| address.strip_prefix("wss://"))
            .unwrap_or(address);
        address.trim_end_matches('/')
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            client_name: default_client_name(),
            reconnect_delay_ms: default_reconnect_delay(),
            connect_timeout_ms: default_timeout(),
        }
    }
}

impl RelayConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            verify_url: default_verify_url(),
            event_url: default_event_url(),
            timeout_ms: default_timeout(),
            forward_obs_events: true,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            service: default_credential_service(),
            account: default_credential_account(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            obs: LocalToolSettings::default(),
            relay: RelayConfig::default(),
            api: ApiConfig::default(),
            credential: CredentialConfig::default(),
            logs: LogConfig::default(),
            config_path: None,
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path()?)
    }

    /// Load configuration from `path`, creating it with defaults if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;

            config.config_path = Some(path.to_path_buf());

            if config.version != CONFIG_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    config.version, CONFIG_VERSION
                );
                config.version = CONFIG_VERSION.to_string();
                config.save()?;
            }

            Ok(config)
        } else {
            // Create default config
            let mut config = Config::default();
            config.config_path = Some(path.to_path_buf());
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = match &self.config_path {
            Some(path) => path.clone(),
            None => Self::default_config_path()?,
        };

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Get default config path
    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("com", "botofthespecter", "obs-connector")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

/// Durable storage for the OBS connection settings
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<LocalToolSettings>;
    fn save(&self, settings: &LocalToolSettings) -> Result<()>;
}

/// Settings store backed by the `[obs]` table of the config file. Saving
/// rewrites only that table and keeps every other section as it is.
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<LocalToolSettings> {
        Ok(Config::load_from(&self.path)?.obs)
    }

    fn save(&self, settings: &LocalToolSettings) -> Result<()> {
        let mut config = Config::load_from(&self.path)?;
        if config.obs == *settings {
            return Ok(());
        }
        config.obs = settings.clone();
        config.save()?;
        info!("OBS settings saved to {:?}", self.path);
        Ok(())
    }
}
