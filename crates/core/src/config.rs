use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::event::PresenceShow;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("missing required fields: {fields:?}")]
    MissingRequiredFields { fields: Vec<String> },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub jid: String,
    pub password: String,
    pub server: Option<String>,
    pub port: Option<u16>,
}

impl AccountConfig {
    pub const DEFAULT_PORT: u16 = 5222;

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(Self::DEFAULT_PORT)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// `chat`, `away`, `xa` or `dnd`; unset means plain available.
    pub show: Option<String>,
    #[serde(default = "default_status_message")]
    pub status: String,
}

impl PresenceConfig {
    pub fn show(&self) -> Option<PresenceShow> {
        self.show.as_deref().and_then(PresenceShow::from_show)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            show: None,
            status: default_status_message(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionsConfig {
    #[serde(default = "default_true")]
    pub auto_accept: bool,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self { auto_accept: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

impl DeliveryConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Defaults to `pubsub.<account domain>` when unset.
    pub service: Option<String>,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    jid: Option<String>,
    password: Option<String>,
    server: Option<String>,
    log_level: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_status_message() -> String {
    "Available".to_string()
}

fn default_retry_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const VALID_SHOW_VALUES: &[&str] = &["chat", "away", "xa", "dnd"];

const DEFAULT_CONFIG_TOML: &str = r#"[account]
jid = ""
password = ""
# server = "xmpp.example.com"
# port = 5222

[presence]
# show = "away"
status = "Available"

[subscriptions]
auto_accept = true

[delivery]
retry_interval_secs = 60

[pubsub]
enabled = true
# service = "pubsub.example.com"

[logging]
level = "info"
"#;

/// `config.toml` under the platform config dir, or the working directory
/// when the platform has none.
pub fn config_path() -> PathBuf {
    directories::ProjectDirs::from("im", "parley", "parley").map_or_else(
        || PathBuf::from("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// [`load_config_from`] at [`config_path`].
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(config_path())
}

/// Read, apply `PARLEY_*` overrides and validate. A missing file is written
/// out with commented defaults and reported as missing credentials.
pub fn load_config_from(path: PathBuf) -> Result<Config, ConfigError> {
    read_config(&path, config_overrides_from_env())
}

pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    parse_config(toml_str, config_overrides_from_env())
}

fn read_config(path: &Path, overrides: ConfigOverrides) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents, overrides),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            create_default_config(path)?;
            Err(ConfigError::MissingRequiredFields {
                fields: vec!["account.jid".to_string(), "account.password".to_string()],
            })
        }
        Err(error) => Err(ConfigError::Io(error)),
    }
}

fn parse_config(toml_str: &str, overrides: ConfigOverrides) -> Result<Config, ConfigError> {
    let mut config: Config =
        toml::from_str(toml_str).map_err(|error| invalid_toml(toml_str, &error))?;
    apply_overrides(&mut config, overrides);
    validate(&config)?;
    Ok(config)
}

/// 1-based line and column of the error span start; `(0, 0)` without a span.
fn invalid_toml(source: &str, error: &toml::de::Error) -> ConfigError {
    let (line, column) = error.span().map_or((0, 0), |span| {
        let before = &source[..span.start];
        let line_start = before.rfind('\n').map_or(0, |newline| newline + 1);
        (before.matches('\n').count() + 1, span.start - line_start + 1)
    });
    ConfigError::InvalidToml {
        line,
        column,
        message: error.message().to_string(),
    }
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        jid: std::env::var("PARLEY_JID").ok(),
        password: std::env::var("PARLEY_PASSWORD").ok(),
        server: std::env::var("PARLEY_SERVER").ok(),
        log_level: std::env::var("PARLEY_LOG_LEVEL").ok(),
    }
}

fn apply_overrides(config: &mut Config, overrides: ConfigOverrides) {
    if let Some(jid) = overrides.jid {
        config.account.jid = jid;
    }
    if let Some(password) = overrides.password {
        config.account.password = password;
    }
    if let Some(server) = overrides.server {
        config.account.server = Some(server);
    }
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut missing = Vec::new();

    if config.account.jid.is_empty() {
        missing.push("account.jid".to_string());
    }
    if config.account.password.is_empty() {
        missing.push("account.password".to_string());
    }

    if !missing.is_empty() {
        return Err(ConfigError::MissingRequiredFields { fields: missing });
    }

    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        });
    }

    if let Some(show) = config.presence.show.as_deref() {
        if !VALID_SHOW_VALUES.contains(&show) {
            return Err(ConfigError::InvalidValue {
                field: "presence.show".to_string(),
                message: format!("must be one of: {}", VALID_SHOW_VALUES.join(", ")),
            });
        }
    }

    if config.delivery.retry_interval_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "delivery.retry_interval_secs".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    Ok(())
}

fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)?;
    Ok(())
}
