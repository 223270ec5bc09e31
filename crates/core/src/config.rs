use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info};

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
    pub roster: RosterConfig,
    #[serde(default)]
    pub muc: MucConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub jid: String,
    pub password: String,
    #[serde(default = "default_resource")]
    pub resource: String,
    pub server: Option<String>,
    pub port: Option<u16>,
    /// Permits sending the password in the clear during legacy iq-auth.
    #[serde(default)]
    pub allow_plaintext_auth: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    #[serde(default = "default_group")]
    pub default_group: String,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            default_group: default_group(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MucConfig {
    #[serde(default = "default_conference_server")]
    pub default_server: String,
}

impl Default for MucConfig {
    fn default() -> Self {
        Self {
            default_server: default_conference_server(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Upper bound, in bytes, on one stanza still being received.
    #[serde(default = "default_max_stanza_size")]
    pub max_stanza_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_stanza_size: default_max_stanza_size(),
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

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
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

fn default_resource() -> String {
    "natter".to_string()
}

fn default_group() -> String {
    "Buddies".to_string()
}

fn default_conference_server() -> String {
    "conference.jabber.org".to_string()
}

fn default_max_stanza_size() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const DEFAULT_CONFIG_TOML: &str = r#"[account]
jid = ""
password = ""
resource = "natter"
# server = "xmpp.example.com"
# port = 5222
# allow_plaintext_auth = false

[roster]
default_group = "Buddies"

[muc]
default_server = "conference.jabber.org"

[stream]
max_stanza_size = 1048576

[logging]
level = "info"

[event_bus]
channel_capacity = 1024
"#;

/// Return the resolved platform-appropriate configuration file path.
#[cfg(feature = "native")]
pub fn config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("im", "natter", "natter") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

/// Load configuration from the platform config path, merging environment
/// variable overrides.
#[cfg(feature = "native")]
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(config_path())
}

pub fn load_config_from(path: PathBuf) -> Result<Config, ConfigError> {
    load_config_from_with_overrides(path, config_overrides_from_env())
}

pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    load_config_from_str_with_overrides(toml_str, config_overrides_from_env())
}

fn load_config_from_with_overrides(
    path: PathBuf,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_default_config(&path)?;
            return Err(ConfigError::MissingRequiredFields {
                fields: vec!["account.jid".to_string(), "account.password".to_string()],
            });
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    load_config_from_str_with_overrides(&contents, overrides)
}

fn load_config_from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    apply_overrides(&mut config, overrides);
    validate(&config)?;

    Ok(config)
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        jid: std::env::var("NATTER_JID").ok(),
        password: std::env::var("NATTER_PASSWORD").ok(),
        server: std::env::var("NATTER_SERVER").ok(),
        log_level: std::env::var("NATTER_LOG_LEVEL").ok(),
    }
}

fn apply_overrides(config: &mut Config, overrides: ConfigOverrides) {
    if let Some(jid) = overrides.jid {
        debug!(jid = %jid, "account.jid overridden by NATTER_JID");
        config.account.jid = jid;
    }
    if let Some(password) = overrides.password {
        debug!("account.password overridden by NATTER_PASSWORD");
        config.account.password = password;
    }
    if let Some(server) = overrides.server {
        debug!(server = %server, "account.server overridden by NATTER_SERVER");
        config.account.server = Some(server);
    }
    if let Some(level) = overrides.log_level {
        debug!(level = %level, "logging.level overridden by NATTER_LOG_LEVEL");
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

    let account = jid::BareJid::new(&config.account.jid).map_err(|e| ConfigError::InvalidValue {
        field: "account.jid".to_string(),
        message: format!("not a valid bare address: {e}"),
    })?;
    if account.node().is_none() {
        return Err(ConfigError::InvalidValue {
            field: "account.jid".to_string(),
            message: "must include a username".to_string(),
        });
    }

    if config.account.resource.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "account.resource".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    if config.muc.default_server.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "muc.default_server".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    if config.stream.max_stanza_size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "stream.max_stanza_size".to_string(),
            message: "must be at least 1 byte".to_string(),
        });
    }

    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        });
    }

    Ok(())
}

fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)?;
    info!(path = %path.display(), "wrote default configuration");
    Ok(())
}
