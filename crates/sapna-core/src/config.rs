// Configuration loading and parsing (config/sapna.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the single config file under `config/` (and `defaults/`).
pub const CONFIG_FILE: &str = "sapna.toml";

/// Environment variable that overrides the base directory holding
/// `config/` and `defaults/`.
pub const CONFIG_DIR_ENV: &str = "SAPNA_CONFIG_DIR";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub overlay: OverlayConfig,
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

/// WebSocket endpoint the browser-extension overlay connects to.
#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Re-fetch the match-player mapping on every tick instead of only once
    /// at poller start.
    #[serde(default)]
    pub refresh_mapping_each_tick: bool,
    /// Stop a match's poller after this long with nobody watching it.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            refresh_mapping_each_tick: false,
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    120
}

fn default_user_agent() -> String {
    "sapna11/0.1 (fantasy rooms)".to_string()
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Config {
    pub fn refresh_interval(&self) -> Duration {
        self.refresh.interval()
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/sapna.toml` relative to `base_dir`.
///
/// Does not copy defaults; `load_config()` does that first.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config = parse_config(&text, &path)?;
    validate(&config)?;
    Ok(config)
}

/// Parse config text without touching the filesystem. `origin` is only used
/// in error messages.
pub fn parse_config(text: &str, origin: &Path) -> Result<Config, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: origin.to_path_buf(),
        source: e,
    })
}

/// Copy `defaults/sapna.toml` to `config/sapna.toml` unless the config file
/// already exists. Returns the path written, or `None` when nothing was copied.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(CONFIG_FILE);
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no {CONFIG_FILE} in config/ or defaults/ under {}; \
                 run from the project root or set {CONFIG_DIR_ENV}",
                base_dir.display()
            ),
        });
    }

    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", dir.display()),
        })?;
    }
    std::fs::copy(&source, &target).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to copy {} to {}: {e}", source.display(), target.display()),
    })?;
    Ok(Some(target))
}

/// Load config from `$SAPNA_CONFIG_DIR`, or the current directory when unset,
/// copying defaults into place first.
pub fn load_config() -> Result<Config, ConfigError> {
    let base = match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
            path: PathBuf::from("."),
        })?,
    };
    if let Some(copied) = ensure_config_file(&base)? {
        tracing::info!(path = %copied.display(), "copied default config");
    }
    load_config_from(&base)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.bind.trim().is_empty() {
        return Err(invalid("server.bind", "must not be empty"));
    }
    if config.server.port == 0 {
        return Err(invalid("server.port", "must be greater than 0"));
    }
    if config.overlay.port == 0 {
        return Err(invalid("overlay.port", "must be greater than 0"));
    }
    if config.overlay.port == config.server.port {
        return Err(invalid(
            "overlay.port",
            format!("must differ from server.port ({})", config.server.port),
        ));
    }

    if config.database.path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty"));
    }

    if config.feed.base_url.trim().is_empty() {
        return Err(invalid("feed.base_url", "must not be empty"));
    }
    if config.feed.timeout_secs == 0 {
        return Err(invalid("feed.timeout_secs", "must be > 0"));
    }

    if config.refresh.interval_secs == 0 {
        return Err(invalid("refresh.interval_secs", "must be > 0"));
    }
    if config.refresh.idle_timeout_secs < config.refresh.interval_secs {
        return Err(invalid(
            "refresh.idle_timeout_secs",
            format!("must be at least refresh.interval_secs ({})", config.refresh.interval_secs),
        ));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
