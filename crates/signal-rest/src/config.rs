use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub signal_cli: SignalCliConfig,
    #[serde(default = "default_tmp_dir")]
    pub attachment_tmp_dir: PathBuf,
    #[serde(default = "default_tmp_dir")]
    pub avatar_tmp_dir: PathBuf,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            signal_cli: SignalCliConfig::default(),
            attachment_tmp_dir: default_tmp_dir(),
            avatar_tmp_dir: default_tmp_dir(),
            locks: LockConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }

    /// Check that every directory the gateway writes to is usable.
    ///
    /// Missing directories are created; each one then receives a probe file
    /// that is removed again.
    pub async fn ensure_writable_dirs(&self) -> Result<(), ConfigError> {
        let dirs = [
            &self.signal_cli.config_dir,
            &self.attachment_tmp_dir,
            &self.avatar_tmp_dir,
        ];
        for dir in dirs {
            ensure_writable(dir).await?;
        }
        Ok(())
    }
}

async fn ensure_writable(dir: &Path) -> Result<(), ConfigError> {
    let not_writable = |source| ConfigError::NotWritable {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).await.map_err(not_writable)?;
    let probe = dir.join(format!(".signal-rest-probe-{}", ulid::Ulid::new()));
    fs::write(&probe, b"").await.map_err(not_writable)?;
    fs::remove_file(&probe).await.map_err(not_writable)?;
    Ok(())
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("/tmp/")
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Upper bound for request bodies; base64 attachments inflate quickly.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

// ============================================================================
// SignalCliConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SignalCliConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_signal_cli_config_dir")]
    pub config_dir: PathBuf,
    /// Seconds `receive` waits for new messages.
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_seconds: u64,
}

impl Default for SignalCliConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            config_dir: default_signal_cli_config_dir(),
            receive_timeout_seconds: default_receive_timeout(),
        }
    }
}

fn default_binary() -> String {
    "signal-cli".to_string()
}

fn default_signal_cli_config_dir() -> PathBuf {
    PathBuf::from("/home/.local/share/signal-cli/")
}

fn default_receive_timeout() -> u64 {
    1
}

// ============================================================================
// LockConfig
// ============================================================================

/// Optional ceilings for account operations. Unset means wait forever.
#[derive(Debug, Default, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub acquire_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub operation_timeout_seconds: Option<u64>,
}

impl LockConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_seconds.map(Duration::from_secs)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_seconds.map(Duration::from_secs)
    }
}

// ============================================================================
// LoggingConfig
// ============================================================================

#[derive(Debug, Deserialize)]
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

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("directory {} is not writable: {source}", path.display())]
    NotWritable {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============================================================================
// Tests
// ============================================================================
