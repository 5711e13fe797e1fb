//! Tracing setup with a log level that can be changed at runtime.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use crate::error::GatewayError;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level '{0}', expected one of trace, debug, info, warn, error")]
    InvalidLevel(String),

    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Normalize a level name, or `None` if it is not one we accept.
pub fn parse_level(level: &str) -> Option<&'static str> {
    let level = level.trim().to_ascii_lowercase();
    LEVELS.into_iter().find(|l| *l == level)
}

/// Handle on the process log level.
#[derive(Clone)]
pub struct LogControl {
    level: Arc<RwLock<&'static str>>,
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl LogControl {
    /// Install the global subscriber at `level`.
    pub fn init(level: &str) -> Result<Self, LoggingError> {
        let level = parse_level(level).ok_or_else(|| LoggingError::InvalidLevel(level.into()))?;
        let (filter, handle) = reload::Layer::new(EnvFilter::new(level));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))?;

        Ok(Self {
            level: Arc::new(RwLock::new(level)),
            handle: Some(handle),
        })
    }

    /// A control that tracks the level without a subscriber behind it.
    pub fn detached(level: &str) -> Result<Self, LoggingError> {
        let level = parse_level(level).ok_or_else(|| LoggingError::InvalidLevel(level.into()))?;
        Ok(Self {
            level: Arc::new(RwLock::new(level)),
            handle: None,
        })
    }

    pub async fn level(&self) -> &'static str {
        *self.level.read().await
    }

    pub async fn set_level(&self, level: &str) -> Result<(), GatewayError> {
        let level = parse_level(level).ok_or_else(|| {
            GatewayError::bad_request(LoggingError::InvalidLevel(level.into()).to_string())
        })?;

        let mut current = self.level.write().await;
        if let Some(handle) = &self.handle {
            handle
                .reload(EnvFilter::new(level))
                .map_err(|e| GatewayError::internal(format!("failed to reload log filter: {e}")))?;
        }
        *current = level;
        info!(level, "Log level changed");
        Ok(())
    }
}
