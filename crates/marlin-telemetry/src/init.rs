//! Tracing subscriber bootstrap for processes embedding the player.
//!
//! # Design
//! - `RUST_LOG` wins over the configured filter so operators can raise
//!   verbosity without touching the settings document.
//! - The build SHA is recorded once and reused by every later call.

use marlin_config::{LogStyle, PlayerSettings};
use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, TelemetryError};

/// Filter used when neither `RUST_LOG` nor the settings provide one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

static BUILD_SHA: OnceCell<String> = OnceCell::new();

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let _ = BUILD_SHA.set(config.build_sha.to_string());
    let registry = tracing_subscriber::registry().with(env_filter(config.level));
    let installed = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(false).with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
    };
    installed.map_err(|source| TelemetryError::SubscriberInstall { source })
}

/// Build SHA recorded by [`init_logging`], `dev` before initialisation.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD_SHA.get().map_or("dev", String::as_str)
}

/// Subscriber parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig<'a> {
    /// Filter directive, e.g. `info` or `marlin_player=debug`.
    pub level: &'a str,
    /// Output format.
    pub format: LogFormat,
    /// Build identifier.
    pub build_sha: &'a str,
}

impl<'a> LoggingConfig<'a> {
    /// Logging parameters taken from the player settings.
    #[must_use]
    pub fn from_settings(settings: &'a PlayerSettings, build_sha: &'a str) -> Self {
        let level = settings.log_level.trim();
        Self {
            level: if level.is_empty() {
                DEFAULT_LOG_LEVEL
            } else {
                level
            },
            format: LogFormat::from_style(settings.log_format),
            build_sha,
        }
    }
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
            build_sha: build_sha(),
        }
    }
}

/// Concrete output format of the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON lines.
    Json,
    /// Human-readable lines.
    Pretty,
}

impl LogFormat {
    /// Pretty for debug builds, JSON for release builds.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }

    /// Resolve a configured style; `Auto` defers to [`LogFormat::infer`].
    #[must_use]
    pub const fn from_style(style: LogStyle) -> Self {
        match style {
            LogStyle::Auto => Self::infer(),
            LogStyle::Json => Self::Json,
            LogStyle::Pretty => Self::Pretty,
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
