//! Settings loading from JSON documents and `MARLIN_*` environment variables.
//!
//! # Design
//! - Files are optional; a missing path yields defaults.
//! - Environment overrides are read through a lookup closure so tests never
//!   touch the process environment.
//! - Every loaded document is validated before it is returned.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use marlin_torrent_core::StorageKind;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{LogStyle, PlayerSettings, ResumeAction};
use crate::validate::validate;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "MARLIN_";

/// Parse and validate a JSON settings document.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed documents and
/// [`ConfigError::InvalidField`] when validation fails.
pub fn load_from_str(raw: &str) -> ConfigResult<PlayerSettings> {
    let settings: PlayerSettings =
        serde_json::from_str(raw).map_err(|source| ConfigError::Parse { source })?;
    validate(&settings)?;
    Ok(settings)
}

/// Read, parse and validate a JSON settings file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when the file cannot be read, otherwise the
/// errors of [`load_from_str`].
pub fn load_from_path(path: &Path) -> ConfigResult<PlayerSettings> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&raw)
}

/// Load settings from an optional file, then apply process environment
/// overrides.
///
/// # Errors
///
/// Propagates file, parse, override and validation failures.
pub fn load(path: Option<&Path>) -> ConfigResult<PlayerSettings> {
    let mut settings = match path {
        Some(path) => load_from_path(path)?,
        None => PlayerSettings::default(),
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    validate(&settings)?;
    Ok(settings)
}

/// Apply `MARLIN_*` overrides resolved through `lookup`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when an override cannot be parsed.
pub fn apply_env_overrides<F>(settings: &mut PlayerSettings, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| {
        let key = format!("{ENV_PREFIX}{name}");
        lookup(&key).map(|value| (key, value))
    };

    if let Some((key, value)) = var("DOWNLOAD_PATH") {
        debug!(key = %key, "applying settings override");
        settings.download_path = PathBuf::from(value);
    }
    if let Some((key, value)) = var("DOWNLOAD_STORAGE") {
        settings.download_storage = match value.trim().to_ascii_lowercase().as_str() {
            "file" => StorageKind::File,
            "memory" => StorageKind::Memory,
            _ => return Err(ConfigError::invalid(key, Some(value), "expected file or memory")),
        };
    }
    if let Some((key, value)) = var("BUFFER_SIZE") {
        settings.buffer_size_bytes = parse_number(&key, &value)?;
    }
    if let Some((key, value)) = var("END_BUFFER_SIZE") {
        settings.end_buffer_size_bytes = parse_number(&key, &value)?;
    }
    if let Some((key, value)) = var("BUFFER_TIMEOUT_SECS") {
        settings.buffer_timeout_secs = parse_number(&key, &value)?;
    }
    if let Some((key, value)) = var("LIMIT_AFTER_BUFFERING") {
        settings.limit_after_buffering = parse_flag(&key, &value)?;
    }
    if let Some((key, value)) = var("DOWNLOAD_RATE_LIMIT") {
        settings.download_rate_limit = parse_number(&key, &value)?;
    }
    if let Some((key, value)) = var("UPLOAD_RATE_LIMIT") {
        settings.upload_rate_limit = parse_number(&key, &value)?;
    }
    if let Some((key, value)) = var("RESUME_ACTION") {
        settings.resume_action = ResumeAction::parse(&value).ok_or_else(|| {
            ConfigError::invalid(key, Some(value.clone()), "expected disabled, ask or always")
        })?;
    }
    if let Some((_, value)) = var("UNRAR_COMMAND") {
        settings.unrar_command = value;
    }
    if let Some((_, value)) = var("LOG_LEVEL") {
        settings.log_level = value;
    }
    if let Some((key, value)) = var("LOG_FORMAT") {
        settings.log_format = LogStyle::parse(&value).ok_or_else(|| {
            ConfigError::invalid(key, Some(value.clone()), "expected auto, json or pretty")
        })?;
    }
    Ok(())
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, Some(value.to_string()), "expected an integer"))
}

fn parse_flag(key: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            key,
            Some(value.to_string()),
            "expected a boolean",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn overrides_apply_typed_values() {
        let mut settings = PlayerSettings::default();
        apply_env_overrides(
            &mut settings,
            lookup(&[
                ("MARLIN_DOWNLOAD_STORAGE", "memory"),
                ("MARLIN_LIMIT_AFTER_BUFFERING", "yes"),
                ("MARLIN_DOWNLOAD_RATE_LIMIT", "4096"),
                ("MARLIN_RESUME_ACTION", "always"),
                ("MARLIN_LOG_LEVEL", "marlin_player=debug"),
                ("MARLIN_LOG_FORMAT", "JSON"),
            ]),
        )
        .expect("overrides apply");
        assert_eq!(settings.download_storage, StorageKind::Memory);
        assert!(settings.limit_after_buffering);
        assert_eq!(settings.download_rate_limit, 4_096);
        assert_eq!(settings.resume_action, ResumeAction::Always);
        assert_eq!(settings.log_level, "marlin_player=debug");
        assert_eq!(settings.log_format, LogStyle::Json);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let mut settings = PlayerSettings::default();
        let err = apply_env_overrides(&mut settings, lookup(&[("MARLIN_LOG_FORMAT", "xml")]))
            .expect_err("unknown style must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidField { ref field, .. } if field == "MARLIN_LOG_FORMAT"
        ));
        assert_eq!(settings.log_format, LogStyle::Auto);
    }

    #[test]
    fn bad_override_reports_field() {
        let mut settings = PlayerSettings::default();
        let err = apply_env_overrides(&mut settings, lookup(&[("MARLIN_BUFFER_SIZE", "lots")]))
            .expect_err("non numeric buffer size must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidField { ref field, .. } if field == "MARLIN_BUFFER_SIZE"
        ));
    }
}
