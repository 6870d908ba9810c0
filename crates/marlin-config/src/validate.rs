//! Validation helpers for player settings.

use crate::error::{ConfigError, ConfigResult};
use crate::model::PlayerSettings;

/// Check that `settings` can drive a playback session.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first field that fails.
pub fn validate(settings: &PlayerSettings) -> ConfigResult<()> {
    if settings.buffer_size_bytes == 0 {
        return Err(ConfigError::invalid(
            "buffer_size_bytes",
            Some("0".to_string()),
            "must be positive",
        ));
    }
    if !(1..=100).contains(&settings.playback_percent) {
        return Err(ConfigError::invalid(
            "playback_percent",
            Some(settings.playback_percent.to_string()),
            "must be within 1..=100",
        ));
    }
    if settings.buffer_timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "buffer_timeout_secs",
            Some("0".to_string()),
            "must be positive",
        ));
    }
    if settings.unrar_command.trim().is_empty() {
        return Err(ConfigError::invalid("unrar_command", None, "must not be empty"));
    }
    if settings.log_level.trim().is_empty() {
        return Err(ConfigError::invalid("log_level", None, "must not be empty"));
    }
    if settings.download_path.as_os_str().is_empty() {
        return Err(ConfigError::invalid("download_path", None, "must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&PlayerSettings::default()).is_ok());
    }

    #[test]
    fn rejects_out_of_range_percent() {
        let settings = PlayerSettings {
            playback_percent: 0,
            ..PlayerSettings::default()
        };
        let err = validate(&settings).expect_err("percent 0 must be rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidField { ref field, .. } if field == "playback_percent"
        ));
    }

    #[test]
    fn rejects_blank_log_level() {
        let settings = PlayerSettings {
            log_level: String::new(),
            ..PlayerSettings::default()
        };
        let err = validate(&settings).expect_err("blank level must be rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidField { ref field, .. } if field == "log_level"
        ));
    }

    #[test]
    fn rejects_blank_unrar_command() {
        let settings = PlayerSettings {
            unrar_command: "  ".to_string(),
            ..PlayerSettings::default()
        };
        assert!(validate(&settings).is_err());
    }
}
