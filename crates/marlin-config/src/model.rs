//! Typed settings model consumed by the playback engine.

use std::path::PathBuf;
use std::time::Duration;

use marlin_torrent_core::{StorageKind, TorrentRateLimit};
use serde::{Deserialize, Serialize};

use crate::defaults;

/// How a stored resume position is handled before playback starts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResumeAction {
    /// Always start from the beginning.
    Disabled,
    /// Ask the user whether to resume.
    #[default]
    Ask,
    /// Resume without asking.
    Always,
}

impl ResumeAction {
    /// Parse the lowercase setting name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" | "0" => Some(Self::Disabled),
            "ask" | "1" => Some(Self::Ask),
            "always" | "2" => Some(Self::Always),
            _ => None,
        }
    }
}

/// Output style for process logs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogStyle {
    /// Pretty for debug builds, JSON otherwise.
    #[default]
    Auto,
    /// Structured JSON lines.
    Json,
    /// Human-readable lines.
    Pretty,
}

impl LogStyle {
    /// Parse the lowercase setting name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Player settings. Missing JSON fields fall back to their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "settings document mirrors independent user toggles"
)]
pub struct PlayerSettings {
    /// Bytes buffered from the start of the chosen file.
    pub buffer_size_bytes: u64,
    /// Bytes buffered before the end of the chosen file.
    pub end_buffer_size_bytes: u64,
    /// Seconds to wait for playback to start after buffering.
    pub buffer_timeout_secs: u64,
    /// Watched threshold in percent of the video duration.
    pub playback_percent: u8,
    /// Apply the transfer caps once buffering has finished.
    pub limit_after_buffering: bool,
    /// Download cap in bytes per second; `0` is unlimited.
    pub download_rate_limit: u64,
    /// Upload cap in bytes per second; `0` is unlimited.
    pub upload_rate_limit: u64,
    /// Resume prompt policy.
    pub resume_action: ResumeAction,
    /// Start streams without any prompt.
    pub silent_stream_start: bool,
    /// Match episode numbers against file names.
    pub smart_episode_match: bool,
    /// Pre-stage the next episode while playing.
    pub smart_episode_start: bool,
    /// Show the status overlay while paused.
    pub overlay_status: bool,
    /// Report playback to the watch-state service.
    pub scrobble: bool,
    /// Pass subtitle and audio sidecars to the player.
    pub include_sidecars: bool,
    /// Storage backend for new torrents.
    pub download_storage: StorageKind,
    /// Root directory for downloaded payloads.
    pub download_path: PathBuf,
    /// External archive extraction command.
    pub unrar_command: String,
    /// Lifetime of stored resume records in seconds.
    pub stored_resume_ttl_secs: u64,
    /// Delay before the free space check in milliseconds.
    pub space_check_delay_ms: u64,
    /// Seconds a torrent is kept waiting for next-file playback.
    pub leave_torrent_timeout_secs: u64,
    /// Log filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log output style.
    pub log_format: LogStyle,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            buffer_size_bytes: defaults::BUFFER_SIZE_BYTES,
            end_buffer_size_bytes: defaults::END_BUFFER_SIZE_BYTES,
            buffer_timeout_secs: defaults::BUFFER_TIMEOUT_SECS,
            playback_percent: defaults::PLAYBACK_PERCENT,
            limit_after_buffering: false,
            download_rate_limit: 0,
            upload_rate_limit: 0,
            resume_action: ResumeAction::default(),
            silent_stream_start: false,
            smart_episode_match: true,
            smart_episode_start: true,
            overlay_status: true,
            scrobble: true,
            include_sidecars: true,
            download_storage: StorageKind::default(),
            download_path: PathBuf::from(defaults::DOWNLOAD_PATH),
            unrar_command: defaults::UNRAR_COMMAND.to_string(),
            stored_resume_ttl_secs: defaults::STORED_RESUME_TTL_SECS,
            space_check_delay_ms: defaults::SPACE_CHECK_DELAY_MS,
            leave_torrent_timeout_secs: defaults::LEAVE_TORRENT_TIMEOUT_SECS,
            log_level: defaults::LOG_LEVEL.to_string(),
            log_format: LogStyle::default(),
        }
    }
}

impl PlayerSettings {
    /// Time allowed between buffering completion and playback start.
    #[must_use]
    pub const fn buffer_timeout(&self) -> Duration {
        Duration::from_secs(self.buffer_timeout_secs)
    }

    /// Expiration applied to stored resume records.
    #[must_use]
    pub const fn stored_resume_ttl(&self) -> Duration {
        Duration::from_secs(self.stored_resume_ttl_secs)
    }

    /// Delay before the one-off free space check.
    #[must_use]
    pub const fn space_check_delay(&self) -> Duration {
        Duration::from_millis(self.space_check_delay_ms)
    }

    /// How long a torrent waits for next-file playback before removal.
    #[must_use]
    pub const fn leave_torrent_timeout(&self) -> Duration {
        Duration::from_secs(self.leave_torrent_timeout_secs)
    }

    /// Caps applied after buffering; zero settings stay unlimited.
    #[must_use]
    pub const fn buffered_rate_limit(&self) -> TorrentRateLimit {
        TorrentRateLimit {
            download_bps: non_zero(self.download_rate_limit),
            upload_bps: non_zero(self.upload_rate_limit),
        }
    }

    /// Whether `progress_percent` counts as fully watched.
    #[must_use]
    pub fn is_watched(&self, progress_percent: f64) -> bool {
        progress_percent > f64::from(self.playback_percent)
    }
}

const fn non_zero(value: u64) -> Option<u64> {
    if value == 0 { None } else { Some(value) }
}
