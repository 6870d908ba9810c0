//! Default values for player settings.
//!
//! # Design
//! - Keep every tunable in one place so the model's `Default` stays readable.
//! - Durations are stored as integers to keep the JSON document flat.

const MIB: u64 = 1024 * 1024;

/// Head window buffered before playback starts.
pub(crate) const BUFFER_SIZE_BYTES: u64 = 20 * MIB;
/// Tail window buffered before playback starts.
pub(crate) const END_BUFFER_SIZE_BYTES: u64 = 4 * MIB;
/// Seconds to wait for the player to report playback after buffering.
pub(crate) const BUFFER_TIMEOUT_SECS: u64 = 60;
/// Watched threshold in percent.
pub(crate) const PLAYBACK_PERCENT: u8 = 80;
/// Stored resume records expire after 30 days.
pub(crate) const STORED_RESUME_TTL_SECS: u64 = 30 * 24 * 60 * 60;
/// Delay before the one-off free space check.
pub(crate) const SPACE_CHECK_DELAY_MS: u64 = 100;
/// How long a torrent is kept around waiting for its next file.
pub(crate) const LEAVE_TORRENT_TIMEOUT_SECS: u64 = 120;
/// Log filter used when `RUST_LOG` is unset.
pub(crate) const LOG_LEVEL: &str = "info";
/// Download root used when none is configured.
pub(crate) const DOWNLOAD_PATH: &str = "downloads";

/// Archive extraction tool.
#[cfg(windows)]
pub(crate) const UNRAR_COMMAND: &str = "unrar.exe";
/// Archive extraction tool.
#[cfg(not(windows))]
pub(crate) const UNRAR_COMMAND: &str = "unrar";
