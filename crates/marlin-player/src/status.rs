//! Human-readable status lines and serializable session snapshots.

use marlin_torrent_core::TorrentStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionPhase;

/// Three text lines shown in the progress dialog and the paused overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLines {
    /// State, progress and size.
    pub line1: String,
    /// Transfer rates and swarm counts.
    pub line2: String,
    /// File or torrent name.
    pub line3: String,
}

/// Inputs for [`StatusLines::compose`].
pub(crate) struct StatusInput<'a> {
    pub(crate) status: &'a TorrentStatus,
    pub(crate) progress: f64,
    pub(crate) buffering_bytes: Option<u64>,
    pub(crate) memory_bytes: Option<u64>,
    pub(crate) total_size: Option<u64>,
    pub(crate) duration_secs: f64,
    pub(crate) file_name: Option<&'a str>,
}

impl StatusLines {
    pub(crate) fn compose(input: &StatusInput<'_>) -> Self {
        let progress = input.progress.max(0.0);
        let state = input.status.state.label();
        let mut line1 = if let Some(query) = input.buffering_bytes {
            let done = bytes_from_f64(progress / 100.0 * bytes_to_f64(query));
            format!(
                "{state} ({progress:.2}%) | ({} / {})",
                format_bytes(done),
                format_bytes(query)
            )
        } else if let Some(memory) = input.memory_bytes {
            format!("{state} ({progress:.2}% / {})", format_bytes(memory))
        } else {
            format!("{state} ({progress:.2}%)")
        };

        if let Some(total) = input.total_size {
            line1.push_str(" - ");
            line1.push_str(&format_bytes(total));
            if input.duration_secs >= 1.0 {
                let bps = bytes_from_f64(bytes_to_f64(total) / input.duration_secs);
                let mbit = bytes_to_f64(bps) * 8.0 / 1_000_000.0;
                line1.push_str(&format!(" - bitrate ~ {} ({mbit:.2} MBit)", format_bytes(bps)));
            }
        }

        let rates = &input.status.rates;
        let peers = &input.status.peers;
        let line2 = format!(
            "D:{:.0}kB/s U:{:.0}kB/s S:{}/{} P:{}/{}",
            bytes_to_f64(rates.download_bps) / 1024.0,
            bytes_to_f64(rates.upload_bps) / 1024.0,
            peers.seeds,
            peers.seeds_total,
            peers.peers,
            peers.peers_total,
        );
        let line3 = input
            .file_name
            .map(str::to_string)
            .or_else(|| input.status.name.clone())
            .unwrap_or_default();

        Self {
            line1,
            line2,
            line3,
        }
    }
}

/// Serializable snapshot of one playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session identifier.
    pub session_id: Uuid,
    /// Torrent the session streams from, once known.
    pub info_hash: Option<String>,
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// Chosen file index.
    pub file_index: Option<usize>,
    /// Chosen file path.
    pub file_path: Option<String>,
    /// Buffering progress in percent.
    pub buffer_progress: u8,
    /// Last reported position in seconds.
    pub watched_secs: f64,
    /// Last reported duration in seconds.
    pub duration_secs: f64,
    /// Whether the position crossed the watched threshold.
    pub watched: bool,
    /// Whether the next file has finished pre-buffering.
    pub next_file_ready: bool,
}

/// Render a byte count with binary units.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;
    let value = bytes_to_f64(bytes);
    if value >= GIB {
        format!("{:.2} GiB", value / GIB)
    } else if value >= MIB {
        format!("{:.2} MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.2} KiB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}

pub(crate) fn bytes_to_f64(value: u64) -> f64 {
    let high = u32::try_from(value >> 32).unwrap_or(u32::MAX);
    let low = u32::try_from(value & 0xFFFF_FFFF).unwrap_or(u32::MAX);
    f64::from(high) * 4_294_967_296.0 + f64::from(low)
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "negative and NaN inputs map to zero; float casts saturate at u64::MAX"
)]
pub(crate) fn bytes_from_f64(value: f64) -> u64 {
    if value.is_nan() || value <= 0.0 {
        0
    } else {
        value as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marlin_events::TorrentState;
    use marlin_torrent_core::{PeerCounts, TorrentProgress, TorrentRates};

    fn status() -> TorrentStatus {
        TorrentStatus {
            info_hash: "abc".to_string(),
            name: Some("Show.S01.Pack".to_string()),
            state: TorrentState::Downloading,
            progress: TorrentProgress::default(),
            rates: TorrentRates {
                download_bps: 2_048_000,
                upload_bps: 10_240,
            },
            peers: PeerCounts {
                seeds: 3,
                seeds_total: 10,
                peers: 1,
                peers_total: 4,
            },
            sequential: true,
            paused: false,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn format_bytes_displays_expected_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2_048), "2.00 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GiB");
    }

    #[test]
    fn buffering_lines_include_window_and_swarm() {
        let status = status();
        let lines = StatusLines::compose(&StatusInput {
            status: &status,
            progress: 50.0,
            buffering_bytes: Some(4 * 1024 * 1024),
            memory_bytes: None,
            total_size: Some(1024 * 1024 * 1024),
            duration_secs: 0.0,
            file_name: Some("Show.S01E02.mkv"),
        });
        assert_eq!(
            lines.line1,
            "Buffering (50.00%) | (2.00 MiB / 4.00 MiB) - 1.00 GiB"
        );
        assert_eq!(lines.line2, "D:2000kB/s U:10kB/s S:3/10 P:1/4");
        assert_eq!(lines.line3, "Show.S01E02.mkv");
    }

    #[test]
    fn playing_lines_report_bitrate_and_fall_back_to_torrent_name() {
        let status = status();
        let lines = StatusLines::compose(&StatusInput {
            status: &status,
            progress: -5.0,
            buffering_bytes: None,
            memory_bytes: None,
            total_size: Some(1_000_000),
            duration_secs: 100.0,
            file_name: None,
        });
        assert!(lines.line1.starts_with("Buffering (0.00%) - 976.56 KiB"));
        assert!(lines.line1.ends_with("(0.08 MBit)"));
        assert_eq!(lines.line3, "Show.S01.Pack");
    }
}
