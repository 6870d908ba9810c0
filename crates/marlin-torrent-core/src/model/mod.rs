//! Core torrent domain types and DTOs shared across the workspace.

use std::ops::Range;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use marlin_events::TorrentState;
use serde::{Deserialize, Serialize};

use crate::error::{TorrentError, TorrentResult};

/// Source describing how a torrent should be added to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TorrentSource {
    /// Represents a magnet URI that should be fetched.
    Magnet {
        /// Magnet URI to resolve and add.
        uri: String,
    },
    /// Remote `.torrent` file to download before admission.
    Url {
        /// HTTP(S) location of the metainfo file.
        url: String,
    },
    /// Local `.torrent` file.
    File {
        /// Path to the metainfo file on disk.
        path: PathBuf,
    },
}

impl TorrentSource {
    #[must_use]
    /// Convenience constructor for magnet-based sources.
    pub fn magnet(uri: impl Into<String>) -> Self {
        Self::Magnet { uri: uri.into() }
    }

    /// Interpret a play URI as a torrent source.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::InvalidSource`] when `uri` is blank.
    pub fn parse(uri: &str) -> TorrentResult<Self> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(TorrentError::InvalidSource {
                uri: uri.to_string(),
            });
        }
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("magnet:") {
            Ok(Self::magnet(trimmed))
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(Self::Url {
                url: trimmed.to_string(),
            })
        } else {
            Ok(Self::File {
                path: PathBuf::from(trimmed.trim_start_matches("file://")),
            })
        }
    }
}

/// Where the engine keeps downloaded pieces.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Pieces are written to the download directory.
    #[default]
    File,
    /// Pieces live in a bounded in-memory readahead buffer.
    Memory,
}

/// Request payload for admitting a torrent into the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTorrent {
    /// How the torrent should be retrieved.
    pub source: TorrentSource,
    #[serde(default)]
    /// Optional knobs applied alongside admission.
    pub options: AddTorrentOptions,
}

/// Optional knobs that accompany a torrent admission request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AddTorrentOptions {
    /// Optional override for the download root.
    pub download_dir: Option<String>,
    #[serde(default)]
    /// Storage backend for this torrent.
    pub storage: StorageKind,
    #[serde(default)]
    /// Add the torrent in a paused state.
    pub paused: bool,
}

/// Global transfer caps. `None` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TorrentRateLimit {
    /// Maximum download rate in bytes per second.
    pub download_bps: Option<u64>,
    /// Maximum upload rate in bytes per second.
    pub upload_bps: Option<u64>,
}

impl TorrentRateLimit {
    /// Limits that lift both caps.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            download_bps: None,
            upload_bps: None,
        }
    }

    /// Whether neither direction is capped.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.download_bps.is_none() && self.upload_bps.is_none()
    }
}

/// Priority level recognized by the engine.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FilePriority {
    /// Do not download the file.
    Skip,
    /// Throttle the download priority.
    Low,
    /// Default priority level assigned by the engine.
    #[default]
    Normal,
    /// Highest available priority for urgent files.
    High,
}

/// Options controlling how the engine removes torrents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RemoveTorrent {
    #[serde(default)]
    /// Whether to remove on-disk data alongside the torrent metadata.
    pub with_data: bool,
}

/// Lightweight transfer statistics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TorrentRates {
    #[serde(default)]
    /// Current payload download rate in bytes per second.
    pub download_bps: u64,
    #[serde(default)]
    /// Current payload upload rate in bytes per second.
    pub upload_bps: u64,
}

/// Connected and known swarm members.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PeerCounts {
    /// Connected seeds.
    pub seeds: u32,
    /// Seeds known to the swarm.
    pub seeds_total: u32,
    /// Connected peers.
    pub peers: u32,
    /// Peers known to the swarm.
    pub peers_total: u32,
}

/// Aggregated progress metrics for a torrent.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TorrentProgress {
    /// Total bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Total bytes expected for completion.
    pub bytes_total: u64,
}

impl TorrentProgress {
    #[must_use]
    /// Calculate the completion percentage (0-100).
    pub fn percent_complete(&self) -> f64 {
        if self.bytes_total == 0 {
            0.0
        } else {
            (to_f64(self.bytes_downloaded) / to_f64(self.bytes_total)) * 100.0
        }
    }
}

const fn to_f64(value: u64) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "u64 to f64 conversion is required for user-facing percentage reporting"
    )]
    {
        value as f64
    }
}

/// Half-open byte range `[start, end)` within the torrent payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte covered.
    pub start: u64,
    /// One past the last byte covered.
    pub end: u64,
}

impl ByteRange {
    /// Range of `len` bytes starting at `start`.
    #[must_use]
    pub const fn at(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    /// Number of bytes covered.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range covers no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Individual file exposed by a torrent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TorrentFile {
    /// Index of the file within the torrent metainfo.
    pub index: usize,
    /// Relative path of the file within the torrent payload.
    pub path: String,
    /// Total size of the file in bytes.
    pub size_bytes: u64,
    /// Byte offset of the file within the concatenated payload.
    pub offset: u64,
}

impl TorrentFile {
    /// Final path component.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.path.as_str())
    }

    /// Payload range occupied by the file.
    #[must_use]
    pub const fn range(&self) -> ByteRange {
        ByteRange::at(self.offset, self.size_bytes)
    }
}

/// Torrent metainfo needed for piece arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TorrentMetadata {
    /// Display name of the torrent.
    pub name: String,
    /// Nominal piece length in bytes.
    pub piece_length: u64,
    /// Payload size in bytes.
    pub total_size: u64,
    /// Files in metainfo order; indices are stable for the handle lifetime.
    pub files: Vec<TorrentFile>,
}

impl TorrentMetadata {
    /// Number of pieces in the payload.
    #[must_use]
    pub const fn num_pieces(&self) -> u32 {
        if self.piece_length == 0 {
            return 0;
        }
        saturate_piece(self.total_size.div_ceil(self.piece_length))
    }

    /// Piece containing byte `offset`.
    #[must_use]
    pub const fn piece_at(&self, offset: u64) -> u32 {
        if self.piece_length == 0 {
            return 0;
        }
        saturate_piece(offset / self.piece_length)
    }

    /// Pieces overlapping `range`, clamped to the payload.
    #[must_use]
    pub fn pieces_for_range(&self, range: ByteRange) -> Range<u32> {
        let end = range.end.min(self.total_size);
        if self.piece_length == 0 || end <= range.start {
            return 0..0;
        }
        self.piece_at(range.start)..self.piece_at(end - 1) + 1
    }

    /// Exact size of `piece`; the final piece may be short.
    #[must_use]
    pub fn piece_size(&self, piece: u32) -> u64 {
        let start = u64::from(piece) * self.piece_length;
        if start >= self.total_size {
            return 0;
        }
        self.piece_length.min(self.total_size - start)
    }

    /// File at metainfo index `index`.
    #[must_use]
    pub fn file(&self, index: usize) -> Option<&TorrentFile> {
        self.files.iter().find(|file| file.index == index)
    }
}

const fn saturate_piece(value: u64) -> u32 {
    if value > u32::MAX as u64 {
        u32::MAX
    } else {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "value is bounds-checked against u32::MAX above"
        )]
        {
            value as u32
        }
    }
}

/// Readahead accounting for memory-backed storage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ReadaheadSnapshot {
    /// Configured readahead capacity in bytes.
    pub capacity_bytes: u64,
    /// Sum of readahead demanded by every active reader.
    pub readers_demand_bytes: u64,
    /// Pieces a reader is currently blocked on.
    pub awaiting_pieces: usize,
}

/// High-level torrent status reported by a handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentStatus {
    /// Info-hash of the torrent.
    pub info_hash: String,
    /// Optional human-readable name for the torrent.
    pub name: Option<String>,
    /// Current lifecycle state.
    pub state: TorrentState,
    /// Progress snapshot associated with the torrent.
    pub progress: TorrentProgress,
    /// Payload transfer rates.
    pub rates: TorrentRates,
    /// Swarm connection counts.
    pub peers: PeerCounts,
    /// Whether sequential download is enabled.
    pub sequential: bool,
    /// Whether the torrent is paused.
    pub paused: bool,
    /// Timestamp of the snapshot.
    pub last_updated: DateTime<Utc>,
}
