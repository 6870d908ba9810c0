//! Engine-agnostic torrent interfaces and DTOs.
//!
//! Layout: `model/` (requests, metadata, status snapshots), `service/`
//! (`TorrentEngine` and `TorrentHandle` traits), `error.rs`.

pub mod error;
pub mod model;
pub mod service;

pub use error::{TorrentError, TorrentResult};
pub use model::{
    AddTorrent, AddTorrentOptions, ByteRange, FilePriority, PeerCounts, ReadaheadSnapshot,
    RemoveTorrent, StorageKind, TorrentFile, TorrentMetadata, TorrentProgress, TorrentRateLimit,
    TorrentRates, TorrentSource, TorrentStatus,
};
pub use service::{TorrentEngine, TorrentHandle};
