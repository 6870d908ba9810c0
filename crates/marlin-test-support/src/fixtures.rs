//! Metadata builders, settings presets and the session harness.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use marlin_config::PlayerSettings;
use marlin_events::{Event, EventBus};
use marlin_player::{MemoryCache, MetadataCatalog, PlayerService, SessionDeps, TorrentRegistry};
use marlin_telemetry::Metrics;
use marlin_torrent_core::{StorageKind, TorrentFile, TorrentMetadata};

use crate::mocks::{FakeEngine, FakeHandle, RecordingWatchState, ScriptedHost, StaticCatalog};

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Info-hash used by the canned torrents.
pub const INFO_HASH: &str = "c9e15763f722f23e98a29decdfae341b98d53056";

/// Show id used by [`season_pack`] catalogs.
pub const SHOW_ID: u64 = 4_242;

const DRAIN_TIMEOUT: Duration = Duration::from_millis(50);

/// Magnet link for `info_hash`.
#[must_use]
pub fn magnet(info_hash: &str) -> String {
    format!("magnet:?xt=urn:btih:{info_hash}")
}

/// Metadata laying `files` out back to back.
#[must_use]
pub fn metadata(name: &str, piece_length: u64, files: &[(&str, u64)]) -> TorrentMetadata {
    let mut offset = 0;
    let files: Vec<TorrentFile> = files
        .iter()
        .enumerate()
        .map(|(index, (path, size_bytes))| {
            let file = TorrentFile {
                index,
                path: (*path).to_string(),
                size_bytes: *size_bytes,
                offset,
            };
            offset += size_bytes;
            file
        })
        .collect();
    TorrentMetadata {
        name: name.to_string(),
        piece_length,
        total_size: offset,
        files,
    }
}

/// Three 64 MiB episodes with 1 MiB pieces and a subtitle for the second.
#[must_use]
pub fn season_pack() -> TorrentMetadata {
    metadata(
        "Harbor.Lights.S01",
        MIB,
        &[
            ("Harbor.Lights.S01/Harbor.Lights.S01E01.1080p.mkv", 64 * MIB),
            ("Harbor.Lights.S01/Harbor.Lights.S01E02.1080p.mkv", 64 * MIB),
            ("Harbor.Lights.S01/Harbor.Lights.S01E02.1080p.srt", 64 * 1024),
            ("Harbor.Lights.S01/Harbor.Lights.S01E03.1080p.mkv", 64 * MIB),
        ],
    )
}

/// A single RAR volume holding one film.
#[must_use]
pub fn rar_release() -> TorrentMetadata {
    metadata(
        "Quiet.Orbit.2021",
        MIB,
        &[
            ("Quiet.Orbit.2021/quiet.orbit.2021.rar", 48 * MIB),
            ("Quiet.Orbit.2021/quiet.orbit.2021.nfo", 4 * 1024),
        ],
    )
}

/// Catalog knowing the show of [`season_pack`].
#[must_use]
pub fn season_catalog() -> StaticCatalog {
    StaticCatalog::new().with_series(SHOW_ID, "Harbor Lights", &[3, 8])
}

/// Settings with small buffers and short timers, downloading into
/// `download_path`.
#[must_use]
pub fn settings(download_path: &Path) -> PlayerSettings {
    PlayerSettings {
        buffer_size_bytes: 4 * MIB,
        end_buffer_size_bytes: MIB,
        buffer_timeout_secs: 5,
        space_check_delay_ms: 100,
        leave_torrent_timeout_secs: 30,
        download_path: download_path.to_path_buf(),
        ..PlayerSettings::default()
    }
}

/// Every event published on `bus` so far, oldest first.
pub async fn drain_events(bus: &EventBus) -> Vec<Event> {
    let mut stream = bus.subscribe(Some(0));
    let mut events = Vec::new();
    while let Ok(Some(envelope)) = tokio::time::timeout(DRAIN_TIMEOUT, stream.next()).await {
        events.push(envelope.event);
    }
    events
}

/// Fakes wired into a [`SessionDeps`].
pub struct Harness {
    /// Engine serving the torrent.
    pub engine: Arc<FakeEngine>,
    /// Handle of the torrent.
    pub handle: Arc<FakeHandle>,
    /// UI host.
    pub host: Arc<ScriptedHost>,
    /// Watch-state service.
    pub watch: Arc<RecordingWatchState>,
    /// Resume and link cache.
    pub cache: Arc<MemoryCache>,
    /// Metrics registry shared with the sessions.
    pub metrics: Option<Metrics>,
    /// Collaborators for sessions.
    pub deps: SessionDeps,
}

impl Harness {
    /// Harness serving `meta` from a file-backed torrent.
    #[must_use]
    pub fn new(
        meta: TorrentMetadata,
        catalog: impl MetadataCatalog + 'static,
        settings: PlayerSettings,
    ) -> Self {
        Self::with_storage(meta, StorageKind::File, catalog, settings)
    }

    /// Harness serving `meta` from a torrent using `storage`.
    #[must_use]
    pub fn with_storage(
        meta: TorrentMetadata,
        storage: StorageKind,
        catalog: impl MetadataCatalog + 'static,
        settings: PlayerSettings,
    ) -> Self {
        let handle = Arc::new(FakeHandle::with_metadata(INFO_HASH, storage, meta));
        let engine = Arc::new(FakeEngine::new(Arc::clone(&handle)));
        let host = Arc::new(ScriptedHost::new());
        let watch = Arc::new(RecordingWatchState::default());
        let cache = Arc::new(MemoryCache::new());
        let metrics = Metrics::new().ok();
        let deps = SessionDeps {
            engine: engine.clone(),
            host: host.clone(),
            watch: watch.clone(),
            catalog: Arc::new(catalog),
            cache: cache.clone(),
            settings: Arc::new(settings),
            registry: TorrentRegistry::new(),
            bus: EventBus::new(),
            metrics: metrics.clone(),
        };
        Self {
            engine,
            handle,
            host,
            watch,
            cache,
            metrics,
            deps,
        }
    }

    /// Service over the harness collaborators.
    #[must_use]
    pub fn service(&self) -> PlayerService {
        PlayerService::new(self.deps.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_lays_files_out_back_to_back() {
        let meta = season_pack();
        assert_eq!(meta.files.len(), 4);
        assert_eq!(meta.files[1].offset, 64 * MIB);
        assert_eq!(meta.files[3].offset, 128 * MIB + 64 * 1024);
        assert_eq!(meta.total_size, 192 * MIB + 64 * 1024);
    }

    #[test]
    fn settings_point_at_download_path() {
        let settings = settings(Path::new("/tmp/marlin"));
        assert_eq!(settings.download_path, Path::new("/tmp/marlin"));
        assert_eq!(settings.buffer_size_bytes, 4 * MIB);
    }
}
