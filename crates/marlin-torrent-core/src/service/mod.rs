//! Engine and handle traits implemented by torrent adapters.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use marlin_events::EventStream;

use crate::model::{
    AddTorrent, FilePriority, ReadaheadSnapshot, RemoveTorrent, StorageKind, TorrentMetadata,
    TorrentRateLimit, TorrentStatus,
};

/// Primary engine trait implemented by adapters (e.g. libtorrent).
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Admit a new torrent and return its handle. Adding a torrent the engine
    /// already knows returns the existing handle.
    async fn add_torrent(&self, request: AddTorrent) -> anyhow::Result<Arc<dyn TorrentHandle>>;

    /// Look up a torrent the engine is already managing.
    async fn find_torrent(&self, info_hash: &str) -> anyhow::Result<Option<Arc<dyn TorrentHandle>>>;

    /// Remove a torrent from the engine, optionally deleting data.
    async fn remove_torrent(&self, info_hash: &str, options: RemoveTorrent) -> anyhow::Result<()>;

    /// Apply global transfer caps.
    async fn update_limits(&self, limits: TorrentRateLimit) -> anyhow::Result<()> {
        let _ = limits;
        bail!("rate limit updates not supported by this engine");
    }

    /// Whether the download destination can hold `required_bytes` more data
    /// for `info_hash`. Engines without disk accounting report `true`.
    async fn has_free_space(&self, info_hash: &str, required_bytes: u64) -> anyhow::Result<bool> {
        let _ = (info_hash, required_bytes);
        Ok(true)
    }

    /// Subscribe to engine alerts (state changes, finished pieces, metadata).
    fn alerts(&self) -> EventStream;
}

/// Live handle onto a single torrent managed by the engine.
#[async_trait]
pub trait TorrentHandle: Send + Sync {
    /// Info-hash identifying the torrent.
    fn info_hash(&self) -> &str;

    /// Storage backend the torrent was added with.
    fn storage(&self) -> StorageKind;

    /// Metainfo, once it has been received.
    async fn metadata(&self) -> anyhow::Result<Option<TorrentMetadata>>;

    /// Current status snapshot.
    async fn status(&self) -> anyhow::Result<TorrentStatus>;

    /// Availability of each requested piece, in request order.
    async fn have_pieces(&self, pieces: &[u32]) -> anyhow::Result<Vec<bool>>;

    /// Set the download priority of one file.
    async fn set_file_priority(&self, file_index: usize, priority: FilePriority)
    -> anyhow::Result<()>;

    /// Move the given pieces to the front of the download queue.
    async fn prioritize_pieces(&self, pieces: &[u32]) -> anyhow::Result<()>;

    /// Toggle sequential download mode.
    async fn set_sequential(&self, sequential: bool) -> anyhow::Result<()>;

    /// Pause the torrent.
    async fn pause(&self) -> anyhow::Result<()>;

    /// Resume a paused torrent.
    async fn resume(&self) -> anyhow::Result<()>;

    /// Readahead accounting; only memory-backed storage supports it.
    async fn readahead(&self) -> anyhow::Result<ReadaheadSnapshot> {
        bail!("readahead inspection not supported by this storage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TorrentProgress, TorrentRates, TorrentSource};
    use chrono::Utc;
    use marlin_events::{EventBus, TorrentState};

    struct StubHandle;

    #[async_trait]
    impl TorrentHandle for StubHandle {
        fn info_hash(&self) -> &str {
            "stub"
        }

        fn storage(&self) -> StorageKind {
            StorageKind::File
        }

        async fn metadata(&self) -> anyhow::Result<Option<TorrentMetadata>> {
            Ok(None)
        }

        async fn status(&self) -> anyhow::Result<TorrentStatus> {
            Ok(TorrentStatus {
                info_hash: "stub".to_string(),
                name: None,
                state: TorrentState::Queued,
                progress: TorrentProgress::default(),
                rates: TorrentRates::default(),
                peers: crate::model::PeerCounts::default(),
                sequential: false,
                paused: false,
                last_updated: Utc::now(),
            })
        }

        async fn have_pieces(&self, pieces: &[u32]) -> anyhow::Result<Vec<bool>> {
            Ok(vec![false; pieces.len()])
        }

        async fn set_file_priority(
            &self,
            _file_index: usize,
            _priority: FilePriority,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn prioritize_pieces(&self, _pieces: &[u32]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn set_sequential(&self, _sequential: bool) -> anyhow::Result<()> {
            Ok(())
        }

        async fn pause(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn resume(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StubEngine {
        bus: EventBus,
    }

    #[async_trait]
    impl TorrentEngine for StubEngine {
        async fn add_torrent(&self, _request: AddTorrent) -> anyhow::Result<Arc<dyn TorrentHandle>> {
            Ok(Arc::new(StubHandle))
        }

        async fn find_torrent(
            &self,
            _info_hash: &str,
        ) -> anyhow::Result<Option<Arc<dyn TorrentHandle>>> {
            Ok(None)
        }

        async fn remove_torrent(
            &self,
            _info_hash: &str,
            _options: RemoveTorrent,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        fn alerts(&self) -> EventStream {
            self.bus.subscribe(None)
        }
    }

    #[tokio::test]
    async fn default_methods_report_support_levels() -> anyhow::Result<()> {
        let engine = StubEngine {
            bus: EventBus::new(),
        };
        assert!(
            engine
                .update_limits(TorrentRateLimit::unlimited())
                .await
                .is_err()
        );
        assert!(engine.has_free_space("stub", 1_024).await?);

        let handle = engine
            .add_torrent(AddTorrent {
                source: TorrentSource::magnet("magnet:?xt=urn:btih:stub"),
                options: crate::model::AddTorrentOptions::default(),
            })
            .await?;
        assert_eq!(handle.info_hash(), "stub");
        assert!(handle.readahead().await.is_err());
        assert_eq!(handle.have_pieces(&[1, 2]).await?, vec![false, false]);
        Ok(())
    }
}
