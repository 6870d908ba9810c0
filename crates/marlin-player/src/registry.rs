//! Process-wide registry of torrents attached to playback sessions.
//!
//! # Design
//! - One entry per info-hash with an attach count, so the last session to
//!   detach decides whether the torrent is removed.
//! - Each entry owns the async lock serializing priority writes across
//!   sessions sharing the handle.
//! - A torrent kept for next-file playback arms a leave timer; attaching a new
//!   session cancels it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use marlin_events::{Event, EventBus};
use marlin_torrent_core::{RemoveTorrent, TorrentEngine, TorrentHandle};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct Entry {
    handle: Arc<dyn TorrentHandle>,
    attached: usize,
    priority_lock: Arc<tokio::sync::Mutex<()>>,
    leave_timer: Option<JoinHandle<()>>,
    has_next_file: bool,
}

impl Entry {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.leave_timer.take() {
            timer.abort();
        }
    }
}

/// Torrents currently used by playback sessions, keyed by info-hash.
#[derive(Clone, Default)]
pub struct TorrentRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl TorrentRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().expect("torrent registry mutex poisoned")
    }

    /// Register a session on `handle` and return the new attach count.
    /// A pending leave timer is cancelled and the next-file flag cleared.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex has been poisoned.
    pub fn attach(&self, handle: Arc<dyn TorrentHandle>) -> usize {
        let mut entries = self.lock();
        let entry = entries
            .entry(handle.info_hash().to_string())
            .or_insert_with(|| Entry {
                handle: Arc::clone(&handle),
                attached: 0,
                priority_lock: Arc::new(tokio::sync::Mutex::new(())),
                leave_timer: None,
                has_next_file: false,
            });
        entry.cancel_timer();
        entry.has_next_file = false;
        entry.attached += 1;
        entry.attached
    }

    /// Unregister a session and return the remaining attach count.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex has been poisoned.
    pub fn detach(&self, info_hash: &str) -> usize {
        self.lock().get_mut(info_hash).map_or(0, |entry| {
            entry.attached = entry.attached.saturating_sub(1);
            entry.attached
        })
    }

    /// Sessions attached to `info_hash`.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex has been poisoned.
    #[must_use]
    pub fn attached(&self, info_hash: &str) -> usize {
        self.lock().get(info_hash).map_or(0, |entry| entry.attached)
    }

    /// Handle registered for `info_hash`.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex has been poisoned.
    #[must_use]
    pub fn handle(&self, info_hash: &str) -> Option<Arc<dyn TorrentHandle>> {
        self.lock()
            .get(info_hash)
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// Lock serializing priority and sequential writes on `info_hash`.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex has been poisoned.
    #[must_use]
    pub fn priority_lock(&self, info_hash: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.lock().get(info_hash).map_or_else(
            || Arc::new(tokio::sync::Mutex::new(())),
            |entry| Arc::clone(&entry.priority_lock),
        )
    }

    /// Record whether a next file has been pre-buffered.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex has been poisoned.
    pub fn set_has_next_file(&self, info_hash: &str, ready: bool) {
        if let Some(entry) = self.lock().get_mut(info_hash) {
            entry.has_next_file = ready;
        }
    }

    /// Whether a next file has been pre-buffered.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex has been poisoned.
    #[must_use]
    pub fn has_next_file(&self, info_hash: &str) -> bool {
        self.lock()
            .get(info_hash)
            .is_some_and(|entry| entry.has_next_file)
    }

    /// Keep the torrent for `timeout`, then remove it (data kept) unless a
    /// session attached in the meantime.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex has been poisoned.
    pub fn arm_leave_timer(
        &self,
        info_hash: &str,
        engine: Arc<dyn TorrentEngine>,
        bus: EventBus,
        timeout: Duration,
    ) {
        let registry = self.clone();
        let hash = info_hash.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = {
                let mut entries = registry.lock();
                let idle = entries.get(&hash).is_some_and(|entry| entry.attached == 0);
                if idle {
                    entries.remove(&hash);
                }
                idle
            };
            if !expired {
                return;
            }
            info!(info_hash = %hash, "leave timer expired, removing torrent");
            match engine
                .remove_torrent(&hash, RemoveTorrent { with_data: false })
                .await
            {
                Ok(()) => {
                    bus.publish(Event::TorrentRemoved {
                        info_hash: hash,
                        with_data: false,
                    });
                }
                Err(err) => warn!(error = %err, info_hash = %hash, "failed to remove torrent"),
            }
        });
        if let Some(entry) = self.lock().get_mut(info_hash) {
            entry.cancel_timer();
            entry.leave_timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    /// Whether a leave timer is pending for `info_hash`.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex has been poisoned.
    #[must_use]
    pub fn has_leave_timer(&self, info_hash: &str) -> bool {
        self.lock()
            .get(info_hash)
            .is_some_and(|entry| entry.leave_timer.as_ref().is_some_and(|t| !t.is_finished()))
    }

    /// Drop the entry for `info_hash`, cancelling its timer.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex has been poisoned.
    pub fn remove(&self, info_hash: &str) -> bool {
        self.lock().remove(info_hash).is_some_and(|mut entry| {
            entry.cancel_timer();
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use marlin_events::EventStream;
    use marlin_torrent_core::{
        AddTorrent, FilePriority, StorageKind, TorrentMetadata, TorrentStatus,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Handle(&'static str);

    #[async_trait]
    impl TorrentHandle for Handle {
        fn info_hash(&self) -> &str {
            self.0
        }

        fn storage(&self) -> StorageKind {
            StorageKind::File
        }

        async fn metadata(&self) -> anyhow::Result<Option<TorrentMetadata>> {
            Ok(None)
        }

        async fn status(&self) -> anyhow::Result<TorrentStatus> {
            anyhow::bail!("not tracked")
        }

        async fn have_pieces(&self, pieces: &[u32]) -> anyhow::Result<Vec<bool>> {
            Ok(vec![true; pieces.len()])
        }

        async fn set_file_priority(&self, _: usize, _: FilePriority) -> anyhow::Result<()> {
            Ok(())
        }

        async fn prioritize_pieces(&self, _: &[u32]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn set_sequential(&self, _: bool) -> anyhow::Result<()> {
            Ok(())
        }

        async fn pause(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn resume(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingEngine {
        bus: EventBus,
        removed: AtomicUsize,
    }

    #[async_trait]
    impl TorrentEngine for CountingEngine {
        async fn add_torrent(&self, _: AddTorrent) -> anyhow::Result<Arc<dyn TorrentHandle>> {
            Ok(Arc::new(Handle("abc")))
        }

        async fn find_torrent(&self, _: &str) -> anyhow::Result<Option<Arc<dyn TorrentHandle>>> {
            Ok(None)
        }

        async fn remove_torrent(&self, _: &str, _: RemoveTorrent) -> anyhow::Result<()> {
            self.removed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn alerts(&self) -> EventStream {
            self.bus.subscribe(None)
        }
    }

    #[test]
    fn attach_counts_are_tracked_per_hash() {
        let registry = TorrentRegistry::new();
        assert_eq!(registry.attach(Arc::new(Handle("abc"))), 1);
        assert_eq!(registry.attach(Arc::new(Handle("abc"))), 2);
        assert_eq!(registry.attach(Arc::new(Handle("def"))), 1);
        assert_eq!(registry.detach("abc"), 1);
        assert_eq!(registry.attached("abc"), 1);
        assert_eq!(registry.detach("missing"), 0);
        assert!(registry.handle("def").is_some());
        assert!(registry.remove("def"));
        assert!(!registry.remove("def"));
    }

    #[tokio::test]
    async fn priority_lock_is_shared_per_torrent() {
        let registry = TorrentRegistry::new();
        registry.attach(Arc::new(Handle("abc")));
        let first = registry.priority_lock("abc");
        let second = registry.priority_lock("abc");
        assert!(Arc::ptr_eq(&first, &second));
        let _guard = first.lock().await;
        assert!(second.try_lock().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn leave_timer_removes_idle_torrent() {
        let registry = TorrentRegistry::new();
        let engine = Arc::new(CountingEngine::default());
        registry.attach(Arc::new(Handle("abc")));
        registry.set_has_next_file("abc", true);
        registry.detach("abc");
        registry.arm_leave_timer("abc", engine.clone(), engine.bus.clone(), Duration::from_secs(5));
        assert!(registry.has_leave_timer("abc"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(engine.removed.load(Ordering::SeqCst), 1);
        assert!(registry.handle("abc").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn attaching_cancels_leave_timer() {
        let registry = TorrentRegistry::new();
        let engine = Arc::new(CountingEngine::default());
        registry.attach(Arc::new(Handle("abc")));
        registry.set_has_next_file("abc", true);
        registry.detach("abc");
        registry.arm_leave_timer("abc", engine.clone(), engine.bus.clone(), Duration::from_secs(5));
        registry.attach(Arc::new(Handle("abc")));
        assert!(!registry.has_leave_timer("abc"));
        assert!(!registry.has_next_file("abc"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(engine.removed.load(Ordering::SeqCst), 0);
        assert_eq!(registry.attached("abc"), 1);
    }
}
