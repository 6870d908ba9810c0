//! In-memory collaborators for playback integration tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use marlin_events::{Event, EventBus, EventStream, TorrentState};
use marlin_player::catalog::SeasonSummary;
use marlin_player::{
    ContentIdentity, EpisodeInfo, MetadataCatalog, OverlayStatus, ProgressDialog, ResumePoint,
    ScrobbleAction, SeasonInfo, ShowInfo, StatusLines, UiHost, UpNextPayload, WatchProgress,
    WatchStateService, WatchTimes,
};
use marlin_torrent_core::{
    AddTorrent, FilePriority, PeerCounts, ReadaheadSnapshot, RemoveTorrent, StorageKind,
    TorrentEngine, TorrentHandle, TorrentMetadata, TorrentProgress, TorrentRateLimit,
    TorrentRates, TorrentStatus,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Torrent handle whose metadata and piece availability are set by the test.
pub struct FakeHandle {
    info_hash: String,
    storage: StorageKind,
    metadata: Mutex<Option<TorrentMetadata>>,
    state: Mutex<TorrentState>,
    complete: AtomicBool,
    available: Mutex<BTreeSet<u32>>,
    priorities: Mutex<Vec<(usize, FilePriority)>>,
    prioritized: Mutex<Vec<Vec<u32>>>,
    sequential: Mutex<Option<bool>>,
    readahead: Mutex<Option<ReadaheadSnapshot>>,
}

impl FakeHandle {
    /// Handle for `info_hash` with no metadata and no pieces.
    #[must_use]
    pub fn new(info_hash: &str, storage: StorageKind) -> Self {
        Self {
            info_hash: info_hash.to_string(),
            storage,
            metadata: Mutex::new(None),
            state: Mutex::new(TorrentState::Downloading),
            complete: AtomicBool::new(false),
            available: Mutex::new(BTreeSet::new()),
            priorities: Mutex::new(Vec::new()),
            prioritized: Mutex::new(Vec::new()),
            sequential: Mutex::new(None),
            readahead: Mutex::new(None),
        }
    }

    /// Handle that already knows its metadata.
    #[must_use]
    pub fn with_metadata(info_hash: &str, storage: StorageKind, meta: TorrentMetadata) -> Self {
        let handle = Self::new(info_hash, storage);
        handle.set_metadata(meta);
        handle
    }

    /// Replace the metadata.
    pub fn set_metadata(&self, meta: TorrentMetadata) {
        *lock(&self.metadata) = Some(meta);
    }

    /// Report every piece as downloaded, or none.
    pub fn set_complete(&self, complete: bool) {
        self.complete.store(complete, Ordering::SeqCst);
    }

    /// Mark individual pieces as downloaded.
    pub fn add_pieces(&self, pieces: impl IntoIterator<Item = u32>) {
        lock(&self.available).extend(pieces);
    }

    /// Override the reported torrent state.
    pub fn set_state(&self, state: TorrentState) {
        *lock(&self.state) = state;
    }

    /// Override the readahead snapshot; `None` makes the call fail.
    pub fn set_readahead(&self, readahead: Option<ReadaheadSnapshot>) {
        *lock(&self.readahead) = readahead;
    }

    /// Every file priority write, in order.
    #[must_use]
    pub fn priorities(&self) -> Vec<(usize, FilePriority)> {
        lock(&self.priorities).clone()
    }

    /// Piece lists handed to `prioritize_pieces`, in order.
    #[must_use]
    pub fn prioritized(&self) -> Vec<Vec<u32>> {
        lock(&self.prioritized).clone()
    }

    /// Last sequential mode written.
    #[must_use]
    pub fn sequential(&self) -> Option<bool> {
        *lock(&self.sequential)
    }
}

#[async_trait]
impl TorrentHandle for FakeHandle {
    fn info_hash(&self) -> &str {
        &self.info_hash
    }

    fn storage(&self) -> StorageKind {
        self.storage
    }

    async fn metadata(&self) -> anyhow::Result<Option<TorrentMetadata>> {
        Ok(lock(&self.metadata).clone())
    }

    async fn status(&self) -> anyhow::Result<TorrentStatus> {
        let name = lock(&self.metadata).as_ref().map(|meta| meta.name.clone());
        let complete = self.complete.load(Ordering::SeqCst);
        Ok(TorrentStatus {
            info_hash: self.info_hash.clone(),
            name,
            state: lock(&self.state).clone(),
            progress: TorrentProgress {
                bytes_downloaded: if complete { 100 } else { 0 },
                bytes_total: 100,
            },
            rates: TorrentRates {
                download_bps: 512_000,
                upload_bps: 1_024,
            },
            peers: PeerCounts {
                seeds: 4,
                seeds_total: 12,
                peers: 2,
                peers_total: 9,
            },
            sequential: self.sequential().unwrap_or(false),
            paused: false,
            last_updated: Utc::now(),
        })
    }

    async fn have_pieces(&self, pieces: &[u32]) -> anyhow::Result<Vec<bool>> {
        let complete = self.complete.load(Ordering::SeqCst);
        let available = lock(&self.available);
        Ok(pieces
            .iter()
            .map(|piece| complete || available.contains(piece))
            .collect())
    }

    async fn set_file_priority(
        &self,
        file_index: usize,
        priority: FilePriority,
    ) -> anyhow::Result<()> {
        lock(&self.priorities).push((file_index, priority));
        Ok(())
    }

    async fn prioritize_pieces(&self, pieces: &[u32]) -> anyhow::Result<()> {
        lock(&self.prioritized).push(pieces.to_vec());
        Ok(())
    }

    async fn set_sequential(&self, sequential: bool) -> anyhow::Result<()> {
        *lock(&self.sequential) = Some(sequential);
        Ok(())
    }

    async fn pause(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn resume(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn readahead(&self) -> anyhow::Result<ReadaheadSnapshot> {
        match *lock(&self.readahead) {
            Some(readahead) => Ok(readahead),
            None => bail!("readahead not configured"),
        }
    }
}

/// Engine serving a single [`FakeHandle`].
pub struct FakeEngine {
    bus: EventBus,
    handle: Arc<FakeHandle>,
    known: AtomicBool,
    free_space: AtomicBool,
    added: AtomicUsize,
    adds: Mutex<Vec<AddTorrent>>,
    removals: Mutex<Vec<(String, RemoveTorrent)>>,
    limits: Mutex<Vec<TorrentRateLimit>>,
}

impl FakeEngine {
    /// Engine whose `add_torrent` returns `handle`.
    #[must_use]
    pub fn new(handle: Arc<FakeHandle>) -> Self {
        Self {
            bus: EventBus::new(),
            handle,
            known: AtomicBool::new(false),
            free_space: AtomicBool::new(true),
            added: AtomicUsize::new(0),
            adds: Mutex::new(Vec::new()),
            removals: Mutex::new(Vec::new()),
            limits: Mutex::new(Vec::new()),
        }
    }

    /// Handle served by the engine.
    #[must_use]
    pub fn handle(&self) -> Arc<FakeHandle> {
        Arc::clone(&self.handle)
    }

    /// Alert bus of the engine.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Make `find_torrent` return the handle.
    pub fn set_known(&self, known: bool) {
        self.known.store(known, Ordering::SeqCst);
    }

    /// Answer for `has_free_space`.
    pub fn set_free_space(&self, free: bool) {
        self.free_space.store(free, Ordering::SeqCst);
    }

    /// Number of `add_torrent` calls.
    #[must_use]
    pub fn added(&self) -> usize {
        self.added.load(Ordering::SeqCst)
    }

    /// Requests passed to `add_torrent`.
    #[must_use]
    pub fn adds(&self) -> Vec<AddTorrent> {
        lock(&self.adds).clone()
    }

    /// Every `remove_torrent` call, in order.
    #[must_use]
    pub fn removals(&self) -> Vec<(String, RemoveTorrent)> {
        lock(&self.removals).clone()
    }

    /// Every rate limit applied, in order.
    #[must_use]
    pub fn limits(&self) -> Vec<TorrentRateLimit> {
        lock(&self.limits).clone()
    }

    /// Publish a metadata alert for the served handle.
    pub fn announce_metadata(&self) {
        let files = lock(&self.handle.metadata)
            .as_ref()
            .map_or(0, |meta| meta.files.len());
        self.bus.publish(Event::MetadataReceived {
            info_hash: self.handle.info_hash().to_string(),
            files,
        });
    }
}

#[async_trait]
impl TorrentEngine for FakeEngine {
    async fn add_torrent(&self, request: AddTorrent) -> anyhow::Result<Arc<dyn TorrentHandle>> {
        self.added.fetch_add(1, Ordering::SeqCst);
        lock(&self.adds).push(request);
        self.known.store(true, Ordering::SeqCst);
        let handle: Arc<dyn TorrentHandle> = self.handle.clone();
        Ok(handle)
    }

    async fn find_torrent(&self, info_hash: &str) -> anyhow::Result<Option<Arc<dyn TorrentHandle>>> {
        if self.known.load(Ordering::SeqCst) && info_hash == self.handle.info_hash() {
            let handle: Arc<dyn TorrentHandle> = self.handle.clone();
            return Ok(Some(handle));
        }
        Ok(None)
    }

    async fn remove_torrent(&self, info_hash: &str, options: RemoveTorrent) -> anyhow::Result<()> {
        lock(&self.removals).push((info_hash.to_string(), options));
        self.known.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn update_limits(&self, limits: TorrentRateLimit) -> anyhow::Result<()> {
        lock(&self.limits).push(limits);
        Ok(())
    }

    async fn has_free_space(&self, _info_hash: &str, _required_bytes: u64) -> anyhow::Result<bool> {
        Ok(self.free_space.load(Ordering::SeqCst))
    }

    fn alerts(&self) -> EventStream {
        self.bus.subscribe(None)
    }
}

/// Progress dialog recording what it was shown.
#[derive(Default)]
pub struct ScriptedDialog {
    cancelled: AtomicBool,
    closed: AtomicBool,
    updates: Mutex<Vec<(u8, StatusLines)>>,
}

impl ScriptedDialog {
    /// Simulate the cancel button.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the dialog was dismissed.
    #[must_use]
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Percentages shown, in order.
    #[must_use]
    pub fn percents(&self) -> Vec<u8> {
        lock(&self.updates).iter().map(|(percent, _)| *percent).collect()
    }

    /// Last lines shown.
    #[must_use]
    pub fn last_lines(&self) -> Option<StatusLines> {
        lock(&self.updates).last().map(|(_, lines)| lines.clone())
    }
}

impl ProgressDialog for ScriptedDialog {
    fn update(&self, percent: u8, lines: &StatusLines) {
        lock(&self.updates).push((percent, lines.clone()));
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Overlay counting visibility changes.
#[derive(Default)]
pub struct RecordingOverlay {
    shown: AtomicUsize,
    hidden: AtomicUsize,
    closed: AtomicBool,
}

impl RecordingOverlay {
    /// Times `show` was called.
    #[must_use]
    pub fn shown(&self) -> usize {
        self.shown.load(Ordering::SeqCst)
    }

    /// Times `hide` was called.
    #[must_use]
    pub fn hidden(&self) -> usize {
        self.hidden.load(Ordering::SeqCst)
    }

    /// Whether the overlay was released.
    #[must_use]
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl OverlayStatus for RecordingOverlay {
    fn update(&self, _percent: u8, _lines: &StatusLines) {}

    fn show(&self) {
        self.shown.fetch_add(1, Ordering::SeqCst);
    }

    fn hide(&self) {
        self.hidden.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// UI host driven by the test.
#[derive(Default)]
pub struct ScriptedHost {
    playing: AtomicBool,
    paused: AtomicBool,
    confirm: AtomicBool,
    watch_times: Mutex<Option<WatchTimes>>,
    selection: Mutex<Option<usize>>,
    selections: Mutex<Vec<Vec<String>>>,
    notifications: Mutex<Vec<(String, String)>>,
    up_next: Mutex<Vec<UpNextPayload>>,
    subtitles: Mutex<Vec<String>>,
    dialog: Arc<ScriptedDialog>,
    overlay: Arc<RecordingOverlay>,
}

impl ScriptedHost {
    /// Host with nothing playing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dialog handed out by `new_progress_dialog`.
    #[must_use]
    pub fn dialog(&self) -> Arc<ScriptedDialog> {
        Arc::clone(&self.dialog)
    }

    /// Overlay handed out by `new_overlay`.
    #[must_use]
    pub fn overlay(&self) -> Arc<RecordingOverlay> {
        Arc::clone(&self.overlay)
    }

    /// Report the player as running or stopped.
    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    /// Report the player as paused or not.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Answer for `confirm`.
    pub fn set_confirm(&self, answer: bool) {
        self.confirm.store(answer, Ordering::SeqCst);
    }

    /// Position and duration reported to the session.
    pub fn set_watch_times(&self, watched_secs: f64, duration_secs: f64) {
        *lock(&self.watch_times) = Some(WatchTimes {
            watched_secs,
            duration_secs,
        });
    }

    /// Answer for `select`.
    pub fn set_selection(&self, selection: Option<usize>) {
        *lock(&self.selection) = selection;
    }

    /// Item lists offered through `select`.
    #[must_use]
    pub fn selections(&self) -> Vec<Vec<String>> {
        lock(&self.selections).clone()
    }

    /// Notifications shown, as `(title, message)`.
    #[must_use]
    pub fn notifications(&self) -> Vec<(String, String)> {
        lock(&self.notifications).clone()
    }

    /// Up-next payloads received.
    #[must_use]
    pub fn up_next_payloads(&self) -> Vec<UpNextPayload> {
        lock(&self.up_next).clone()
    }

    /// Sidecar URLs attached to the player.
    #[must_use]
    pub fn subtitles(&self) -> Vec<String> {
        lock(&self.subtitles).clone()
    }
}

#[async_trait]
impl UiHost for ScriptedHost {
    async fn new_progress_dialog(&self, _title: &str) -> Option<Arc<dyn ProgressDialog>> {
        let dialog: Arc<dyn ProgressDialog> = self.dialog.clone();
        Some(dialog)
    }

    async fn new_overlay(&self) -> Option<Arc<dyn OverlayStatus>> {
        let overlay: Arc<dyn OverlayStatus> = self.overlay.clone();
        Some(overlay)
    }

    async fn confirm(&self, _title: &str, _message: &str) -> bool {
        self.confirm.load(Ordering::SeqCst)
    }

    async fn select(&self, _title: &str, items: &[String]) -> Option<usize> {
        lock(&self.selections).push(items.to_vec());
        *lock(&self.selection)
    }

    async fn notify(&self, title: &str, message: &str) {
        lock(&self.notifications).push((title.to_string(), message.to_string()));
    }

    async fn set_subtitles(&self, urls: &[String]) {
        lock(&self.subtitles).extend_from_slice(urls);
    }

    async fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    async fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn watch_times(&self) -> Option<WatchTimes> {
        *lock(&self.watch_times)
    }

    async fn up_next(&self, payload: &UpNextPayload) {
        lock(&self.up_next).push(payload.clone());
    }
}

/// Watch-state service recording every call.
#[derive(Default)]
pub struct RecordingWatchState {
    resume: Mutex<Option<ResumePoint>>,
    scrobbles: Mutex<Vec<ScrobbleAction>>,
    watched: Mutex<Vec<ContentIdentity>>,
}

impl RecordingWatchState {
    /// Position returned by `resume_point`.
    pub fn set_resume(&self, point: Option<ResumePoint>) {
        *lock(&self.resume) = point;
    }

    /// Scrobble actions, in order.
    #[must_use]
    pub fn scrobbles(&self) -> Vec<ScrobbleAction> {
        lock(&self.scrobbles).clone()
    }

    /// Identities marked watched.
    #[must_use]
    pub fn watched(&self) -> Vec<ContentIdentity> {
        lock(&self.watched).clone()
    }
}

#[async_trait]
impl WatchStateService for RecordingWatchState {
    async fn scrobble(
        &self,
        action: ScrobbleAction,
        _identity: &ContentIdentity,
        _progress: WatchProgress,
    ) -> anyhow::Result<()> {
        lock(&self.scrobbles).push(action);
        Ok(())
    }

    async fn set_watched(
        &self,
        identity: &ContentIdentity,
        _progress: WatchProgress,
    ) -> anyhow::Result<()> {
        lock(&self.watched).push(identity.clone());
        Ok(())
    }

    async fn resume_point(&self, _identity: &ContentIdentity) -> anyhow::Result<Option<ResumePoint>> {
        Ok(*lock(&self.resume))
    }
}

/// Catalog backed by fixed shows.
#[derive(Default)]
pub struct StaticCatalog {
    shows: HashMap<u64, ShowInfo>,
    seasons: HashMap<(u64, u32), SeasonInfo>,
}

impl StaticCatalog {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a show whose season `n` (1-based) has `episode_counts[n - 1]`
    /// episodes. Episode ids are `show_id * 1000 + season * 100 + episode`.
    #[must_use]
    pub fn with_series(mut self, show_id: u64, name: &str, episode_counts: &[u32]) -> Self {
        let mut summaries = Vec::new();
        for (number, count) in (1_u32..).zip(episode_counts.iter().copied()) {
            summaries.push(SeasonSummary {
                number,
                episode_count: count,
            });
            let episodes = (1..=count)
                .map(|episode| EpisodeInfo {
                    id: show_id * 1_000 + u64::from(number) * 100 + u64::from(episode),
                    season: number,
                    episode,
                    name: format!("Episode {episode}"),
                    overview: format!("Season {number}, episode {episode}."),
                    air_date: Some("2023-09-01".to_string()),
                    runtime_mins: 45,
                    rating: 7.9,
                    absolute_number: None,
                })
                .collect();
            self.seasons.insert(
                (show_id, number),
                SeasonInfo {
                    number,
                    episodes,
                },
            );
        }
        self.shows.insert(
            show_id,
            ShowInfo {
                id: show_id,
                name: name.to_string(),
                original_name: name.to_string(),
                is_anime: false,
                seasons: summaries,
            },
        );
        self
    }
}

#[async_trait]
impl MetadataCatalog for StaticCatalog {
    async fn show(&self, show_id: u64) -> anyhow::Result<Option<ShowInfo>> {
        Ok(self.shows.get(&show_id).cloned())
    }

    async fn season(&self, show_id: u64, season: u32) -> anyhow::Result<Option<SeasonInfo>> {
        Ok(self.seasons.get(&(show_id, season)).cloned())
    }
}
