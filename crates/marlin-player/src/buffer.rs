//! Buffer windows and the buffering controller.
//!
//! # Design
//! - A cycle buffers one file: the head and tail windows of a video, or the
//!   whole archive followed by extraction.
//! - Priority and sequential writes run under the registry's per-torrent lock.
//! - Completion is delivered through the controller's broadcast signal exactly
//!   once per cycle; later finish attempts are ignored.
//! - Reported progress only grows within one progress kind.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use marlin_config::PlayerSettings;
use marlin_events::{Broadcaster, Event, Listener, TorrentState};
use marlin_torrent_core::{
    ByteRange, FilePriority, StorageKind, TorrentFile, TorrentHandle, TorrentMetadata,
};
use serde::{Deserialize, Serialize};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::candidates::{ChosenFile, find_subtitles_file};
use crate::closer::Closer;
use crate::error::{PlayerError, PlayerResult};
use crate::extract::ArchiveExtractor;
use crate::host::ProgressDialog;
use crate::resume::RateLimitPolicy;
use crate::session::SessionDeps;
use crate::status::{StatusInput, StatusLines};

const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(500);
const UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Pieces that must be present before playback of a file can start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferWindow {
    /// Metainfo index of the buffered file.
    pub file_index: usize,
    /// Head of the file.
    pub pre: ByteRange,
    /// Tail of the file.
    pub post: ByteRange,
    /// Pieces covering both ranges, sorted and unique.
    pub pieces: Vec<u32>,
    /// Total size of `pieces`.
    pub required_bytes: u64,
}

impl BufferWindow {
    /// Head and tail window of `file`, each clamped to the file size.
    #[must_use]
    pub fn compute(
        meta: &TorrentMetadata,
        file: &TorrentFile,
        buffer_size: u64,
        end_buffer_size: u64,
    ) -> Self {
        let range = file.range();
        let pre = ByteRange::at(range.start, buffer_size.min(file.size_bytes));
        let tail = end_buffer_size.min(file.size_bytes);
        let post = ByteRange::at(range.end - tail, tail);
        Self::from_ranges(meta, file.index, pre, post)
    }

    /// Window spanning the whole file, used for archives.
    #[must_use]
    pub fn whole_file(meta: &TorrentMetadata, file: &TorrentFile) -> Self {
        let range = file.range();
        Self::from_ranges(meta, file.index, range, ByteRange::at(range.end, 0))
    }

    /// Window the controller buffers for `chosen`.
    #[must_use]
    pub fn for_chosen(
        meta: &TorrentMetadata,
        chosen: &ChosenFile,
        settings: &PlayerSettings,
    ) -> Self {
        if chosen.is_archive {
            Self::whole_file(meta, &chosen.file)
        } else {
            Self::compute(
                meta,
                &chosen.file,
                settings.buffer_size_bytes,
                settings.end_buffer_size_bytes,
            )
        }
    }

    fn from_ranges(
        meta: &TorrentMetadata,
        file_index: usize,
        pre: ByteRange,
        post: ByteRange,
    ) -> Self {
        let pieces: BTreeSet<u32> = meta
            .pieces_for_range(pre)
            .chain(meta.pieces_for_range(post))
            .collect();
        let required_bytes = pieces.iter().map(|&piece| meta.piece_size(piece)).sum();
        Self {
            file_index,
            pre,
            post,
            pieces: pieces.into_iter().collect(),
            required_bytes,
        }
    }
}

/// Lifecycle of the buffering controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferPhase {
    /// Nothing requested yet.
    #[default]
    Idle,
    /// Asking the engine for a new torrent.
    Adding,
    /// Attaching to a torrent the engine already has.
    Resuming,
    /// Waiting for metainfo.
    AwaitingMetadata,
    /// Downloading the buffer window.
    Buffering,
    /// Unpacking an archive.
    Extracting,
    /// The cycle completed successfully.
    Finished,
    /// The user or the session aborted the cycle.
    Cancelled,
    /// The destination ran out of space.
    InsufficientSpace,
    /// The cycle failed.
    Failed,
}

/// What the reported percentage measures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Buffer window pieces present.
    #[default]
    Buffering,
    /// Engine re-checking existing data.
    Checking,
    /// Archive pieces present.
    Archive,
    /// Extraction running.
    Extracting,
}

impl ProgressKind {
    const fn title(self) -> &'static str {
        match self {
            Self::Buffering => "Buffering",
            Self::Checking => "Checking",
            Self::Archive => "Downloading archive",
            Self::Extracting => "Extracting",
        }
    }
}

#[derive(Clone)]
struct Cycle {
    meta: TorrentMetadata,
    file: TorrentFile,
    window: BufferWindow,
    is_archive: bool,
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "percentages are clamped to 0..=100 before the cast"
)]
pub(crate) const fn percent_of(value: f64) -> u8 {
    if value.is_nan() {
        0
    } else {
        value.clamp(0.0, 100.0) as u8
    }
}

fn window_percent(done: u64, required: u64) -> u8 {
    if required == 0 {
        return 100;
    }
    let scaled = u128::from(done) * 100 / u128::from(required);
    u8::try_from(scaled.min(100)).unwrap_or(100)
}

/// Drives one buffering cycle at a time for a torrent handle.
pub struct BufferingController {
    handle: Arc<dyn TorrentHandle>,
    deps: SessionDeps,
    rate_limits: RateLimitPolicy,
    signal: Broadcaster<PlayerResult<()>>,
    phase: Mutex<BufferPhase>,
    progress: AtomicU8,
    progress_kind: Mutex<ProgressKind>,
    buffering: AtomicBool,
    cycle_done: AtomicBool,
    cycle: Mutex<Option<Cycle>>,
    extracted: Mutex<Option<PathBuf>>,
}

impl BufferingController {
    /// Controller for `handle`.
    #[must_use]
    pub fn new(handle: Arc<dyn TorrentHandle>, deps: &SessionDeps) -> Self {
        Self {
            handle,
            rate_limits: RateLimitPolicy::new(
                Arc::clone(&deps.engine),
                Arc::clone(&deps.settings),
            ),
            deps: deps.clone(),
            signal: Broadcaster::new(),
            phase: Mutex::new(BufferPhase::Idle),
            progress: AtomicU8::new(0),
            progress_kind: Mutex::new(ProgressKind::Buffering),
            buffering: AtomicBool::new(false),
            cycle_done: AtomicBool::new(false),
            cycle: Mutex::new(None),
            extracted: Mutex::new(None),
        }
    }

    /// Register a waiter for the current cycle's outcome.
    #[must_use]
    pub fn listen(&self) -> Listener<PlayerResult<()>> {
        self.signal.listen()
    }

    /// Wait until the running cycle, if any, has delivered its outcome.
    pub(crate) async fn settled(&self) {
        // Listen first so a finish racing this check is still observed.
        let listener = self.listen();
        if self.cycle_done.load(Ordering::SeqCst) {
            return;
        }
        let _ = listener.recv().await;
    }

    /// Current phase.
    ///
    /// # Panics
    ///
    /// Panics if the phase mutex has been poisoned.
    #[must_use]
    pub fn phase(&self) -> BufferPhase {
        *self.phase.lock().expect("buffer phase mutex poisoned")
    }

    pub(crate) fn set_phase(&self, phase: BufferPhase) {
        let mut current = self.phase.lock().expect("buffer phase mutex poisoned");
        if *current != phase {
            debug!(info_hash = %self.handle.info_hash(), from = ?*current, to = ?phase, "buffer phase");
            *current = phase;
        }
    }

    /// Last reported percentage.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    /// Whether a cycle is downloading right now.
    #[must_use]
    pub fn is_buffering(&self) -> bool {
        self.buffering.load(Ordering::SeqCst)
    }

    /// Playable file produced by the last extraction.
    ///
    /// # Panics
    ///
    /// Panics if the extraction mutex has been poisoned.
    #[must_use]
    pub fn extracted_path(&self) -> Option<PathBuf> {
        self.extracted
            .lock()
            .expect("extracted path mutex poisoned")
            .clone()
    }

    /// Window of the current or last cycle.
    #[must_use]
    pub fn window(&self) -> Option<BufferWindow> {
        self.current_cycle().map(|cycle| cycle.window)
    }

    fn current_cycle(&self) -> Option<Cycle> {
        self.cycle.lock().expect("buffer cycle mutex poisoned").clone()
    }

    fn record_progress(&self, kind: ProgressKind, percent: u8) -> u8 {
        let mut current = self
            .progress_kind
            .lock()
            .expect("progress kind mutex poisoned");
        if *current == kind {
            self.progress.fetch_max(percent, Ordering::SeqCst).max(percent)
        } else {
            *current = kind;
            self.progress.store(percent, Ordering::SeqCst);
            percent
        }
    }

    /// Start a cycle for `chosen`: compute its window and raise the priority
    /// of its pieces, the file and its subtitles.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::Engine`] if a priority write fails.
    ///
    /// # Panics
    ///
    /// Panics if the cycle or progress mutex has been poisoned.
    pub async fn begin(
        &self,
        meta: &TorrentMetadata,
        chosen: &ChosenFile,
    ) -> PlayerResult<BufferWindow> {
        let window = BufferWindow::for_chosen(meta, chosen, &self.deps.settings);

        *self.cycle.lock().expect("buffer cycle mutex poisoned") = Some(Cycle {
            meta: meta.clone(),
            file: chosen.file.clone(),
            window: window.clone(),
            is_archive: chosen.is_archive,
        });
        let kind = if chosen.is_archive {
            ProgressKind::Archive
        } else {
            ProgressKind::Buffering
        };
        *self
            .progress_kind
            .lock()
            .expect("progress kind mutex poisoned") = kind;
        self.progress.store(0, Ordering::SeqCst);
        self.cycle_done.store(false, Ordering::SeqCst);
        self.buffering.store(true, Ordering::SeqCst);
        self.set_phase(BufferPhase::Buffering);

        let info_hash = self.handle.info_hash();
        let lock = self.deps.registry.priority_lock(info_hash);
        let guard = lock.lock().await;
        self.handle
            .set_file_priority(chosen.file.index, FilePriority::High)
            .await
            .map_err(|err| PlayerError::engine("handle.set_file_priority", &err))?;
        if let Some(subtitles) = find_subtitles_file(&meta.files, &chosen.file) {
            self.handle
                .set_file_priority(subtitles.index, FilePriority::High)
                .await
                .map_err(|err| PlayerError::engine("handle.set_file_priority", &err))?;
        }
        self.handle
            .prioritize_pieces(&window.pieces)
            .await
            .map_err(|err| PlayerError::engine("handle.prioritize_pieces", &err))?;
        if chosen.is_archive {
            self.handle
                .set_sequential(false)
                .await
                .map_err(|err| PlayerError::engine("handle.set_sequential", &err))?;
        } else if self.handle.storage() != StorageKind::Memory {
            self.handle
                .set_sequential(true)
                .await
                .map_err(|err| PlayerError::engine("handle.set_sequential", &err))?;
        }
        drop(guard);

        info!(
            info_hash,
            file = %chosen.file.path,
            pieces = window.pieces.len(),
            required_bytes = window.required_bytes,
            "buffering started"
        );
        Ok(window)
    }

    /// Poll progress until the cycle ends, the dialog is cancelled or the
    /// session closes.
    pub(crate) async fn monitor(&self, closer: &Closer, dialog: Option<Arc<dyn ProgressDialog>>) {
        let dialog = dialog.as_deref();
        let mut cancel_check = interval(CANCEL_CHECK_INTERVAL);
        let mut update = interval(UPDATE_INTERVAL);
        loop {
            tokio::select! {
                () = closer.closed() => {
                    self.finish(Err(PlayerError::Closed)).await;
                    return;
                }
                _ = cancel_check.tick() => {
                    if self.cycle_done.load(Ordering::SeqCst) {
                        return;
                    }
                    if dialog.is_some_and(ProgressDialog::is_cancelled) {
                        info!(info_hash = %self.handle.info_hash(), "buffering cancelled by user");
                        self.finish(Err(PlayerError::UserCancelled)).await;
                        return;
                    }
                }
                _ = update.tick() => {
                    if self.tick(closer, dialog).await {
                        return;
                    }
                }
            }
        }
    }

    /// One progress update; returns `true` once the cycle is over.
    pub(crate) async fn tick(
        &self,
        closer: &Closer,
        dialog: Option<&dyn ProgressDialog>,
    ) -> bool {
        if self.cycle_done.load(Ordering::SeqCst) {
            return true;
        }
        let Some(cycle) = self.current_cycle() else {
            return false;
        };
        let status = match self.handle.status().await {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, info_hash = %self.handle.info_hash(), "status poll failed");
                return false;
            }
        };

        let (kind, measured) = if matches!(status.state, TorrentState::CheckingFiles) {
            (
                ProgressKind::Checking,
                percent_of(status.progress.percent_complete()),
            )
        } else {
            let have = match self.handle.have_pieces(&cycle.window.pieces).await {
                Ok(have) => have,
                Err(err) => {
                    warn!(error = %err, info_hash = %self.handle.info_hash(), "piece poll failed");
                    return false;
                }
            };
            let done = cycle
                .window
                .pieces
                .iter()
                .zip(have)
                .filter(|(_, present)| *present)
                .map(|(&piece, _)| cycle.meta.piece_size(piece))
                .sum();
            let kind = if cycle.is_archive {
                ProgressKind::Archive
            } else {
                ProgressKind::Buffering
            };
            (kind, window_percent(done, cycle.window.required_bytes))
        };

        let previous = self.progress();
        let percent = self.record_progress(kind, measured);
        if percent != previous {
            self.deps.publish(Event::BufferingProgress {
                info_hash: self.handle.info_hash().to_string(),
                file_index: cycle.file.index,
                percent,
            });
        }
        if let Some(dialog) = dialog.filter(|dialog| !dialog.is_cancelled()) {
            let memory_bytes = if self.handle.storage() == StorageKind::Memory {
                self.handle
                    .readahead()
                    .await
                    .ok()
                    .map(|readahead| readahead.capacity_bytes)
            } else {
                None
            };
            let mut lines = StatusLines::compose(&StatusInput {
                status: &status,
                progress: f64::from(percent),
                buffering_bytes: Some(cycle.window.required_bytes),
                memory_bytes,
                total_size: Some(cycle.file.size_bytes),
                duration_secs: 0.0,
                file_name: Some(cycle.file.name()),
            });
            if kind != ProgressKind::Buffering {
                lines.line1 = format!("{} | {}", kind.title(), lines.line1);
            }
            dialog.update(percent, &lines);
        }

        if kind == ProgressKind::Checking || percent < 100 {
            return false;
        }
        if cycle.is_archive {
            self.extract(&cycle, closer, dialog).await;
        } else {
            self.finish(Ok(())).await;
        }
        true
    }

    /// Run the extraction tool while still honouring session close and
    /// dialog cancellation; losing the race drops the tool's child process.
    async fn extract(
        &self,
        cycle: &Cycle,
        closer: &Closer,
        dialog: Option<&dyn ProgressDialog>,
    ) {
        self.set_phase(BufferPhase::Extracting);
        self.record_progress(ProgressKind::Extracting, 0);
        let info_hash = self.handle.info_hash().to_string();
        let archive = self.deps.settings.download_path.join(&cycle.file.path);
        self.deps.publish(Event::ExtractionStarted {
            info_hash: info_hash.clone(),
            archive: archive.display().to_string(),
        });

        let command = &self.deps.settings.unrar_command;
        let mut run = Box::pin(async {
            match ArchiveExtractor::from_command_line(command) {
                Ok(extractor) => extractor.extract(&archive).await,
                Err(err) => Err(err),
            }
        });
        let mut cancel_check = interval(CANCEL_CHECK_INTERVAL);
        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                () = closer.closed() => {
                    info!(info_hash = %info_hash, "extraction interrupted by session close");
                    drop(run);
                    self.finish(Err(PlayerError::Closed)).await;
                    return;
                }
                _ = cancel_check.tick() => {
                    if dialog.is_some_and(ProgressDialog::is_cancelled) {
                        info!(info_hash = %info_hash, "extraction cancelled by user");
                        drop(run);
                        self.finish(Err(PlayerError::UserCancelled)).await;
                        return;
                    }
                }
            }
        };
        match outcome {
            Ok(outcome) => {
                info!(info_hash = %info_hash, path = %outcome.path().display(), status = outcome.label(), "archive ready");
                if let Some(metrics) = &self.deps.metrics {
                    metrics.inc_extraction(outcome.label());
                }
                self.record_progress(ProgressKind::Extracting, 100);
                self.deps.publish(Event::ExtractionCompleted {
                    info_hash,
                    path: outcome.path().display().to_string(),
                });
                *self.extracted.lock().expect("extracted path mutex poisoned") =
                    Some(outcome.path().to_path_buf());
                self.finish(Ok(())).await;
            }
            Err(err) => {
                let message = format!("{:#}", anyhow::Error::new(err));
                warn!(error = %message, info_hash = %info_hash, "archive extraction failed");
                if let Some(metrics) = &self.deps.metrics {
                    metrics.inc_extraction("failed");
                }
                self.deps.host.notify("Extraction failed", &message).await;
                self.finish(Err(PlayerError::ExtractionFailed { message }))
                    .await;
            }
        }
    }

    /// End the current cycle with `result` and wake every waiter. Returns
    /// `false` when the cycle had already ended.
    pub async fn finish(&self, result: PlayerResult<()>) -> bool {
        if self.cycle_done.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.buffering.store(false, Ordering::SeqCst);
        let info_hash = self.handle.info_hash().to_string();
        match &result {
            Ok(()) => {
                self.set_phase(BufferPhase::Finished);
                self.rate_limits.apply_buffered().await;
                if let Some(cycle) = self.current_cycle() {
                    info!(info_hash = %info_hash, file = %cycle.file.path, "buffering finished");
                    self.deps.publish(Event::BufferingFinished {
                        info_hash,
                        file_index: cycle.file.index,
                    });
                }
                if let Some(metrics) = &self.deps.metrics {
                    metrics.inc_buffering_outcome("finished");
                }
            }
            Err(err) => {
                self.set_phase(match err {
                    PlayerError::InsufficientSpace => BufferPhase::InsufficientSpace,
                    err if err.is_user_abort() => BufferPhase::Cancelled,
                    _ => BufferPhase::Failed,
                });
                info!(info_hash = %info_hash, error = %err, "buffering ended");
                self.deps.publish(Event::BufferingFailed {
                    info_hash,
                    message: err.to_string(),
                });
                if let Some(metrics) = &self.deps.metrics {
                    metrics.inc_buffering_outcome(err.outcome_label());
                }
            }
        }
        let delivered = self.signal.broadcast(result);
        debug!(delivered, "buffering outcome delivered");
        true
    }
}
