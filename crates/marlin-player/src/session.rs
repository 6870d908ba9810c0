//! Playback session state machine.
//!
//! # Design
//! - A session owns one play request from buffering to teardown:
//!   `Created → Buffering → WaitingForPlaybackStart → Playing → Stopped`.
//! - Every background task (alerts, buffering monitor, space watchdog, player
//!   loop) observes the session closer and exits within one tick of `close`.
//! - `close` is idempotent; the first call persists the resume position,
//!   lifts rate limits and decides whether the torrent stays.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use marlin_config::PlayerSettings;
use marlin_events::{Event, EventBus, EventStream, TorrentState};
use marlin_telemetry::Metrics;
use marlin_torrent_core::{
    AddTorrent, AddTorrentOptions, RemoveTorrent, StorageKind, TorrentEngine, TorrentHandle,
    TorrentMetadata, TorrentSource,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{Instant, interval, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buffer::{BufferPhase, BufferWindow, BufferingController, percent_of};
use crate::cache::KeyValueCache;
use crate::candidates::{
    ChosenFile, FileResolver, SidecarKind, resolve_candidates, sidecar_tracks,
};
use crate::catalog::MetadataCatalog;
use crate::closer::Closer;
use crate::error::{PlayerError, PlayerResult};
use crate::host::{OverlayStatus, ProgressDialog, UiHost};
use crate::next::{
    NextEpisode, is_ready_for_next_file, predict_next_file, prediction_applies,
};
use crate::params::{PlaybackParams, PlaybackRequest, PlaybackState};
use crate::registry::TorrentRegistry;
use crate::resume::{
    RateLimitPolicy, ResumeDecision, ResumePoint, ResumeStore, resume_decision, resume_token,
};
use crate::status::{SessionStatus, StatusInput, StatusLines};
use crate::upnext::{UpNextPayload, query_payload, show_payload};
use crate::watch::{ScrobbleAction, WatchProgress, WatchStateService};

const PLAYER_TICK: Duration = Duration::from_secs(1);
const METADATA_POLL: Duration = Duration::from_secs(1);
const DIALOG_TITLE: &str = "Buffering";

/// Lifecycle of a playback session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Constructed, nothing requested yet.
    #[default]
    Created,
    /// Torrent admitted, buffering the chosen file.
    Buffering,
    /// Buffer filled; waiting for the player to report playback.
    WaitingForPlaybackStart,
    /// The player is running.
    Playing,
    /// Torn down.
    Stopped,
}

/// Collaborators shared by every session of a [`crate::PlayerService`].
#[derive(Clone)]
pub struct SessionDeps {
    /// Torrent engine.
    pub engine: Arc<dyn TorrentEngine>,
    /// UI host driving playback.
    pub host: Arc<dyn UiHost>,
    /// Remote watch-state service.
    pub watch: Arc<dyn WatchStateService>,
    /// Metadata catalog.
    pub catalog: Arc<dyn MetadataCatalog>,
    /// Key-value cache for resume records and content links.
    pub cache: Arc<dyn KeyValueCache>,
    /// Player settings.
    pub settings: Arc<PlayerSettings>,
    /// Torrents attached to sessions.
    pub registry: TorrentRegistry,
    /// Session event bus.
    pub bus: EventBus,
    /// Prometheus metrics, when telemetry is enabled.
    pub metrics: Option<Metrics>,
}

impl SessionDeps {
    pub(crate) fn publish(&self, event: Event) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_event(event.kind());
        }
        self.bus.publish(event);
    }
}

/// One play request, from buffering to teardown.
pub struct PlaybackSession {
    id: Uuid,
    deps: SessionDeps,
    params: PlaybackParams,
    resume_store: ResumeStore,
    rate_limits: RateLimitPolicy,
    closer: Closer,
    phase: Mutex<SessionPhase>,
    handle: OnceLock<Arc<dyn TorrentHandle>>,
    controller: OnceLock<Arc<BufferingController>>,
    metadata: OnceLock<TorrentMetadata>,
    chosen: Mutex<Option<ChosenFile>>,
    next: Mutex<NextEpisode>,
    overlay: Mutex<Option<Arc<dyn OverlayStatus>>>,
    last_error: Mutex<Option<PlayerError>>,
    metadata_ready: Notify,
    not_enough_space: AtomicBool,
}

impl PlaybackSession {
    /// New session for `request`.
    #[must_use]
    pub fn new(deps: SessionDeps, request: PlaybackRequest) -> Arc<Self> {
        if let Some(metrics) = &deps.metrics {
            metrics.session_started();
        }
        Arc::new(Self {
            id: Uuid::new_v4(),
            resume_store: ResumeStore::new(
                Arc::clone(&deps.cache),
                deps.settings.stored_resume_ttl(),
            ),
            rate_limits: RateLimitPolicy::new(
                Arc::clone(&deps.engine),
                Arc::clone(&deps.settings),
            ),
            deps,
            params: PlaybackParams::new(request),
            closer: Closer::new(),
            phase: Mutex::new(SessionPhase::Created),
            handle: OnceLock::new(),
            controller: OnceLock::new(),
            metadata: OnceLock::new(),
            chosen: Mutex::new(None),
            next: Mutex::new(NextEpisode::default()),
            overlay: Mutex::new(None),
            last_error: Mutex::new(None),
            metadata_ready: Notify::new(),
            not_enough_space: AtomicBool::new(false),
        })
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Request and playback state.
    #[must_use]
    pub const fn params(&self) -> &PlaybackParams {
        &self.params
    }

    /// Current lifecycle phase.
    ///
    /// # Panics
    ///
    /// Panics if the phase mutex has been poisoned.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().expect("session phase mutex poisoned")
    }

    fn set_phase(&self, phase: SessionPhase) {
        let mut current = self.phase.lock().expect("session phase mutex poisoned");
        if *current != SessionPhase::Stopped && *current != phase {
            debug!(session_id = %self.id, from = ?*current, to = ?phase, "session phase");
            *current = phase;
        }
    }

    /// Buffering controller, once the torrent is attached.
    #[must_use]
    pub fn controller(&self) -> Option<&Arc<BufferingController>> {
        self.controller.get()
    }

    /// Info-hash of the attached torrent.
    #[must_use]
    pub fn info_hash(&self) -> Option<&str> {
        self.handle.get().map(|handle| handle.info_hash())
    }

    /// Whether `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_set()
    }

    /// Failure recorded after `buffer` returned, such as a playback timeout.
    ///
    /// # Panics
    ///
    /// Panics if the error mutex has been poisoned.
    #[must_use]
    pub fn last_error(&self) -> Option<PlayerError> {
        self.last_error
            .lock()
            .expect("session error mutex poisoned")
            .clone()
    }

    /// Next-file descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the next-file mutex has been poisoned.
    #[must_use]
    pub fn next_episode(&self) -> NextEpisode {
        self.next.lock().expect("next file mutex poisoned").clone()
    }

    fn chosen(&self) -> Option<ChosenFile> {
        self.chosen.lock().expect("chosen file mutex poisoned").clone()
    }

    /// Serializable snapshot.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let state = self.params.snapshot();
        let next = self.next_episode();
        let controller = self.controller();
        SessionStatus {
            session_id: self.id,
            info_hash: self.info_hash().map(str::to_string),
            phase: self.phase(),
            file_index: state.file_index,
            file_path: state.chosen_path,
            buffer_progress: controller.map_or(0, |controller| controller.progress()),
            watched_secs: state.watched_secs,
            duration_secs: state.duration_secs,
            watched: self.deps.settings.is_watched(state.watched_progress),
            next_file_ready: next.started
                && controller.is_some_and(|controller| {
                    controller.phase() == BufferPhase::Finished && !controller.is_buffering()
                }),
        }
    }

    /// Admit the torrent, buffer the chosen file and start watching the
    /// player. Resolves once the first buffering cycle ends.
    ///
    /// # Errors
    ///
    /// Returns the buffering outcome: the cycle's failure, or
    /// [`PlayerError::Closed`] if the session closed first or already ran.
    ///
    /// # Panics
    ///
    /// Panics if the phase mutex has been poisoned.
    pub async fn buffer(self: &Arc<Self>) -> PlayerResult<()> {
        {
            let mut phase = self.phase.lock().expect("session phase mutex poisoned");
            if *phase != SessionPhase::Created {
                return Err(PlayerError::Closed);
            }
            *phase = SessionPhase::Buffering;
        }
        let result = self.run_buffering().await;
        if let Err(err) = &result {
            if !err.is_user_abort() {
                warn!(session_id = %self.id, error = %err, "buffering failed");
            }
            self.close().await;
        }
        result
    }

    async fn run_buffering(self: &Arc<Self>) -> PlayerResult<()> {
        let (handle, resumed) = self.acquire_handle().await?;
        let info_hash = handle.info_hash().to_string();
        let attached = self.deps.registry.attach(Arc::clone(&handle));
        let _ = self.handle.set(Arc::clone(&handle));
        let controller = Arc::new(BufferingController::new(Arc::clone(&handle), &self.deps));
        controller.set_phase(if resumed {
            BufferPhase::Resuming
        } else {
            BufferPhase::Adding
        });
        let _ = self.controller.set(Arc::clone(&controller));
        info!(session_id = %self.id, info_hash = %info_hash, attached, "session attached");

        // Register before any task can finish the cycle.
        let outcome = controller.listen();

        let background = self.params.request.background;
        let dialog = if background || self.deps.host.is_headless() {
            None
        } else {
            self.deps.host.new_progress_dialog(DIALOG_TITLE).await
        };

        self.spawn_alerts(self.deps.engine.alerts(), info_hash);
        self.spawn_metadata(Arc::clone(&handle));
        self.spawn_monitor(dialog.clone());
        if handle.storage() == StorageKind::File {
            self.spawn_space_watchdog(Arc::clone(&handle));
        }

        let result = outcome.recv().await.unwrap_or(Err(PlayerError::Closed));
        if let Some(dialog) = &dialog {
            dialog.close();
        }
        result?;

        if let Some(path) = controller.extracted_path() {
            self.params.update(|state| {
                state.chosen_path = Some(path.display().to_string());
            });
        }
        if background {
            info!(session_id = %self.id, "background buffering complete");
            self.close().await;
            return Ok(());
        }
        self.set_phase(SessionPhase::WaitingForPlaybackStart);
        self.spawn_player();
        Ok(())
    }

    /// Existing torrent for the resume hash, else a newly added one. The flag
    /// reports whether an existing torrent was found.
    async fn acquire_handle(&self) -> PlayerResult<(Arc<dyn TorrentHandle>, bool)> {
        let request = &self.params.request;
        if let Some(hash) = request.resume_hash.as_deref() {
            match self.deps.engine.find_torrent(hash).await {
                Ok(Some(handle)) => {
                    info!(session_id = %self.id, info_hash = hash, "resuming existing torrent");
                    return Ok((handle, true));
                }
                Ok(None) => debug!(info_hash = hash, "torrent to resume not found, adding"),
                Err(err) => return Err(PlayerError::engine("engine.find_torrent", &err)),
            }
        }
        let source = TorrentSource::parse(&request.uri).map_err(|err| PlayerError::Engine {
            operation: "torrent.parse",
            message: err.to_string(),
        })?;
        let settings = &self.deps.settings;
        let add = AddTorrent {
            source,
            options: AddTorrentOptions {
                download_dir: Some(settings.download_path.display().to_string()),
                storage: request.storage.unwrap_or(settings.download_storage),
                paused: false,
            },
        };
        let handle = self
            .deps
            .engine
            .add_torrent(add)
            .await
            .map_err(|err| PlayerError::engine("engine.add_torrent", &err))?;
        Ok((handle, false))
    }

    fn spawn_alerts(self: &Arc<Self>, mut alerts: EventStream, info_hash: String) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    () = session.closer.closed() => return,
                    envelope = alerts.next_for(&info_hash) => envelope,
                };
                let Some(envelope) = envelope else {
                    return;
                };
                match envelope.event {
                    Event::MetadataReceived { files, .. } => {
                        debug!(info_hash = %info_hash, files, "metadata received");
                        session.metadata_ready.notify_one();
                    }
                    Event::StateChanged { state, .. } => {
                        debug!(info_hash = %info_hash, state = state.label(), "torrent state changed");
                        if let TorrentState::Failed { message } = state
                            && let Some(controller) = session.controller()
                        {
                            controller
                                .finish(Err(PlayerError::Engine {
                                    operation: "torrent.state",
                                    message,
                                }))
                                .await;
                        }
                    }
                    _ => {}
                }
            }
        });
    }

    fn spawn_metadata(self: &Arc<Self>, handle: Arc<dyn TorrentHandle>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = session.process_metadata(handle).await
                && let Some(controller) = session.controller()
            {
                controller.finish(Err(err)).await;
            }
        });
    }

    fn spawn_monitor(self: &Arc<Self>, dialog: Option<Arc<dyn ProgressDialog>>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(controller) = session.controller() {
                controller.monitor(&session.closer, dialog).await;
            }
        });
    }

    fn spawn_space_watchdog(self: &Arc<Self>, handle: Arc<dyn TorrentHandle>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = session.closer.closed() => return,
                () = sleep(session.deps.settings.space_check_delay()) => {}
            }
            let Some(chosen) = session.chosen() else {
                debug!(session_id = %session.id, "no file chosen at space check, skipping");
                return;
            };
            match session
                .deps
                .engine
                .has_free_space(handle.info_hash(), chosen.file.size_bytes)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        info_hash = %handle.info_hash(),
                        required_bytes = chosen.file.size_bytes,
                        "not enough space on download destination"
                    );
                    session.not_enough_space.store(true, Ordering::SeqCst);
                    session
                        .deps
                        .host
                        .notify("Marlin", "Not enough space on download destination")
                        .await;
                    if let Some(controller) = session.controller() {
                        controller.finish(Err(PlayerError::InsufficientSpace)).await;
                    }
                }
                Err(err) => warn!(error = %err, "free space check failed"),
            }
        });
    }

    async fn wait_for_metadata(
        &self,
        handle: &dyn TorrentHandle,
    ) -> PlayerResult<TorrentMetadata> {
        loop {
            match handle.metadata().await {
                Ok(Some(meta)) => return Ok(meta),
                Ok(None) => {}
                Err(err) => return Err(PlayerError::engine("handle.metadata", &err)),
            }
            if let Some(controller) = self.controller() {
                controller.set_phase(BufferPhase::AwaitingMetadata);
            }
            tokio::select! {
                () = self.closer.closed() => return Err(PlayerError::Closed),
                () = self.metadata_ready.notified() => {}
                () = sleep(METADATA_POLL) => {}
            }
        }
    }

    async fn process_metadata(&self, handle: Arc<dyn TorrentHandle>) -> PlayerResult<()> {
        let meta = self.wait_for_metadata(handle.as_ref()).await?;
        let info_hash = handle.info_hash();
        let request = &self.params.request;
        let deps = &self.deps;

        let resolver = FileResolver::new(
            Arc::clone(&deps.host),
            Arc::clone(&deps.catalog),
            Arc::clone(&deps.cache),
            Arc::clone(&deps.settings),
        );
        let chosen = resolver.choose_file(info_hash, &meta.files, request).await?;
        let token = resume_token(info_hash, &chosen.file.path);
        let chosen_path = deps.settings.download_path.join(&chosen.file.path);
        self.params.update(|state| {
            state.file_index = Some(chosen.file.index);
            state.candidate_index = chosen.candidate_index;
            state.chosen_path = Some(chosen_path.display().to_string());
            state.resume_token = Some(token.clone());
        });
        *self.chosen.lock().expect("chosen file mutex poisoned") = Some(chosen.clone());
        let _ = self.metadata.set(meta.clone());

        self.decide_resume(&token).await;

        let controller = self.controller().ok_or(PlayerError::Closed)?;
        if self.closer.is_set() {
            return Err(PlayerError::Closed);
        }
        controller.begin(&meta, &chosen).await?;
        if request.background {
            controller.finish(Ok(())).await;
        }
        Ok(())
    }

    async fn stored_resume(&self, token: &str) -> Option<ResumePoint> {
        if let Some(point) = self.resume_store.fetch(token).await {
            return Some(point);
        }
        let request = &self.params.request;
        if request.resume.is_some() {
            return request.resume;
        }
        if request.identity.tmdb_id.is_none() {
            return None;
        }
        self.deps
            .watch
            .resume_point(&request.identity)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "remote resume lookup failed");
                None
            })
    }

    async fn decide_resume(&self, token: &str) {
        let stored = self.stored_resume(token).await;
        let decision = resume_decision(
            stored,
            &self.deps.settings,
            self.params.request.background,
            self.deps.host.is_headless(),
        );
        let resume = match (decision, stored) {
            (ResumeDecision::Resume, _) => true,
            (ResumeDecision::Ask, Some(point)) => {
                let message = format!("Resume playback at {point}?");
                let accepted = self.deps.host.confirm("Resume", &message).await;
                if !accepted && let Err(err) = self.resume_store.reset(token).await {
                    warn!(error = %err, "failed to reset resume record");
                }
                accepted
            }
            _ => false,
        };
        debug!(session_id = %self.id, ?decision, resume, "resume decision");
        self.params.update(|state| {
            state.stored_resume = if resume { stored } else { None };
            state.resume_playback = resume;
        });
    }

    fn spawn_player(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            if session.wait_for_playback().await {
                session.play().await;
            }
            session.close().await;
        });
    }

    async fn wait_for_playback(&self) -> bool {
        let timeout = self.deps.settings.buffer_timeout();
        let started = Instant::now();
        let mut ticker = interval(PLAYER_TICK);
        loop {
            tokio::select! {
                () = self.closer.closed() => return false,
                _ = ticker.tick() => {}
            }
            if self.deps.host.is_playing().await {
                return true;
            }
            if started.elapsed() >= timeout {
                let err = PlayerError::PlaybackTimeout {
                    waited_secs: timeout.as_secs(),
                };
                warn!(session_id = %self.id, waited_secs = timeout.as_secs(), "playback did not start");
                if let Some(metrics) = &self.deps.metrics {
                    metrics.inc_buffering_outcome(err.outcome_label());
                }
                self.deps.host.notify("Marlin", &err.to_string()).await;
                *self.last_error.lock().expect("session error mutex poisoned") = Some(err);
                return false;
            }
        }
    }

    async fn play(self: &Arc<Self>) {
        self.set_phase(SessionPhase::Playing);
        self.params.update(|state| state.playing = true);
        let info_hash = self.info_hash().unwrap_or_default().to_string();
        info!(session_id = %self.id, info_hash = %info_hash, "playback started");
        self.deps.publish(Event::PlaybackStarted {
            info_hash,
            session_id: self.id,
        });
        if self.deps.settings.overlay_status {
            let overlay = self.deps.host.new_overlay().await;
            *self.overlay.lock().expect("overlay mutex poisoned") = overlay;
        }
        self.scrobble(ScrobbleAction::Start).await;
        if self.deps.settings.include_sidecars {
            self.inject_sidecars().await;
        }

        let mut ticker = interval(PLAYER_TICK);
        let mut was_paused = false;
        loop {
            tokio::select! {
                () = self.closer.closed() => return,
                _ = ticker.tick() => {}
            }
            if !self.deps.host.is_playing().await {
                info!(session_id = %self.id, "player stopped");
                return;
            }
            self.refresh_watch_times().await;

            if self.params.take_seeked() {
                self.scrobble(ScrobbleAction::Start).await;
            }
            let paused = self.deps.host.is_paused().await || self.params.paused_notified();
            let overlay = self.overlay.lock().expect("overlay mutex poisoned").clone();
            if paused {
                if let Some(overlay) = &overlay {
                    let (percent, lines) = self.overlay_lines().await;
                    overlay.update(percent, &lines);
                    overlay.show();
                }
                if !was_paused {
                    self.scrobble(ScrobbleAction::Pause).await;
                }
            } else if was_paused {
                if let Some(overlay) = &overlay {
                    overlay.hide();
                }
                self.scrobble(ScrobbleAction::Start).await;
            }
            was_paused = paused;

            self.maybe_start_next_file().await;
        }
    }

    async fn refresh_watch_times(self: &Arc<Self>) {
        let Some(times) = self.deps.host.watch_times().await else {
            return;
        };
        let progress = WatchProgress {
            watched_secs: times.watched_secs,
            duration_secs: times.duration_secs,
        };
        let first_duration = self.params.update(|state| {
            state.watched_secs = times.watched_secs;
            state.duration_secs = times.duration_secs;
            state.watched_progress = progress.percent();
            if times.duration_secs > 0.0 && !state.up_next_sent {
                state.up_next_sent = true;
                true
            } else {
                false
            }
        });
        if first_duration {
            self.spawn_prepare_next();
        }
    }

    async fn overlay_lines(&self) -> (u8, StatusLines) {
        let Some(handle) = self.handle.get() else {
            return (0, StatusLines::default());
        };
        let status = match handle.status().await {
            Ok(status) => status,
            Err(err) => {
                debug!(error = %err, "status unavailable for overlay");
                return (0, StatusLines::default());
            }
        };
        let state = self.params.snapshot();
        let chosen = self.chosen();
        let progress = status.progress.percent_complete();
        let lines = StatusLines::compose(&StatusInput {
            status: &status,
            progress,
            buffering_bytes: None,
            memory_bytes: None,
            total_size: self.metadata.get().map(|meta| meta.total_size),
            duration_secs: state.duration_secs,
            file_name: chosen.as_ref().map(|chosen| chosen.file.name()),
        });
        (percent_of(progress), lines)
    }

    async fn scrobble(&self, action: ScrobbleAction) {
        if !self.deps.settings.scrobble || self.params.request.background {
            return;
        }
        let state = self.params.snapshot();
        let progress = WatchProgress {
            watched_secs: state.watched_secs,
            duration_secs: state.duration_secs,
        };
        if let Err(err) = self
            .deps
            .watch
            .scrobble(action, &self.params.request.identity, progress)
            .await
        {
            warn!(error = %err, action = action.as_str(), "scrobble failed");
        }
    }

    async fn inject_sidecars(&self) {
        let (Some(meta), Some(chosen)) = (self.metadata.get(), self.chosen()) else {
            return;
        };
        let download_path = &self.deps.settings.download_path;
        let urls: Vec<String> = [SidecarKind::Subtitles, SidecarKind::Audio]
            .into_iter()
            .flat_map(|kind| sidecar_tracks(&meta.files, &chosen.file, kind))
            .map(|file| download_path.join(&file.path).display().to_string())
            .collect();
        if !urls.is_empty() {
            debug!(session_id = %self.id, tracks = urls.len(), "injecting sidecar tracks");
            self.deps.host.set_subtitles(&urls).await;
        }
    }

    fn spawn_prepare_next(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let Some(meta) = session.metadata.get() else {
                return;
            };
            let state = session.params.snapshot();
            session.send_up_next(meta, &state).await;
            session.prepare_next(meta, &state).await;
        });
    }

    async fn send_up_next(&self, meta: &TorrentMetadata, state: &PlaybackState) {
        let identity = &self.params.request.identity;
        if identity.is_movie() {
            return;
        }
        let payload: anyhow::Result<Option<UpNextPayload>> = if identity.has_series() {
            match (identity.show_id, identity.season, identity.episode) {
                (Some(show_id), Some(season), Some(episode)) => {
                    show_payload(self.deps.catalog.as_ref(), show_id, season, episode).await
                }
                _ => Ok(None),
            }
        } else if let Some(current) = state.candidate_index {
            let info_hash = self.info_hash().unwrap_or_default();
            match resolve_candidates(&meta.files).and_then(|candidates| {
                query_payload(
                    &candidates,
                    current,
                    identity.query.as_deref(),
                    info_hash,
                    &meta.name,
                )
            }) {
                Ok(payload) => Ok(Some(payload)),
                Err(PlayerError::NoCandidates) => Ok(None),
                Err(err) => Err(anyhow::Error::new(err)),
            }
        } else {
            Ok(None)
        };
        match payload {
            Ok(Some(payload)) => {
                debug!(session_id = %self.id, url = %payload.play_url, "sending up-next");
                self.deps.host.up_next(&payload).await;
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "up-next payload failed"),
        }
    }

    async fn prepare_next(&self, meta: &TorrentMetadata, state: &PlaybackState) {
        {
            let mut next = self.next.lock().expect("next file mutex poisoned");
            if next.done {
                return;
            }
            next.done = true;
        }
        let settings = &self.deps.settings;
        let predicted = predict_next_file(
            self.deps.catalog.as_ref(),
            settings,
            meta,
            &self.params.request,
            state.candidate_index,
        )
        .await;
        let chosen = match predicted {
            Ok(Some(chosen)) => chosen,
            Ok(None) => {
                debug!(session_id = %self.id, "no next file");
                return;
            }
            Err(err) => {
                warn!(error = %err, "next-file prediction failed");
                return;
            }
        };
        let window = BufferWindow::for_chosen(meta, &chosen, settings);
        info!(
            session_id = %self.id,
            file = %chosen.file.path,
            required_bytes = window.required_bytes,
            "next file prepared"
        );
        let file_index = chosen.file.index;
        {
            let mut next = self.next.lock().expect("next file mutex poisoned");
            next.file = Some(chosen);
            next.buffer_size = window.required_bytes;
        }
        self.deps.publish(Event::NextFilePrepared {
            info_hash: self.info_hash().unwrap_or_default().to_string(),
            file_index,
            required_bytes: window.required_bytes,
        });
    }

    async fn maybe_start_next_file(self: &Arc<Self>) {
        let next = self.next_episode();
        if !next.is_pending()
            || !prediction_applies(&self.params.request.identity, &self.deps.settings)
        {
            return;
        }
        let (Some(handle), Some(controller), Some(meta)) =
            (self.handle.get(), self.controller(), self.metadata.get())
        else {
            return;
        };
        if controller.is_buffering() {
            return;
        }
        let state = self.params.snapshot();
        let watched = self.deps.settings.is_watched(state.watched_progress);
        let storage = handle.storage();
        let readahead = if storage == StorageKind::Memory {
            handle.readahead().await.ok()
        } else {
            None
        };
        if !is_ready_for_next_file(
            storage,
            state.watched_progress,
            watched,
            readahead,
            next.buffer_size,
        ) {
            return;
        }
        let chosen = {
            let mut next = self.next.lock().expect("next file mutex poisoned");
            if next.started {
                return;
            }
            next.started = true;
            next.file.clone()
        };
        let Some(chosen) = chosen else {
            return;
        };
        info!(session_id = %self.id, file = %chosen.file.path, "starting next file");
        self.deps
            .registry
            .set_has_next_file(handle.info_hash(), true);
        match controller.begin(meta, &chosen).await {
            Ok(window) => {
                debug!(required_bytes = window.required_bytes, "next file window prioritized");
                self.spawn_monitor(None);
            }
            Err(err) => {
                warn!(error = %err, "next file buffering failed to start");
                controller.finish(Err(err)).await;
            }
        }
    }

    /// Tear the session down. Only the first call has an effect.
    pub async fn close(&self) {
        if !self.closer.set() {
            return;
        }
        if let Some(controller) = self.controller.get() {
            controller.settled().await;
        }
        self.finish_playback().await;
        self.rate_limits.reset().await;
        self.release_torrent().await;
        self.set_phase(SessionPhase::Stopped);
        if let Some(metrics) = &self.deps.metrics {
            metrics.session_closed();
        }
        info!(session_id = %self.id, "session closed");
    }

    async fn finish_playback(&self) {
        let state = self.params.update(|state| {
            let snapshot = state.clone();
            state.playing = false;
            snapshot
        });
        if !state.playing {
            return;
        }
        let settings = &self.deps.settings;
        let watched = settings.is_watched(state.watched_progress);
        if let Some(token) = &state.resume_token {
            let point = ResumePoint {
                position_secs: state.watched_secs,
                total_secs: state.duration_secs,
            };
            match self.resume_store.save(token, point, watched).await {
                Ok(write) => debug!(?write, "resume position persisted"),
                Err(err) => warn!(error = %err, "failed to persist resume position"),
            }
        }

        let identity = &self.params.request.identity;
        let progress = WatchProgress {
            watched_secs: state.watched_secs,
            duration_secs: state.duration_secs,
        };
        if watched && !state.scrobbled && !self.params.request.background {
            match self.deps.watch.set_watched(identity, progress).await {
                Ok(()) => self.params.update(|state| state.scrobbled = true),
                Err(err) => warn!(error = %err, "failed to mark content watched"),
            }
        }
        self.scrobble(if watched {
            ScrobbleAction::Stop
        } else {
            ScrobbleAction::Pause
        })
        .await;

        let overlay = self.overlay.lock().expect("overlay mutex poisoned").take();
        if let Some(overlay) = overlay {
            overlay.close();
        }
        self.deps.publish(Event::PlaybackStopped {
            info_hash: self.info_hash().unwrap_or_default().to_string(),
            session_id: self.id,
            position_secs: state.watched_secs,
            duration_secs: state.duration_secs,
        });
    }

    async fn release_torrent(&self) {
        let Some(handle) = self.handle.get() else {
            return;
        };
        let info_hash = handle.info_hash();
        let deps = &self.deps;
        let state = self.params.snapshot();
        let watched = deps.settings.is_watched(state.watched_progress);

        if deps.registry.has_next_file(info_hash)
            && watched
            && prediction_applies(&self.params.request.identity, &deps.settings)
        {
            let remaining = deps.registry.detach(info_hash);
            info!(info_hash, remaining, "keeping torrent for next file");
            deps.registry.arm_leave_timer(
                info_hash,
                Arc::clone(&deps.engine),
                deps.bus.clone(),
                deps.settings.leave_torrent_timeout(),
            );
            return;
        }

        if self.params.request.background || deps.registry.attached(info_hash) > 1 {
            let remaining = deps.registry.detach(info_hash);
            debug!(info_hash, remaining, "torrent left to other sessions");
            return;
        }

        let with_data = self.not_enough_space.load(Ordering::SeqCst);
        info!(info_hash, with_data, "removing torrent");
        match deps
            .engine
            .remove_torrent(info_hash, RemoveTorrent { with_data })
            .await
        {
            Ok(()) => deps.publish(Event::TorrentRemoved {
                info_hash: info_hash.to_string(),
                with_data,
            }),
            Err(err) => warn!(error = %err, info_hash, "failed to remove torrent"),
        }
        deps.registry.remove(info_hash);
    }
}
