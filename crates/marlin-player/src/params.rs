//! Play requests and the mutable per-session playback context.
//!
//! # Design
//! - [`PlaybackRequest`] is immutable once a session starts.
//! - [`PlaybackState`] is written by the owning session only; readers take
//!   snapshots.
//! - Seek and pause notifications arrive from outside the session and are
//!   plain atomics.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use marlin_torrent_core::StorageKind;
use serde::{Deserialize, Serialize};

use crate::resume::ResumePoint;

/// Kind of content being played.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// A movie.
    Movie,
    /// An episode of a catalog show.
    Episode,
    /// A free-text search result or bare link.
    #[default]
    Search,
}

/// What the torrent is expected to contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentIdentity {
    /// Content kind.
    pub content_type: ContentType,
    /// Catalog id of the movie or episode.
    pub tmdb_id: Option<u64>,
    /// Catalog id of the show.
    pub show_id: Option<u64>,
    /// Season number.
    pub season: Option<u32>,
    /// Episode number within the season.
    pub episode: Option<u32>,
    /// Absolute episode number (anime).
    pub absolute_number: Option<u32>,
    /// Free-text query the torrent was found with.
    pub query: Option<String>,
}

impl ContentIdentity {
    /// Identity of a movie.
    #[must_use]
    pub fn movie(tmdb_id: u64) -> Self {
        Self {
            content_type: ContentType::Movie,
            tmdb_id: Some(tmdb_id),
            ..Self::default()
        }
    }

    /// Identity of a catalog episode.
    #[must_use]
    pub fn episode(show_id: u64, episode_id: u64, season: u32, episode: u32) -> Self {
        Self {
            content_type: ContentType::Episode,
            tmdb_id: Some(episode_id),
            show_id: Some(show_id),
            season: Some(season),
            episode: Some(episode),
            ..Self::default()
        }
    }

    /// Identity of a search result.
    #[must_use]
    pub fn search(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Whether a show with season and episode numbers is known.
    #[must_use]
    pub const fn has_series(&self) -> bool {
        matches!(self.content_type, ContentType::Episode)
            && self.show_id.is_some()
            && self.season.is_some()
            && self.episode.is_some()
    }

    /// Whether a non-empty search query is known.
    #[must_use]
    pub fn has_query(&self) -> bool {
        self.query
            .as_deref()
            .is_some_and(|query| !query.trim().is_empty())
    }

    /// Whether the content is a movie.
    #[must_use]
    pub const fn is_movie(&self) -> bool {
        matches!(self.content_type, ContentType::Movie)
    }
}

/// Request to buffer and play one file of a torrent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackRequest {
    /// Magnet link, URL or path of the torrent.
    pub uri: String,
    /// Info-hash of a torrent the engine already holds.
    pub resume_hash: Option<String>,
    /// Expected content.
    pub identity: ContentIdentity,
    /// Candidate index picked earlier.
    pub chosen_index: Option<usize>,
    /// Torrent file index picked earlier.
    pub original_index: Option<usize>,
    /// Candidate index to play after this one.
    pub next_index: Option<usize>,
    /// Torrent file index to play after this one.
    pub next_original_index: Option<usize>,
    /// Download without a front-end.
    pub background: bool,
    /// Resume position supplied by the caller.
    pub resume: Option<ResumePoint>,
    /// Storage override for this torrent.
    pub storage: Option<StorageKind>,
}

impl PlaybackRequest {
    /// Request for `uri` with no further context.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Attach a content identity.
    #[must_use]
    pub fn with_identity(mut self, identity: ContentIdentity) -> Self {
        self.identity = identity;
        self
    }
}

/// Mutable context owned by one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Torrent index of the file being played.
    pub file_index: Option<usize>,
    /// Candidate index of the file being played.
    pub candidate_index: Option<usize>,
    /// Path of the file being played (the extracted file for archives).
    pub chosen_path: Option<String>,
    /// Fingerprint of `(info-hash, chosen path)`.
    pub resume_token: Option<String>,
    /// Stored resume record found at selection time.
    pub stored_resume: Option<ResumePoint>,
    /// Whether playback should seek to the stored position.
    pub resume_playback: bool,
    /// Last reported position.
    pub watched_secs: f64,
    /// Last reported duration.
    pub duration_secs: f64,
    /// `watched_secs / duration_secs` in percent.
    pub watched_progress: f64,
    /// Whether the player reported playback.
    pub playing: bool,
    /// Whether the up-next payload was prepared.
    pub up_next_sent: bool,
    /// Whether a watched flag was already sent.
    pub scrobbled: bool,
}

/// Request plus the live state of a session.
#[derive(Debug)]
pub struct PlaybackParams {
    /// Original request.
    pub request: PlaybackRequest,
    state: Mutex<PlaybackState>,
    seeked: AtomicBool,
    paused: AtomicBool,
}

impl PlaybackParams {
    /// Wrap a request with empty state.
    #[must_use]
    pub fn new(request: PlaybackRequest) -> Self {
        Self {
            request,
            state: Mutex::new(PlaybackState::default()),
            seeked: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Record a seek reported by the player.
    pub fn mark_seeked(&self) {
        self.seeked.store(true, Ordering::SeqCst);
    }

    /// Consume a pending seek notification.
    pub fn take_seeked(&self) -> bool {
        self.seeked.swap(false, Ordering::SeqCst)
    }

    /// Record a pause state reported by the player.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Last pause state reported by the player.
    #[must_use]
    pub fn paused_notified(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Copy of the current state.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex has been poisoned.
    #[must_use]
    pub fn snapshot(&self) -> PlaybackState {
        self.state.lock().expect("playback state mutex poisoned").clone()
    }

    /// Mutate the state under the lock and return the closure's result.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex has been poisoned.
    pub fn update<R>(&self, apply: impl FnOnce(&mut PlaybackState) -> R) -> R {
        let mut state = self.state.lock().expect("playback state mutex poisoned");
        apply(&mut state)
    }
}
