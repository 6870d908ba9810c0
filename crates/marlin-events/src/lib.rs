//! Core event bus for the Marlin streaming engine.
//!
//! The bus carries typed torrent and playback events with sequential
//! identifiers, and keeps a replay ring so late subscribers (status pollers,
//! per-session alert loops) can catch up from a known id. Internally it uses
//! `tokio::broadcast` with a bounded buffer; when the channel overflows the
//! oldest events are dropped.
//!
//! `signal` holds the one-shot [`Broadcaster`] used to wake buffering waiters.

pub mod signal;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use uuid::Uuid;

pub use signal::{Broadcaster, Listener};

/// Identifier assigned to each event emitted on the bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed events surfaced by the engine and the playback sessions.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TorrentAdded {
        info_hash: String,
        name: Option<String>,
    },
    MetadataReceived {
        info_hash: String,
        files: usize,
    },
    StateChanged {
        info_hash: String,
        state: TorrentState,
    },
    PieceFinished {
        info_hash: String,
        piece: u32,
    },
    TorrentRemoved {
        info_hash: String,
        with_data: bool,
    },
    BufferingProgress {
        info_hash: String,
        file_index: usize,
        percent: u8,
    },
    BufferingFinished {
        info_hash: String,
        file_index: usize,
    },
    BufferingFailed {
        info_hash: String,
        message: String,
    },
    ExtractionStarted {
        info_hash: String,
        archive: String,
    },
    ExtractionCompleted {
        info_hash: String,
        path: String,
    },
    PlaybackStarted {
        info_hash: String,
        session_id: Uuid,
    },
    PlaybackStopped {
        info_hash: String,
        session_id: Uuid,
        position_secs: f64,
        duration_secs: f64,
    },
    NextFilePrepared {
        info_hash: String,
        file_index: usize,
        required_bytes: u64,
    },
}

impl Event {
    /// Machine-friendly discriminator used for metrics labels and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TorrentAdded { .. } => "torrent_added",
            Self::MetadataReceived { .. } => "metadata_received",
            Self::StateChanged { .. } => "state_changed",
            Self::PieceFinished { .. } => "piece_finished",
            Self::TorrentRemoved { .. } => "torrent_removed",
            Self::BufferingProgress { .. } => "buffering_progress",
            Self::BufferingFinished { .. } => "buffering_finished",
            Self::BufferingFailed { .. } => "buffering_failed",
            Self::ExtractionStarted { .. } => "extraction_started",
            Self::ExtractionCompleted { .. } => "extraction_completed",
            Self::PlaybackStarted { .. } => "playback_started",
            Self::PlaybackStopped { .. } => "playback_stopped",
            Self::NextFilePrepared { .. } => "next_file_prepared",
        }
    }

    /// Info-hash of the torrent the event refers to.
    #[must_use]
    pub fn info_hash(&self) -> &str {
        match self {
            Self::TorrentAdded { info_hash, .. }
            | Self::MetadataReceived { info_hash, .. }
            | Self::StateChanged { info_hash, .. }
            | Self::PieceFinished { info_hash, .. }
            | Self::TorrentRemoved { info_hash, .. }
            | Self::BufferingProgress { info_hash, .. }
            | Self::BufferingFinished { info_hash, .. }
            | Self::BufferingFailed { info_hash, .. }
            | Self::ExtractionStarted { info_hash, .. }
            | Self::ExtractionCompleted { info_hash, .. }
            | Self::PlaybackStarted { info_hash, .. }
            | Self::PlaybackStopped { info_hash, .. }
            | Self::NextFilePrepared { info_hash, .. } => info_hash,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/// Torrent states as reported by the engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    Queued,
    CheckingFiles,
    DownloadingMetadata,
    Downloading,
    Finished,
    Seeding,
    Paused,
    Failed { message: String },
}

impl TorrentState {
    /// Human-readable label used in progress dialogs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::CheckingFiles => "Checking",
            Self::DownloadingMetadata => "Finding",
            Self::Downloading => "Buffering",
            Self::Finished => "Finished",
            Self::Seeding => "Seeding",
            Self::Paused => "Paused",
            Self::Failed { .. } => "Failed",
        }
    }
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish an event, assigning it the next sequential identifier.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        {
            let mut buffer = self.buffer.lock().expect("event buffer mutex poisoned");
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying buffered events newer than `since_id`.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.buffer.lock().expect("event buffer mutex poisoned");
            backlog.extend(buffer.iter().filter(|item| item.id > since).cloned());
        }
        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.buffer.lock().expect("event buffer mutex poisoned");
        buffer.back().map(|event| event.id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream that yields events from the replay backlog first, then live.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    ///
    /// Lagged receivers skip the dropped events and continue with the oldest
    /// one still buffered.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive the next event concerning `info_hash`, skipping others.
    pub async fn next_for(&mut self, info_hash: &str) -> Option<EventEnvelope> {
        loop {
            let envelope = self.next().await?;
            if envelope.event.info_hash() == info_hash {
                return Some(envelope);
            }
        }
    }
}
