//! Error types surfaced by playback sessions.
//!
//! Every lower-level failure (engine, subprocess, cache) is logged where it
//! happens and converted into one of these kinds before it reaches a waiter or
//! the UI host.

use thiserror::Error;
use uuid::Uuid;

/// Terminal outcomes of a buffering cycle or session request.
///
/// The type is `Clone` so a single failure can be delivered to every waiter on
/// the buffering signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    /// Filtering left nothing playable in the torrent.
    #[error("no playable candidates left")]
    NoCandidates,
    /// Several candidates remain and nobody picked one.
    #[error("file not chosen")]
    FileNotChosen {
        /// Display names of the remaining candidates, in choice order.
        candidates: Vec<String>,
    },
    /// The download destination cannot hold the chosen file.
    #[error("not enough space on download destination")]
    InsufficientSpace,
    /// The player never reported playback after buffering finished.
    #[error("playback was unable to start before timeout")]
    PlaybackTimeout {
        /// Seconds waited before giving up.
        waited_secs: u64,
    },
    /// The external unpack tool failed.
    #[error("archive extraction failed")]
    ExtractionFailed {
        /// Logged failure detail.
        message: String,
    },
    /// The user cancelled the buffering dialog.
    #[error("user cancelled the buffering")]
    UserCancelled,
    /// A torrent engine call failed.
    #[error("torrent engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Logged failure detail.
        message: String,
    },
    /// An episode pattern could not be compiled.
    #[error("invalid episode pattern")]
    Pattern {
        /// Compiler diagnostic.
        message: String,
    },
    /// The session closed before the operation resolved.
    #[error("playback session closed")]
    Closed,
    /// No session exists with the given id.
    #[error("playback session not found")]
    SessionNotFound {
        /// Requested session id.
        session_id: Uuid,
    },
}

impl PlayerError {
    pub(crate) fn engine(operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Engine {
            operation,
            message: format!("{err:#}"),
        }
    }

    /// Whether the error is a normal abort rather than a failure.
    #[must_use]
    pub const fn is_user_abort(&self) -> bool {
        matches!(self, Self::UserCancelled | Self::Closed)
    }

    /// Metrics label for a buffering cycle ending with this error.
    #[must_use]
    pub const fn outcome_label(&self) -> &'static str {
        match self {
            Self::UserCancelled | Self::Closed => "cancelled",
            Self::InsufficientSpace => "insufficient_space",
            Self::ExtractionFailed { .. } => "extraction_failed",
            Self::NoCandidates | Self::FileNotChosen { .. } => "not_chosen",
            Self::PlaybackTimeout { .. } => "timeout",
            Self::Engine { .. } | Self::Pattern { .. } | Self::SessionNotFound { .. } => "failed",
        }
    }
}

/// Convenience alias for playback results.
pub type PlayerResult<T> = Result<T, PlayerError>;
