//! Watch-state service interface (scrobbling and watched flags).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::params::ContentIdentity;
use crate::resume::ResumePoint;

/// Scrobble transitions reported to the watch-state service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrobbleAction {
    /// Playback started or resumed.
    Start,
    /// Playback paused, or stopped before the watched threshold.
    Pause,
    /// Playback stopped after the watched threshold.
    Stop,
}

impl ScrobbleAction {
    /// Lowercase label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Stop => "stop",
        }
    }
}

/// Position report attached to scrobbles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchProgress {
    /// Position in seconds.
    pub watched_secs: f64,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl WatchProgress {
    /// Position as a percentage of the duration.
    #[must_use]
    pub const fn percent(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.watched_secs / self.duration_secs * 100.0
        } else {
            0.0
        }
    }
}

/// Remote watch-state service.
#[async_trait]
pub trait WatchStateService: Send + Sync {
    /// Report a playback transition.
    async fn scrobble(
        &self,
        action: ScrobbleAction,
        identity: &ContentIdentity,
        progress: WatchProgress,
    ) -> anyhow::Result<()>;

    /// Mark the content as watched.
    async fn set_watched(
        &self,
        identity: &ContentIdentity,
        progress: WatchProgress,
    ) -> anyhow::Result<()>;

    /// Position stored remotely for the content, if any.
    async fn resume_point(&self, identity: &ContentIdentity) -> anyhow::Result<Option<ResumePoint>>;
}

/// Watch-state service that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWatchState;

#[async_trait]
impl WatchStateService for NoopWatchState {
    async fn scrobble(
        &self,
        _action: ScrobbleAction,
        _identity: &ContentIdentity,
        _progress: WatchProgress,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_watched(
        &self,
        _identity: &ContentIdentity,
        _progress: WatchProgress,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn resume_point(
        &self,
        _identity: &ContentIdentity,
    ) -> anyhow::Result<Option<ResumePoint>> {
        Ok(None)
    }
}
