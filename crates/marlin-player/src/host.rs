//! Capability interface onto the UI host that drives playback.
//!
//! # Design
//! - Sessions receive one `Arc<dyn UiHost>` at construction instead of a
//!   concrete front-end object.
//! - Dialog and overlay handles are synchronous: they only forward state.
//! - [`NullHost`] backs headless and background sessions.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::status::StatusLines;
use crate::upnext::UpNextPayload;

/// Watched time and duration reported by the external player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchTimes {
    /// Current playback position in seconds.
    pub watched_secs: f64,
    /// Total video duration in seconds; `0` while unknown.
    pub duration_secs: f64,
}

/// Progress dialog shown while buffering.
pub trait ProgressDialog: Send + Sync {
    /// Replace the dialog contents.
    fn update(&self, percent: u8, lines: &StatusLines);
    /// Whether the user pressed cancel.
    fn is_cancelled(&self) -> bool;
    /// Dismiss the dialog.
    fn close(&self);
}

/// Status overlay shown over a paused video.
pub trait OverlayStatus: Send + Sync {
    /// Replace the overlay contents.
    fn update(&self, percent: u8, lines: &StatusLines);
    /// Make the overlay visible.
    fn show(&self);
    /// Hide the overlay.
    fn hide(&self);
    /// Release the overlay.
    fn close(&self);
}

/// Front-end capabilities used by a playback session.
#[async_trait]
pub trait UiHost: Send + Sync {
    /// Headless hosts never show dialogs and never report playback.
    fn is_headless(&self) -> bool {
        false
    }

    /// Open a progress dialog; `None` when the host cannot show one yet.
    async fn new_progress_dialog(&self, title: &str) -> Option<Arc<dyn ProgressDialog>>;

    /// Create a status overlay.
    async fn new_overlay(&self) -> Option<Arc<dyn OverlayStatus>>;

    /// Blocking yes/no question.
    async fn confirm(&self, title: &str, message: &str) -> bool;

    /// Ask the user to pick one of `items`; `None` when dismissed.
    async fn select(&self, title: &str, items: &[String]) -> Option<usize>;

    /// Transient notification.
    async fn notify(&self, title: &str, message: &str);

    /// Attach external subtitle or audio tracks to the running player.
    async fn set_subtitles(&self, urls: &[String]);

    /// Whether the player is currently playing (paused counts as playing).
    async fn is_playing(&self) -> bool;

    /// Whether playback is paused.
    async fn is_paused(&self) -> bool;

    /// Position and duration; `None` when the player cannot report them.
    async fn watch_times(&self) -> Option<WatchTimes>;

    /// Hand an up-next descriptor to the host.
    async fn up_next(&self, payload: &UpNextPayload);
}

/// Host used when no front-end is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

#[async_trait]
impl UiHost for NullHost {
    fn is_headless(&self) -> bool {
        true
    }

    async fn new_progress_dialog(&self, _title: &str) -> Option<Arc<dyn ProgressDialog>> {
        None
    }

    async fn new_overlay(&self) -> Option<Arc<dyn OverlayStatus>> {
        None
    }

    async fn confirm(&self, _title: &str, _message: &str) -> bool {
        false
    }

    async fn select(&self, _title: &str, _items: &[String]) -> Option<usize> {
        None
    }

    async fn notify(&self, _title: &str, _message: &str) {}

    async fn set_subtitles(&self, _urls: &[String]) {}

    async fn is_playing(&self) -> bool {
        false
    }

    async fn is_paused(&self) -> bool {
        false
    }

    async fn watch_times(&self) -> Option<WatchTimes> {
        None
    }

    async fn up_next(&self, _payload: &UpNextPayload) {}
}
