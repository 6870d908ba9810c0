//! Front-end entry point owning every live playback session.
//!
//! # Design
//! - One [`PlayerService`] per process; sessions share its collaborators.
//! - Finished sessions stay listed until `stop` or `prune` so front-ends can
//!   read their final status and error.

use std::collections::HashMap;
use std::sync::Arc;

use marlin_events::{EventId, EventStream};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PlayerError, PlayerResult};
use crate::params::PlaybackRequest;
use crate::session::{PlaybackSession, SessionDeps, SessionPhase};
use crate::status::SessionStatus;

/// Creates, tracks and stops playback sessions.
pub struct PlayerService {
    deps: SessionDeps,
    sessions: RwLock<HashMap<Uuid, Arc<PlaybackSession>>>,
}

impl PlayerService {
    /// Service sharing `deps` with every session it creates.
    #[must_use]
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Collaborators handed to new sessions.
    #[must_use]
    pub const fn deps(&self) -> &SessionDeps {
        &self.deps
    }

    /// Subscribe to session events, replaying from `since` when given.
    #[must_use]
    pub fn events(&self, since: Option<EventId>) -> EventStream {
        self.deps.bus.subscribe(since)
    }

    /// Start a session for `request` and wait for its first buffering cycle.
    /// Playback monitoring continues in the background.
    ///
    /// # Errors
    ///
    /// Returns the buffering failure; the session is closed and dropped.
    pub async fn buffer_and_play(&self, request: PlaybackRequest) -> PlayerResult<Uuid> {
        let session = PlaybackSession::new(self.deps.clone(), request);
        let id = session.id();
        self.sessions.write().await.insert(id, Arc::clone(&session));
        info!(session_id = %id, uri = %session.params().request.uri, "session created");

        match session.buffer().await {
            Ok(()) => Ok(id),
            Err(err) => {
                if !err.is_user_abort() {
                    warn!(session_id = %id, error = %err, "buffering failed");
                }
                self.sessions.write().await.remove(&id);
                Err(err)
            }
        }
    }

    /// Session by id.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::SessionNotFound`] for an unknown id.
    pub async fn session(&self, id: Uuid) -> PlayerResult<Arc<PlaybackSession>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(PlayerError::SessionNotFound { session_id: id })
    }

    /// Snapshot of one session.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::SessionNotFound`] for an unknown id.
    pub async fn status(&self, id: Uuid) -> PlayerResult<SessionStatus> {
        Ok(self.session(id).await?.status())
    }

    /// Snapshots of every tracked session.
    pub async fn list(&self) -> Vec<SessionStatus> {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.iter().map(|session| session.status()).collect()
    }

    /// Close a session and forget it.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::SessionNotFound`] for an unknown id.
    pub async fn stop(&self, id: Uuid) -> PlayerResult<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(&id)
            .ok_or(PlayerError::SessionNotFound { session_id: id })?;
        session.close().await;
        info!(session_id = %id, "session stopped");
        Ok(())
    }

    /// Forward a seek reported by the player.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::SessionNotFound`] for an unknown id.
    pub async fn notify_seeked(&self, id: Uuid) -> PlayerResult<()> {
        self.session(id).await?.params().mark_seeked();
        Ok(())
    }

    /// Forward a pause or resume reported by the player.
    ///
    /// # Errors
    ///
    /// Returns [`PlayerError::SessionNotFound`] for an unknown id.
    pub async fn notify_paused(&self, id: Uuid, paused: bool) -> PlayerResult<()> {
        self.session(id).await?.params().set_paused(paused);
        Ok(())
    }

    /// Drop sessions that have stopped and return how many were removed.
    pub async fn prune(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.phase() != SessionPhase::Stopped);
        before - sessions.len()
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
    }
}
