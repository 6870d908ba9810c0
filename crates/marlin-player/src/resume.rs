//! Stored resume positions and the post-buffering rate-limit policy.
//!
//! # Design
//! - Resume records live in the `common` cache bucket under
//!   `stored.resume.<token>`; the token fingerprints `(info-hash, path)`.
//! - Positions under three minutes and watched content leave no record.
//! - Rate limits are only touched when `limit_after_buffering` is set, and
//!   teardown always lifts them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use marlin_config::{PlayerSettings, ResumeAction};
use marlin_torrent_core::{TorrentEngine, TorrentRateLimit};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cache::{COMMON_BUCKET, KeyValueCache};

/// Positions below this many seconds are not worth resuming.
pub const MIN_RESUME_POSITION_SECS: f64 = 180.0;

const RESUME_KEY_PREFIX: &str = "stored.resume.";

/// Position and duration of an interrupted playback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// Position in seconds.
    pub position_secs: f64,
    /// Duration in seconds.
    pub total_secs: f64,
}

impl ResumePoint {
    /// Whether the point refers to a real position.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.position_secs > 0.0
    }
}

impl fmt::Display for ResumePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {}",
            clock(self.position_secs),
            clock(self.total_secs)
        )
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "seconds are clamped to zero and rounded before the cast"
)]
fn clock(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    format!("{:02}:{:02}:{:02}", total / 3_600, total / 60 % 60, total % 60)
}

/// Stable decimal fingerprint of `parts`.
pub(crate) fn content_fingerprint(parts: &[&str]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Resume token for a file of a torrent.
#[must_use]
pub fn resume_token(info_hash: &str, path: &str) -> String {
    content_fingerprint(&[info_hash, path]).to_string()
}

/// Outcome of [`ResumeStore::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeWrite {
    /// Nothing to persist (unknown position or duration).
    Skipped,
    /// The record was removed.
    Deleted,
    /// The record was written.
    Stored,
}

/// Resume records in the key-value cache.
#[derive(Clone)]
pub struct ResumeStore {
    cache: Arc<dyn KeyValueCache>,
    ttl: Duration,
}

impl ResumeStore {
    /// Store writing records that expire after `ttl`.
    #[must_use]
    pub fn new(cache: Arc<dyn KeyValueCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn key(token: &str) -> String {
        format!("{RESUME_KEY_PREFIX}{token}")
    }

    /// Stored record for `token`. Unreadable records count as missing.
    pub async fn fetch(&self, token: &str) -> Option<ResumePoint> {
        match self.cache.get(COMMON_BUCKET, &Self::key(token)).await {
            Ok(Some(value)) => serde_json::from_value(value)
                .map_err(|err| warn!(error = %err, token, "discarding malformed resume record"))
                .ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, token, "failed to read resume record");
                None
            }
        }
    }

    /// Persist `point` unless it is empty, watched, or too early to matter.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache write fails.
    pub async fn save(
        &self,
        token: &str,
        point: ResumePoint,
        watched: bool,
    ) -> anyhow::Result<ResumeWrite> {
        if point.total_secs <= 0.0 || point.position_secs <= 0.0 {
            return Ok(ResumeWrite::Skipped);
        }
        let key = Self::key(token);
        if watched || point.position_secs < MIN_RESUME_POSITION_SECS {
            self.cache.delete(COMMON_BUCKET, &key).await?;
            return Ok(ResumeWrite::Deleted);
        }
        self.cache
            .set(COMMON_BUCKET, &key, self.ttl, serde_json::to_value(point)?)
            .await?;
        Ok(ResumeWrite::Stored)
    }

    /// Drop the record for `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache delete fails.
    pub async fn reset(&self, token: &str) -> anyhow::Result<()> {
        self.cache.delete(COMMON_BUCKET, &Self::key(token)).await
    }
}

/// How a resume position is handled before playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResumeDecision {
    /// No usable position.
    Skip,
    /// Seek without asking.
    Resume,
    /// Ask the host first.
    Ask,
}

pub(crate) fn resume_decision(
    point: Option<ResumePoint>,
    settings: &PlayerSettings,
    background: bool,
    headless: bool,
) -> ResumeDecision {
    if background || !point.is_some_and(|point| point.is_set()) {
        return ResumeDecision::Skip;
    }
    match settings.resume_action {
        ResumeAction::Disabled => ResumeDecision::Skip,
        ResumeAction::Always => ResumeDecision::Resume,
        ResumeAction::Ask if settings.silent_stream_start || headless => ResumeDecision::Resume,
        ResumeAction::Ask => ResumeDecision::Ask,
    }
}

/// Applies and lifts global transfer caps around buffering.
#[derive(Clone)]
pub struct RateLimitPolicy {
    engine: Arc<dyn TorrentEngine>,
    settings: Arc<PlayerSettings>,
}

impl RateLimitPolicy {
    /// Policy driven by `settings`.
    #[must_use]
    pub fn new(engine: Arc<dyn TorrentEngine>, settings: Arc<PlayerSettings>) -> Self {
        Self { engine, settings }
    }

    /// Apply the configured caps once buffering finished. Returns whether the
    /// engine was updated.
    pub async fn apply_buffered(&self) -> bool {
        if !self.settings.limit_after_buffering {
            return false;
        }
        let limits = self.settings.buffered_rate_limit();
        if limits.is_unlimited() {
            return false;
        }
        info!(
            download_bps = ?limits.download_bps,
            upload_bps = ?limits.upload_bps,
            "buffer filled, applying rate limits"
        );
        self.update(limits).await
    }

    /// Lift both caps. Returns whether the engine was updated.
    pub async fn reset(&self) -> bool {
        if !self.settings.limit_after_buffering {
            return false;
        }
        info!("resetting rate limits");
        self.update(TorrentRateLimit::unlimited()).await
    }

    async fn update(&self, limits: TorrentRateLimit) -> bool {
        self.engine
            .update_limits(limits)
            .await
            .map_err(|err| warn!(error = %err, "failed to update rate limits"))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn store() -> ResumeStore {
        ResumeStore::new(Arc::new(MemoryCache::new()), Duration::from_secs(3_600))
    }

    #[test]
    fn tokens_are_stable_and_path_sensitive() {
        let first = resume_token("abc", "show/e1.mkv");
        assert_eq!(first, resume_token("abc", "show/e1.mkv"));
        assert_ne!(first, resume_token("abc", "show/e2.mkv"));
        assert!(first.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn resume_round_trip_keeps_mid_positions() -> anyhow::Result<()> {
        let store = store();
        let point = ResumePoint {
            position_secs: 600.0,
            total_secs: 1_200.0,
        };
        assert_eq!(store.save("t", point, false).await?, ResumeWrite::Stored);
        assert_eq!(store.fetch("t").await, Some(point));

        store.reset("t").await?;
        assert_eq!(store.fetch("t").await, None);
        Ok(())
    }

    #[tokio::test]
    async fn early_or_watched_positions_leave_no_record() -> anyhow::Result<()> {
        let store = store();
        let mid = ResumePoint {
            position_secs: 600.0,
            total_secs: 1_200.0,
        };
        store.save("t", mid, false).await?;

        let early = ResumePoint {
            position_secs: 179.0,
            total_secs: 1_200.0,
        };
        assert_eq!(store.save("t", early, false).await?, ResumeWrite::Deleted);
        assert_eq!(store.fetch("t").await, None);

        store.save("t", mid, false).await?;
        assert_eq!(store.save("t", mid, true).await?, ResumeWrite::Deleted);
        assert_eq!(store.fetch("t").await, None);

        let unknown = ResumePoint {
            position_secs: 600.0,
            total_secs: 0.0,
        };
        assert_eq!(store.save("t", unknown, false).await?, ResumeWrite::Skipped);
        Ok(())
    }

    #[test]
    fn decision_follows_action_and_host() {
        let point = Some(ResumePoint {
            position_secs: 400.0,
            total_secs: 1_000.0,
        });
        let ask = PlayerSettings::default();
        assert_eq!(resume_decision(point, &ask, false, false), ResumeDecision::Ask);
        assert_eq!(resume_decision(point, &ask, false, true), ResumeDecision::Resume);
        assert_eq!(resume_decision(point, &ask, true, false), ResumeDecision::Skip);
        assert_eq!(resume_decision(None, &ask, false, false), ResumeDecision::Skip);

        let disabled = PlayerSettings {
            resume_action: ResumeAction::Disabled,
            ..PlayerSettings::default()
        };
        assert_eq!(
            resume_decision(point, &disabled, false, false),
            ResumeDecision::Skip
        );
        let silent = PlayerSettings {
            silent_stream_start: true,
            ..PlayerSettings::default()
        };
        assert_eq!(resume_decision(point, &silent, false, false), ResumeDecision::Resume);
    }

    #[test]
    fn resume_point_renders_clock() {
        let point = ResumePoint {
            position_secs: 3_725.0,
            total_secs: 5_400.0,
        };
        assert_eq!(point.to_string(), "01:02:05 / 01:30:00");
    }
}
