//! Next-file prediction and readiness.
//!
//! # Design
//! - Series sessions probe filename patterns for the following episode; query
//!   sessions walk the candidate list.
//! - Prediction only picks the file. The session decides when the file is
//!   buffered, once [`is_ready_for_next_file`] holds.

use marlin_config::PlayerSettings;
use marlin_torrent_core::{ReadaheadSnapshot, StorageKind, TorrentMetadata};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::candidates::{
    CandidateSet, ChosenFile, match_bare_episode, match_exact_episode, resolve_candidates,
};
use crate::catalog::{MetadataCatalog, absolute_number_of};
use crate::error::PlayerResult;
use crate::params::{ContentIdentity, PlaybackRequest};

/// Watched percentage after which file-backed sessions pre-buffer the next
/// file.
const NEXT_FILE_PROGRESS: f64 = 90.0;

/// Next-file descriptor kept by a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextEpisode {
    /// Predicted file, once found.
    pub file: Option<ChosenFile>,
    /// Buffering of the file has begun.
    pub started: bool,
    /// Prediction ran; it never runs twice per session.
    pub done: bool,
    /// Bytes the file's buffer window requires.
    pub buffer_size: u64,
}

impl NextEpisode {
    /// Whether the file is known and its buffering has not begun.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.file.is_some() && !self.started
    }
}

/// Whether the torrent can take on the next file's buffer now.
///
/// File storage waits until the current file is past 90% and watched. Memory
/// storage needs free readahead capacity for the next window and no pieces
/// still awaited by readers.
#[must_use]
pub fn is_ready_for_next_file(
    storage: StorageKind,
    watched_progress: f64,
    watched: bool,
    readahead: Option<ReadaheadSnapshot>,
    next_buffer: u64,
) -> bool {
    match storage {
        StorageKind::File => watched_progress > NEXT_FILE_PROGRESS && watched,
        StorageKind::Memory => readahead.is_some_and(|readahead| {
            readahead.capacity_bytes > 0
                && readahead.capacity_bytes
                    > readahead
                        .readers_demand_bytes
                        .saturating_add(next_buffer)
                && readahead.awaiting_pieces == 0
        }),
    }
}

/// Whether next-file prediction applies to `identity`.
pub(crate) fn prediction_applies(identity: &ContentIdentity, settings: &PlayerSettings) -> bool {
    settings.smart_episode_start
        && !identity.is_movie()
        && (identity.has_series() || identity.has_query())
}

fn chosen_at(
    meta: &TorrentMetadata,
    candidates: &CandidateSet,
    position: usize,
) -> Option<ChosenFile> {
    let candidate = candidates.files.get(position)?;
    meta.file(candidate.index).map(|file| ChosenFile {
        file: file.clone(),
        candidate_index: Some(position),
        is_archive: candidates.is_archive,
    })
}

async fn absolute_number(
    catalog: &dyn MetadataCatalog,
    identity: &ContentIdentity,
) -> Option<u32> {
    if identity.absolute_number.is_some() {
        return identity.absolute_number;
    }
    let (show_id, season, episode) = (identity.show_id?, identity.season?, identity.episode?);
    let lookup = async {
        let Some(show) = catalog.show(show_id).await? else {
            return anyhow::Ok(None);
        };
        Ok(catalog
            .episode(show_id, season, episode)
            .await?
            .and_then(|info| absolute_number_of(&show, &info)))
    };
    lookup.await.unwrap_or_else(|err| {
        warn!(error = %err, show_id, "absolute number lookup failed");
        None
    })
}

/// Probe the candidates for the episode after the one being played.
async fn next_series_file(
    catalog: &dyn MetadataCatalog,
    meta: &TorrentMetadata,
    candidates: &CandidateSet,
    identity: &ContentIdentity,
) -> PlayerResult<Option<ChosenFile>> {
    let (Some(season), Some(episode)) = (identity.season, identity.episode) else {
        return Ok(None);
    };
    let choices = &candidates.files;

    let mut position = match_exact_episode(season, episode + 1, choices)?.unique();
    if position.is_none()
        && let Some(absolute) = absolute_number(catalog, identity).await
    {
        position = match_bare_episode(absolute + 1, choices)?.unique();
    }
    if position.is_none() {
        position = match_bare_episode(episode + 1, choices)?.unique();
    }
    if position.is_none() {
        position = match_exact_episode(season + 1, 1, choices)?.unique();
    }
    debug!(season, episode, next = ?position, "series next-file probe");
    Ok(position.and_then(|position| chosen_at(meta, candidates, position)))
}

fn next_flat_file(
    meta: &TorrentMetadata,
    candidates: &CandidateSet,
    request: &PlaybackRequest,
    current: Option<usize>,
) -> Option<ChosenFile> {
    if let Some(position) = request.next_index
        && let Some(chosen) = chosen_at(meta, candidates, position)
    {
        return Some(chosen);
    }
    if let Some(index) = request.next_original_index
        && let Some(file) = meta.file(index)
    {
        return Some(ChosenFile {
            file: file.clone(),
            candidate_index: candidates.position_of(index),
            is_archive: candidates.is_archive,
        });
    }
    chosen_at(meta, candidates, current? + 1)
}

/// Pick the file to play after the current one.
///
/// `current` is the candidate position of the file being played. `Ok(None)`
/// means there is no next file, which is not an error.
///
/// # Errors
///
/// Returns an error if the candidate list is empty or a pattern fails to
/// compile.
pub(crate) async fn predict_next_file(
    catalog: &dyn MetadataCatalog,
    settings: &PlayerSettings,
    meta: &TorrentMetadata,
    request: &PlaybackRequest,
    current: Option<usize>,
) -> PlayerResult<Option<ChosenFile>> {
    let identity = &request.identity;
    if !prediction_applies(identity, settings) {
        return Ok(None);
    }
    let candidates = resolve_candidates(&meta.files)?;
    if identity.has_series() {
        next_series_file(catalog, meta, &candidates, identity).await
    } else {
        Ok(next_flat_file(meta, &candidates, request, current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EpisodeInfo, SeasonInfo, SeasonSummary, ShowInfo};
    use async_trait::async_trait;
    use marlin_torrent_core::TorrentFile;

    const MIB: u64 = 1024 * 1024;

    struct NoCatalog;

    #[async_trait]
    impl MetadataCatalog for NoCatalog {
        async fn show(&self, _show_id: u64) -> anyhow::Result<Option<ShowInfo>> {
            Ok(None)
        }

        async fn season(&self, _show_id: u64, _season: u32) -> anyhow::Result<Option<SeasonInfo>> {
            Ok(None)
        }
    }

    struct AnimeCatalog;

    #[async_trait]
    impl MetadataCatalog for AnimeCatalog {
        async fn show(&self, show_id: u64) -> anyhow::Result<Option<ShowInfo>> {
            Ok(Some(ShowInfo {
                id: show_id,
                name: "Comet Run".to_string(),
                original_name: "Comet Run".to_string(),
                is_anime: true,
                seasons: vec![SeasonSummary {
                    number: 2,
                    episode_count: 12,
                }],
            }))
        }

        async fn season(&self, _show_id: u64, season: u32) -> anyhow::Result<Option<SeasonInfo>> {
            Ok(Some(SeasonInfo {
                number: season,
                episodes: vec![EpisodeInfo {
                    id: 77,
                    season,
                    episode: 3,
                    name: "Third".to_string(),
                    overview: String::new(),
                    air_date: None,
                    runtime_mins: 24,
                    rating: 0.0,
                    absolute_number: Some(27),
                }],
            }))
        }
    }

    fn metadata(names: &[&str]) -> TorrentMetadata {
        let files: Vec<TorrentFile> = names
            .iter()
            .enumerate()
            .map(|(index, name)| TorrentFile {
                index,
                path: format!("Pack/{name}"),
                size_bytes: 100 * MIB,
                offset: index as u64 * 100 * MIB,
            })
            .collect();
        TorrentMetadata {
            name: "Pack".to_string(),
            piece_length: MIB,
            total_size: files.len() as u64 * 100 * MIB,
            files,
        }
    }

    fn series_request(season: u32, episode: u32) -> PlaybackRequest {
        PlaybackRequest::new("magnet:?xt=urn:btih:abc")
            .with_identity(ContentIdentity::episode(10, 1_001, season, episode))
    }

    #[test]
    fn file_storage_needs_watched_and_ninety_percent() {
        assert!(is_ready_for_next_file(StorageKind::File, 91.0, true, None, 0));
        assert!(!is_ready_for_next_file(StorageKind::File, 91.0, false, None, 0));
        assert!(!is_ready_for_next_file(StorageKind::File, 90.0, true, None, 0));
    }

    #[test]
    fn memory_storage_needs_spare_capacity() {
        let snapshot = |capacity_bytes, awaiting_pieces| ReadaheadSnapshot {
            capacity_bytes,
            readers_demand_bytes: 400,
            awaiting_pieces,
        };
        assert!(is_ready_for_next_file(
            StorageKind::Memory,
            0.0,
            false,
            Some(snapshot(1_000, 0)),
            500
        ));
        assert!(!is_ready_for_next_file(
            StorageKind::Memory,
            0.0,
            false,
            Some(snapshot(800, 0)),
            500
        ));
        assert!(!is_ready_for_next_file(
            StorageKind::Memory,
            0.0,
            false,
            Some(snapshot(1_000, 2)),
            500
        ));
        assert!(!is_ready_for_next_file(StorageKind::Memory, 99.0, true, None, 0));
    }

    #[tokio::test]
    async fn series_prediction_prefers_next_episode_in_season() -> anyhow::Result<()> {
        let meta = metadata(&["Show.S01E01.mkv", "Show.S01E02.mkv", "Show.S01E03.mkv"]);
        let settings = PlayerSettings::default();
        let next =
            predict_next_file(&NoCatalog, &settings, &meta, &series_request(1, 2), Some(1)).await?;
        let next = next.ok_or_else(|| anyhow::anyhow!("expected a next file"))?;
        assert_eq!(next.file.index, 2);
        assert_eq!(next.candidate_index, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn series_prediction_rolls_into_next_season() -> anyhow::Result<()> {
        let meta = metadata(&["Show.S01E09.mkv", "Show.S01E10.mkv", "Show.S02E01.mkv"]);
        let settings = PlayerSettings::default();
        let next =
            predict_next_file(&NoCatalog, &settings, &meta, &series_request(1, 10), None).await?;
        assert_eq!(next.map(|chosen| chosen.file.index), Some(2));

        let last =
            predict_next_file(&NoCatalog, &settings, &meta, &series_request(2, 1), None).await?;
        assert!(last.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn absolute_numbers_drive_anime_probes() -> anyhow::Result<()> {
        let meta = metadata(&["[Grp] Comet Run - 27.mkv", "[Grp] Comet Run - 28.mkv"]);
        let settings = PlayerSettings::default();
        let next =
            predict_next_file(&AnimeCatalog, &settings, &meta, &series_request(2, 3), None).await?;
        assert_eq!(next.map(|chosen| chosen.file.index), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn flat_prediction_honours_overrides_then_successor() -> anyhow::Result<()> {
        let meta = metadata(&["a.mkv", "b.mkv", "c.mkv"]);
        let settings = PlayerSettings::default();
        let query = PlaybackRequest::new("magnet:?xt=urn:btih:abc")
            .with_identity(ContentIdentity::search("pack"));

        let successor = predict_next_file(&NoCatalog, &settings, &meta, &query, Some(0)).await?;
        assert_eq!(successor.map(|chosen| chosen.file.index), Some(1));

        let overridden = PlaybackRequest {
            next_index: Some(2),
            ..query.clone()
        };
        let next = predict_next_file(&NoCatalog, &settings, &meta, &overridden, Some(0)).await?;
        assert_eq!(next.map(|chosen| chosen.file.index), Some(2));

        let original = PlaybackRequest {
            next_original_index: Some(2),
            ..query.clone()
        };
        let next = predict_next_file(&NoCatalog, &settings, &meta, &original, Some(0)).await?;
        assert_eq!(next.map(|chosen| chosen.candidate_index), Some(Some(2)));

        let end = predict_next_file(&NoCatalog, &settings, &meta, &query, Some(2)).await?;
        assert!(end.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn movies_and_disabled_setting_skip_prediction() -> anyhow::Result<()> {
        let meta = metadata(&["a.mkv", "b.mkv"]);
        let movie = PlaybackRequest::new("magnet:?xt=urn:btih:abc")
            .with_identity(ContentIdentity::movie(5));
        let settings = PlayerSettings::default();
        assert!(
            predict_next_file(&NoCatalog, &settings, &meta, &movie, Some(0))
                .await?
                .is_none()
        );

        let disabled = PlayerSettings {
            smart_episode_start: false,
            ..PlayerSettings::default()
        };
        let series = series_request(1, 1);
        assert!(
            predict_next_file(&NoCatalog, &disabled, &meta, &series, Some(0))
                .await?
                .is_none()
        );
        Ok(())
    }
}
