//! Up-next descriptors handed to the UI host near the end of an episode.
//!
//! # Design
//! - Show sessions describe catalog episodes and point at the show play URL.
//! - Query sessions describe neighbouring candidate files; their ids are
//!   content fingerprints so the host can de-duplicate them.
//! - Movies never produce a payload.

use serde::{Deserialize, Serialize};

use crate::candidates::CandidateSet;
use crate::catalog::{EpisodeInfo, MetadataCatalog, next_episode};
use crate::error::{PlayerError, PlayerResult};
use crate::resume::content_fingerprint;

/// One side of an up-next payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpNextEpisode {
    /// Stable episode identifier.
    pub episode_id: String,
    /// Stable show identifier.
    pub tvshow_id: String,
    /// Episode title.
    pub title: String,
    /// Season number, when known.
    pub season: Option<u32>,
    /// Episode number, when known.
    pub episode: Option<u32>,
    /// Show title.
    pub show_title: String,
    /// Episode synopsis.
    pub plot: String,
    /// Catalog rating.
    pub rating: f32,
    /// First air date (`YYYY-MM-DD`).
    pub first_aired: Option<String>,
    /// Runtime in seconds.
    pub runtime_secs: u32,
}

/// Current and next episode plus the URL that plays the next one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpNextPayload {
    /// Episode being watched.
    pub current_episode: UpNextEpisode,
    /// Episode to offer next.
    pub next_episode: UpNextEpisode,
    /// Host-relative play URL for the next episode.
    pub play_url: String,
}

fn catalog_episode(show_id: u64, show_title: &str, episode: &EpisodeInfo) -> UpNextEpisode {
    UpNextEpisode {
        episode_id: episode.id.to_string(),
        tvshow_id: show_id.to_string(),
        title: episode.name.clone(),
        season: Some(episode.season),
        episode: Some(episode.episode),
        show_title: show_title.to_string(),
        plot: episode.overview.clone(),
        rating: episode.rating,
        first_aired: episode.air_date.clone(),
        runtime_secs: episode.runtime_mins.saturating_mul(60),
    }
}

/// Payload for a show session; `None` when the catalog has no next episode.
pub(crate) async fn show_payload(
    catalog: &dyn MetadataCatalog,
    show_id: u64,
    season: u32,
    episode: u32,
) -> anyhow::Result<Option<UpNextPayload>> {
    let Some(show) = catalog.show(show_id).await? else {
        return Ok(None);
    };
    let Some(current) = catalog.episode(show_id, season, episode).await? else {
        return Ok(None);
    };
    let Some(next) = next_episode(catalog, show_id, season, episode).await? else {
        return Ok(None);
    };
    Ok(Some(UpNextPayload {
        current_episode: catalog_episode(show_id, &show.name, &current),
        next_episode: catalog_episode(show_id, &show.name, &next),
        play_url: format!(
            "/show/{show_id}/season/{}/episode/{}/play?silent=true",
            next.season, next.episode
        ),
    }))
}

/// Payload for a query or history session, built from neighbouring candidates.
///
/// # Errors
///
/// Returns [`PlayerError::NoCandidates`] when the current candidate has no
/// successor.
pub(crate) fn query_payload(
    candidates: &CandidateSet,
    current: usize,
    query: Option<&str>,
    info_hash: &str,
    torrent_name: &str,
) -> PlayerResult<UpNextPayload> {
    let next = current + 1;
    let (Some(current_file), Some(next_file)) =
        (candidates.files.get(current), candidates.files.get(next))
    else {
        return Err(PlayerError::NoCandidates);
    };

    let show_id = content_fingerprint(&[info_hash]).to_string();
    let describe = |filename: &str| UpNextEpisode {
        episode_id: content_fingerprint(&[info_hash, filename]).to_string(),
        tvshow_id: show_id.clone(),
        title: filename.to_string(),
        show_title: torrent_name.to_string(),
        ..UpNextEpisode::default()
    };

    let play_url = match query.filter(|query| !query.trim().is_empty()) {
        Some(query) => format!(
            "/search?q={}&index={next}&silent=true",
            urlencoding::encode(query)
        ),
        None => format!("/history?infohash={info_hash}&index={next}&silent=true"),
    };
    Ok(UpNextPayload {
        current_episode: describe(&current_file.filename),
        next_episode: describe(&next_file.filename),
        play_url,
    })
}
