//! Metadata catalog interface (show, season and episode lookups).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Season entry listed on a show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonSummary {
    /// Season number; `0` holds specials.
    pub number: u32,
    /// Episodes announced for the season.
    pub episode_count: u32,
}

/// Show metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowInfo {
    /// Catalog id.
    pub id: u64,
    /// Localized name.
    pub name: String,
    /// Name in the original language.
    pub original_name: String,
    /// Anime shows are matched by absolute episode number as well.
    pub is_anime: bool,
    /// Seasons in catalog order.
    pub seasons: Vec<SeasonSummary>,
}

impl ShowInfo {
    /// Seasons that are not specials and have episodes.
    #[must_use]
    pub fn real_season_count(&self) -> usize {
        self.seasons
            .iter()
            .filter(|season| season.number > 0 && season.episode_count > 0)
            .count()
    }

    /// Absolute number of `(season, episode)` counted across regular seasons.
    #[must_use]
    pub fn absolute_number(&self, season: u32, episode: u32) -> Option<u32> {
        if season == 0 || episode == 0 {
            return None;
        }
        let preceding: u32 = self
            .seasons
            .iter()
            .filter(|entry| entry.number > 0 && entry.number < season)
            .map(|entry| entry.episode_count)
            .sum();
        Some(preceding + episode)
    }
}

/// Episode metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    /// Catalog id.
    pub id: u64,
    /// Season number.
    pub season: u32,
    /// Episode number within the season.
    pub episode: u32,
    /// Episode title.
    pub name: String,
    /// Synopsis.
    pub overview: String,
    /// First air date (`YYYY-MM-DD`).
    pub air_date: Option<String>,
    /// Runtime in minutes; `0` when unknown.
    pub runtime_mins: u32,
    /// Average rating out of ten.
    pub rating: f32,
    /// Absolute number for anime numbering.
    pub absolute_number: Option<u32>,
}

/// Season with its episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonInfo {
    /// Season number.
    pub number: u32,
    /// Episodes in airing order.
    pub episodes: Vec<EpisodeInfo>,
}

/// Lookups against the remote metadata service.
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    /// Show by id.
    async fn show(&self, show_id: u64) -> anyhow::Result<Option<ShowInfo>>;

    /// Season of a show.
    async fn season(&self, show_id: u64, season: u32) -> anyhow::Result<Option<SeasonInfo>>;

    /// Single episode; defaults to a season lookup.
    async fn episode(
        &self,
        show_id: u64,
        season: u32,
        episode: u32,
    ) -> anyhow::Result<Option<EpisodeInfo>> {
        Ok(self.season(show_id, season).await?.and_then(|info| {
            info.episodes
                .into_iter()
                .find(|entry| entry.episode == episode)
        }))
    }
}

/// Episode following `(season, episode)`: the next one in the season, then the
/// first one of the next season.
pub(crate) async fn next_episode(
    catalog: &dyn MetadataCatalog,
    show_id: u64,
    season: u32,
    episode: u32,
) -> anyhow::Result<Option<EpisodeInfo>> {
    if let Some(next) = catalog.episode(show_id, season, episode + 1).await? {
        return Ok(Some(next));
    }
    catalog.episode(show_id, season + 1, 1).await
}

/// Absolute number of an episode: catalog value first, then derived from the
/// show's season list.
pub(crate) fn absolute_number_of(show: &ShowInfo, episode: &EpisodeInfo) -> Option<u32> {
    episode
        .absolute_number
        .or_else(|| show.absolute_number(episode.season, episode.episode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Fixture {
        seasons: HashMap<u32, SeasonInfo>,
    }

    fn episode(season: u32, number: u32) -> EpisodeInfo {
        EpisodeInfo {
            id: u64::from(season * 100 + number),
            season,
            episode: number,
            name: format!("Episode {number}"),
            overview: String::new(),
            air_date: None,
            runtime_mins: 24,
            rating: 7.5,
            absolute_number: None,
        }
    }

    #[async_trait]
    impl MetadataCatalog for Fixture {
        async fn show(&self, _show_id: u64) -> anyhow::Result<Option<ShowInfo>> {
            Ok(None)
        }

        async fn season(&self, _show_id: u64, season: u32) -> anyhow::Result<Option<SeasonInfo>> {
            Ok(self.seasons.get(&season).cloned())
        }
    }

    fn show() -> ShowInfo {
        ShowInfo {
            id: 1,
            name: "Show".to_string(),
            original_name: "Show".to_string(),
            is_anime: true,
            seasons: vec![
                SeasonSummary {
                    number: 0,
                    episode_count: 3,
                },
                SeasonSummary {
                    number: 1,
                    episode_count: 12,
                },
                SeasonSummary {
                    number: 2,
                    episode_count: 12,
                },
                SeasonSummary {
                    number: 3,
                    episode_count: 0,
                },
            ],
        }
    }

    #[test]
    fn real_seasons_skip_specials_and_empty_entries() {
        assert_eq!(show().real_season_count(), 2);
    }

    #[test]
    fn absolute_numbers_span_regular_seasons() {
        let show = show();
        assert_eq!(show.absolute_number(1, 5), Some(5));
        assert_eq!(show.absolute_number(2, 1), Some(13));
        assert_eq!(show.absolute_number(0, 1), None);

        let mut tagged = episode(2, 1);
        tagged.absolute_number = Some(99);
        assert_eq!(absolute_number_of(&show, &tagged), Some(99));
        assert_eq!(absolute_number_of(&show, &episode(2, 2)), Some(14));
    }

    #[tokio::test]
    async fn next_episode_rolls_over_to_next_season() -> anyhow::Result<()> {
        let catalog = Fixture {
            seasons: HashMap::from([
                (
                    1,
                    SeasonInfo {
                        number: 1,
                        episodes: vec![episode(1, 1), episode(1, 2)],
                    },
                ),
                (
                    2,
                    SeasonInfo {
                        number: 2,
                        episodes: vec![episode(2, 1)],
                    },
                ),
            ]),
        };
        let within = next_episode(&catalog, 1, 1, 1).await?;
        assert_eq!(within.map(|entry| entry.id), Some(102));
        let rollover = next_episode(&catalog, 1, 1, 2).await?;
        assert_eq!(rollover.map(|entry| entry.id), Some(201));
        assert!(next_episode(&catalog, 1, 2, 1).await?.is_none());
        Ok(())
    }
}
