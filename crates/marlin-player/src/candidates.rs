//! Playable file filtering, episode matching and file choice.
//!
//! # Design
//! - Candidates are rebuilt from the torrent file list on every call and
//!   never persisted.
//! - Media files win; RAR archives only become candidates when no media file
//!   exists.
//! - Episode matching runs staged patterns and stops at the first stage with
//!   any match. Only a unique match selects a file on its own.

use std::sync::Arc;
use std::time::Duration;

use marlin_config::PlayerSettings;
use marlin_torrent_core::TorrentFile;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::{KeyValueCache, LINKS_BUCKET};
use crate::catalog::{MetadataCatalog, ShowInfo, absolute_number_of};
use crate::error::{PlayerError, PlayerResult};
use crate::host::UiHost;
use crate::params::PlaybackRequest;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "avi", "mov", "wmv", "flv", "webm", "ts", "m2ts", "mts", "mpg", "mpeg",
    "vob", "ogv", "divx", "3gp",
];
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "aac", "ogg", "opus", "wav", "wma", "dts", "ac3", "mka",
];
const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ssa", "ass", "sub", "idx", "smi", "vtt"];
const SKIP_EXTENSIONS: &[&str] = &["srt", "dts", "ac3"];
const ARCHIVE_EXTENSION: &str = "rar";

const LINK_TTL: Duration = Duration::from_secs(365 * 24 * 3_600);
const SELECT_TITLE: &str = "Choose file to play";

/// Torrent file that can be played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFile {
    /// Torrent file index.
    pub index: usize,
    /// File name without directories; patterns match against it.
    pub filename: String,
    /// Path without the directory prefix shared by every candidate.
    pub display_name: String,
    /// Full path within the torrent.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}

/// Ordered candidates of one resolution call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSet {
    /// Candidates sorted by display name.
    pub files: Vec<CandidateFile>,
    /// Whether the candidates are RAR archives.
    pub is_archive: bool,
}

impl CandidateSet {
    /// Display names in choice order.
    #[must_use]
    pub fn display_names(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|file| file.display_name.clone())
            .collect()
    }

    /// Candidate position of torrent file `file_index`.
    #[must_use]
    pub fn position_of(&self, file_index: usize) -> Option<usize> {
        self.files.iter().position(|file| file.index == file_index)
    }
}

/// Result of [`match_episode_filename`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpisodeMatch {
    /// Candidate position of the last match.
    pub index: Option<usize>,
    /// Number of matching candidates in the winning stage.
    pub found: usize,
}

impl EpisodeMatch {
    /// Candidate position when exactly one file matched.
    #[must_use]
    pub const fn unique(&self) -> Option<usize> {
        if self.found == 1 { self.index } else { None }
    }
}

/// Episode numbers to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeQuery {
    /// Season number.
    pub season: u32,
    /// Episode number.
    pub episode: u32,
    /// The show has exactly one real season.
    pub single_season: bool,
    /// Season of the playback request.
    pub active_season: Option<u32>,
    /// Absolute number for anime shows.
    pub absolute_number: Option<u32>,
}

/// File picked for playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenFile {
    /// Torrent file.
    pub file: TorrentFile,
    /// Candidate position, when the file is a candidate.
    pub candidate_index: Option<usize>,
    /// Whether the file is a RAR archive to extract.
    pub is_archive: bool,
}

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

fn has_extension(path: &str, list: &[&str]) -> bool {
    extension(path).is_some_and(|ext| list.contains(&ext.as_str()))
}

pub(crate) fn is_media(path: &str) -> bool {
    has_extension(path, VIDEO_EXTENSIONS) || has_extension(path, AUDIO_EXTENSIONS)
}

pub(crate) fn is_subtitle(path: &str) -> bool {
    has_extension(path, SUBTITLE_EXTENSIONS)
}

/// Build the candidate set for a torrent file list.
///
/// # Errors
///
/// Returns [`PlayerError::NoCandidates`] when nothing is playable.
pub fn resolve_candidates(files: &[TorrentFile]) -> PlayerResult<CandidateSet> {
    let to_candidate = |file: &TorrentFile| CandidateFile {
        index: file.index,
        filename: file.name().to_string(),
        display_name: file.path.clone(),
        path: file.path.clone(),
        size: file.size_bytes,
    };

    let mut media: Vec<CandidateFile> = files
        .iter()
        .filter(|file| !has_extension(&file.path, SKIP_EXTENSIONS) && is_media(&file.path))
        .map(to_candidate)
        .collect();
    let mut is_archive = false;
    if media.is_empty() {
        media = files
            .iter()
            .filter(|file| has_extension(&file.path, &[ARCHIVE_EXTENSION]))
            .map(to_candidate)
            .collect();
        is_archive = true;
    }
    if media.is_empty() {
        return Err(PlayerError::NoCandidates);
    }
    trim_choices(&mut media);
    Ok(CandidateSet {
        files: media,
        is_archive,
    })
}

/// Strip the directory prefix shared by every candidate and sort by display
/// name.
pub fn trim_choices(choices: &mut [CandidateFile]) {
    loop {
        let Some(first) = choices.first() else {
            return;
        };
        let Some((dir, _)) = first.display_name.split_once('/') else {
            break;
        };
        let prefix = format!("{dir}/");
        if !choices
            .iter()
            .all(|choice| choice.display_name.starts_with(&prefix))
        {
            break;
        }
        for choice in choices.iter_mut() {
            choice.display_name = choice.display_name[prefix.len()..].to_string();
        }
    }
    choices.sort_by(|a, b| a.display_name.cmp(&b.display_name));
}

fn compile(pattern: &str) -> PlayerResult<Regex> {
    Regex::new(pattern).map_err(|err| PlayerError::Pattern {
        message: err.to_string(),
    })
}

fn exact_pattern(season: u32, episode: u32) -> PlayerResult<Regex> {
    compile(&format!(
        r"(?i)(^|\W|_|\w)(S0*{season}[x\W]?E?p?0*{episode}|0*{season}[x\W]0*{episode}|\W0*{season}\D{{1,5}}0*{episode})(\W|_|\D)"
    ))
}

fn bare_pattern(number: u32) -> PlayerResult<Regex> {
    compile(&format!(r"(?i)(^|\W|_)(Ep?0*{number}|0*{number})(\W|_)"))
}

fn count_matches(pattern: &Regex, choices: &[CandidateFile]) -> EpisodeMatch {
    choices
        .iter()
        .enumerate()
        .filter(|(_, choice)| pattern.is_match(&choice.filename))
        .fold(EpisodeMatch::default(), |acc, (index, _)| EpisodeMatch {
            index: Some(index),
            found: acc.found + 1,
        })
}

/// Match `SxxEyy`-style names.
///
/// # Errors
///
/// Returns [`PlayerError::Pattern`] if the pattern fails to compile.
pub fn match_exact_episode(
    season: u32,
    episode: u32,
    choices: &[CandidateFile],
) -> PlayerResult<EpisodeMatch> {
    Ok(count_matches(&exact_pattern(season, episode)?, choices))
}

/// Match a bare episode number.
///
/// # Errors
///
/// Returns [`PlayerError::Pattern`] if the pattern fails to compile.
pub fn match_bare_episode(number: u32, choices: &[CandidateFile]) -> PlayerResult<EpisodeMatch> {
    Ok(count_matches(&bare_pattern(number)?, choices))
}

/// Staged episode match: exact pattern, bare number for single-season shows,
/// absolute number, bare number within the active season.
///
/// # Errors
///
/// Returns [`PlayerError::Pattern`] if a pattern fails to compile.
pub fn match_episode_filename(
    query: &EpisodeQuery,
    choices: &[CandidateFile],
) -> PlayerResult<EpisodeMatch> {
    let exact = match_exact_episode(query.season, query.episode, choices)?;
    if exact.found > 0 {
        return Ok(exact);
    }
    if query.single_season {
        let bare = match_bare_episode(query.episode, choices)?;
        if bare.found > 0 {
            return Ok(bare);
        }
    }
    if let Some(absolute) = query.absolute_number {
        let anime = match_bare_episode(absolute, choices)?;
        if anime.found > 0 {
            return Ok(anime);
        }
    }
    if query.active_season == Some(query.season) {
        return match_bare_episode(query.episode, choices);
    }
    Ok(EpisodeMatch::default())
}

/// Sidecar track family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarKind {
    /// Subtitle files.
    Subtitles,
    /// Audio-only tracks.
    Audio,
}

fn stem(path: &str) -> &str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

/// `<stem>.srt` of the chosen file, or the only subtitle file in the torrent.
#[must_use]
pub fn find_subtitles_file<'a>(
    files: &'a [TorrentFile],
    chosen: &TorrentFile,
) -> Option<&'a TorrentFile> {
    let srt_name = format!("{}.srt", stem(&chosen.path));
    if let Some(exact) = files.iter().find(|file| file.path.ends_with(&srt_name)) {
        return Some(exact);
    }
    let mut subtitles = files.iter().filter(|file| is_subtitle(&file.path));
    match (subtitles.next(), subtitles.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

/// Sidecar files named after the chosen file.
#[must_use]
pub fn sidecar_tracks<'a>(
    files: &'a [TorrentFile],
    chosen: &TorrentFile,
    kind: SidecarKind,
) -> Vec<&'a TorrentFile> {
    let chosen_stem = stem(&chosen.path);
    files
        .iter()
        .filter(|file| file.index != chosen.index && file.path.contains(chosen_stem))
        .filter(|file| match kind {
            SidecarKind::Subtitles => is_subtitle(&file.path),
            SidecarKind::Audio => has_extension(&file.path, AUDIO_EXTENSIONS),
        })
        .collect()
}

/// Chooses the file a play request refers to.
#[derive(Clone)]
pub struct FileResolver {
    host: Arc<dyn UiHost>,
    catalog: Arc<dyn MetadataCatalog>,
    cache: Arc<dyn KeyValueCache>,
    settings: Arc<PlayerSettings>,
}

impl FileResolver {
    /// Resolver using the given collaborators.
    #[must_use]
    pub fn new(
        host: Arc<dyn UiHost>,
        catalog: Arc<dyn MetadataCatalog>,
        cache: Arc<dyn KeyValueCache>,
        settings: Arc<PlayerSettings>,
    ) -> Self {
        Self {
            host,
            catalog,
            cache,
            settings,
        }
    }

    /// Pick the file to play.
    ///
    /// # Errors
    ///
    /// - [`PlayerError::NoCandidates`] when nothing is playable.
    /// - [`PlayerError::FileNotChosen`] when several candidates remain and the
    ///   host did not pick one.
    /// - [`PlayerError::Pattern`] if an episode pattern fails to compile.
    pub async fn choose_file(
        &self,
        info_hash: &str,
        files: &[TorrentFile],
        request: &PlaybackRequest,
    ) -> PlayerResult<ChosenFile> {
        let candidates = resolve_candidates(files)?;
        let chosen = self.select(files, &candidates, request).await?;
        info!(
            info_hash,
            file = %chosen.file.path,
            archive = chosen.is_archive,
            "chosen file"
        );
        self.persist_links(info_hash, &candidates, request).await;
        Ok(chosen)
    }

    async fn select(
        &self,
        files: &[TorrentFile],
        candidates: &CandidateSet,
        request: &PlaybackRequest,
    ) -> PlayerResult<ChosenFile> {
        let pick = |position: usize| {
            let candidate = &candidates.files[position];
            files
                .iter()
                .find(|file| file.index == candidate.index)
                .map(|file| ChosenFile {
                    file: file.clone(),
                    candidate_index: Some(position),
                    is_archive: candidates.is_archive,
                })
        };

        if let Some(original) = request.original_index
            && let Some(file) = files.iter().find(|file| file.index == original)
        {
            return Ok(ChosenFile {
                file: file.clone(),
                candidate_index: candidates.position_of(original),
                is_archive: candidates.is_archive,
            });
        }
        if let Some(position) = request.chosen_index
            && position < candidates.files.len()
            && let Some(chosen) = pick(position)
        {
            return Ok(chosen);
        }
        if candidates.files.len() == 1
            && let Some(chosen) = pick(0)
        {
            return Ok(chosen);
        }

        let identity = &request.identity;
        if self.settings.smart_episode_match
            && identity.has_series()
            && let (Some(season), Some(episode)) = (identity.season, identity.episode)
        {
            let show = self.show(identity.show_id).await;
            let query = EpisodeQuery {
                season,
                episode,
                single_season: show
                    .as_ref()
                    .is_some_and(|show| show.real_season_count() == 1),
                active_season: identity.season,
                absolute_number: self.absolute_number(show.as_ref(), request).await,
            };
            let matched = match_episode_filename(&query, &candidates.files)?;
            debug!(season, episode, found = matched.found, "episode match");
            if let Some(position) = matched.unique()
                && let Some(chosen) = pick(position)
            {
                return Ok(chosen);
            }
        }

        let names = candidates.display_names();
        if !self.host.is_headless()
            && let Some(position) = self.host.select(SELECT_TITLE, &names).await
            && position < candidates.files.len()
            && let Some(chosen) = pick(position)
        {
            return Ok(chosen);
        }
        Err(PlayerError::FileNotChosen { candidates: names })
    }

    async fn show(&self, show_id: Option<u64>) -> Option<ShowInfo> {
        let show_id = show_id?;
        self.catalog.show(show_id).await.unwrap_or_else(|err| {
            warn!(error = %err, show_id, "show lookup failed");
            None
        })
    }

    async fn absolute_number(
        &self,
        show: Option<&ShowInfo>,
        request: &PlaybackRequest,
    ) -> Option<u32> {
        let identity = &request.identity;
        let Some(show) = show else {
            return identity.absolute_number;
        };
        if !show.is_anime {
            return None;
        }
        if identity.absolute_number.is_some() {
            return identity.absolute_number;
        }
        let (season, episode) = (identity.season?, identity.episode?);
        match self.catalog.episode(show.id, season, episode).await {
            Ok(Some(info)) => absolute_number_of(show, &info),
            Ok(None) => show.absolute_number(season, episode),
            Err(err) => {
                warn!(error = %err, show_id = show.id, "episode lookup failed");
                None
            }
        }
    }

    async fn persist_links(
        &self,
        info_hash: &str,
        candidates: &CandidateSet,
        request: &PlaybackRequest,
    ) {
        if let Some(tmdb_id) = request.identity.tmdb_id {
            self.write_link(tmdb_id, info_hash).await;
        }
        if self.settings.smart_episode_match
            && request.identity.has_series()
            && candidates.files.len() > 1
        {
            self.smart_match(info_hash, candidates, request).await;
        }
    }

    async fn smart_match(
        &self,
        info_hash: &str,
        candidates: &CandidateSet,
        request: &PlaybackRequest,
    ) {
        let Some(show) = self.show(request.identity.show_id).await else {
            return;
        };
        let single_season = show.real_season_count() == 1;
        for summary in show.seasons.iter().filter(|season| season.episode_count > 0) {
            let season = match self.catalog.season(show.id, summary.number).await {
                Ok(Some(season)) => season,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, season = summary.number, "season lookup failed");
                    continue;
                }
            };
            for episode in &season.episodes {
                let query = EpisodeQuery {
                    season: summary.number,
                    episode: episode.episode,
                    single_season,
                    active_season: request.identity.season,
                    absolute_number: if show.is_anime {
                        absolute_number_of(&show, episode)
                    } else {
                        None
                    },
                };
                match match_episode_filename(&query, &candidates.files) {
                    Ok(matched) if matched.unique().is_some() => {
                        self.write_link(episode.id, info_hash).await;
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "episode pattern rejected"),
                }
            }
        }
    }

    async fn write_link(&self, content_id: u64, info_hash: &str) {
        if let Err(err) = self
            .cache
            .set(
                LINKS_BUCKET,
                &content_id.to_string(),
                LINK_TTL,
                json!(info_hash),
            )
            .await
        {
            warn!(error = %err, content_id, "failed to store content link");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(index: usize, path: &str, offset: u64) -> TorrentFile {
        TorrentFile {
            index,
            path: path.to_string(),
            size_bytes: 100,
            offset,
        }
    }

    fn candidates(names: &[&str]) -> Vec<CandidateFile> {
        names
            .iter()
            .enumerate()
            .map(|(index, name)| CandidateFile {
                index,
                filename: (*name).to_string(),
                display_name: (*name).to_string(),
                path: (*name).to_string(),
                size: 1,
            })
            .collect()
    }

    #[test]
    fn media_files_are_candidates_and_sidecars_are_skipped() -> anyhow::Result<()> {
        let files = vec![
            file(0, "Pack/Show.S01E02.mkv", 0),
            file(1, "Pack/Show.S01E01.mkv", 100),
            file(2, "Pack/Show.S01E01.srt", 200),
            file(3, "Pack/Show.S01E01.ac3", 300),
            file(4, "Pack/readme.nfo", 400),
        ];
        let set = resolve_candidates(&files)?;
        assert!(!set.is_archive);
        assert_eq!(set.display_names(), vec!["Show.S01E01.mkv", "Show.S01E02.mkv"]);
        assert_eq!(set.position_of(0), Some(1));
        Ok(())
    }

    #[test]
    fn archives_only_without_media() -> anyhow::Result<()> {
        let files = vec![file(0, "Movie/movie.rar", 0), file(1, "Movie/movie.r00", 100)];
        let set = resolve_candidates(&files)?;
        assert!(set.is_archive);
        assert_eq!(set.files.len(), 1);

        let with_media = vec![file(0, "a/movie.rar", 0), file(1, "a/movie.mkv", 100)];
        assert!(!resolve_candidates(&with_media)?.is_archive);

        assert_eq!(
            resolve_candidates(&[file(0, "notes.txt", 0)]),
            Err(PlayerError::NoCandidates)
        );
        Ok(())
    }

    #[test]
    fn trim_choices_strips_nested_common_prefix() {
        let mut choices = candidates(&["root/sub/b.mkv", "root/sub/a.mkv"]);
        trim_choices(&mut choices);
        let names: Vec<_> = choices.iter().map(|c| c.display_name.as_str()).collect();
        assert_eq!(names, vec!["a.mkv", "b.mkv"]);

        let mut mixed = candidates(&["root/x/b.mkv", "root/y/a.mkv"]);
        trim_choices(&mut mixed);
        let names: Vec<_> = mixed.iter().map(|c| c.display_name.as_str()).collect();
        assert_eq!(names, vec!["x/b.mkv", "y/a.mkv"]);
    }

    #[test]
    fn exact_episode_match_is_unique() -> anyhow::Result<()> {
        let choices = candidates(&[
            "Show.S01E01.1080p.mkv",
            "Show.S01E02.1080p.mkv",
            "Show.S01E03.1080p.mkv",
        ]);
        let matched = match_exact_episode(1, 2, &choices)?;
        assert_eq!(matched, EpisodeMatch { index: Some(1), found: 1 });

        let alt = candidates(&["show.1x02.mkv", "show.1x12.mkv"]);
        assert_eq!(match_exact_episode(1, 2, &alt)?.unique(), Some(0));
        Ok(())
    }

    #[test]
    fn duplicate_matches_are_ambiguous() -> anyhow::Result<()> {
        let choices = candidates(&["Show.S01E02.720p.mkv", "Show.S01E02.1080p.mkv"]);
        let matched = match_exact_episode(1, 2, &choices)?;
        assert_eq!(matched.found, 2);
        assert_eq!(matched.unique(), None);
        Ok(())
    }

    #[test]
    fn staged_match_falls_back_to_bare_and_absolute_numbers() -> anyhow::Result<()> {
        let bare = candidates(&["Show - 01.mkv", "Show - 02.mkv", "Show - 03.mkv"]);
        let single = EpisodeQuery {
            season: 1,
            episode: 3,
            single_season: true,
            active_season: None,
            absolute_number: None,
        };
        assert_eq!(match_episode_filename(&single, &bare)?.unique(), Some(2));

        let anime = candidates(&["Anime - 24.mkv", "Anime - 25.mkv"]);
        let absolute = EpisodeQuery {
            season: 2,
            episode: 1,
            single_season: false,
            active_season: Some(1),
            absolute_number: Some(25),
        };
        assert_eq!(match_episode_filename(&absolute, &anime)?.unique(), Some(1));

        let inactive = EpisodeQuery {
            absolute_number: None,
            ..absolute
        };
        assert_eq!(match_episode_filename(&inactive, &anime)?, EpisodeMatch::default());
        Ok(())
    }

    #[test]
    fn subtitles_prefer_matching_stem() {
        let chosen = file(0, "Pack/Show.S01E01.mkv", 0);
        let files = vec![
            chosen.clone(),
            file(1, "Pack/Show.S01E01.srt", 100),
            file(2, "Pack/Show.S01E02.srt", 200),
            file(3, "Pack/Show.S01E01.eng.ac3", 300),
        ];
        assert_eq!(find_subtitles_file(&files, &chosen).map(|f| f.index), Some(1));

        let lone = vec![chosen.clone(), file(1, "Pack/Subs/english.srt", 100)];
        assert_eq!(find_subtitles_file(&lone, &chosen).map(|f| f.index), Some(1));

        let audio = sidecar_tracks(&files, &chosen, SidecarKind::Audio);
        assert_eq!(audio.iter().map(|f| f.index).collect::<Vec<_>>(), vec![3]);
        let subs = sidecar_tracks(&files, &chosen, SidecarKind::Subtitles);
        assert_eq!(subs.iter().map(|f| f.index).collect::<Vec<_>>(), vec![1]);
    }
}
