#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

//! Playback buffering and next-file orchestration for torrent streams.
//!
//! Layout:
//! - `candidates.rs`: playable file filtering, episode matching, file choice.
//! - `buffer.rs`: buffer windows and the buffering controller.
//! - `extract.rs`: RAR extraction through the external `unrar` tool.
//! - `session.rs`: the playback session state machine.
//! - `next.rs`: next-file prediction and readiness.
//! - `resume.rs`: resume records and the rate-limit policy.
//! - `service.rs`: `PlayerService`, the entry point used by front-ends.
//! - `host.rs`, `watch.rs`, `catalog.rs`, `cache.rs`: collaborator interfaces.

pub mod buffer;
pub mod cache;
pub mod candidates;
pub mod catalog;
mod closer;
pub mod error;
pub mod extract;
pub mod host;
pub mod next;
pub mod params;
pub mod registry;
pub mod resume;
pub mod service;
pub mod session;
pub mod status;
pub mod upnext;
pub mod watch;

pub use buffer::{BufferPhase, BufferWindow, BufferingController, ProgressKind};
pub use cache::{KeyValueCache, MemoryCache};
pub use candidates::{CandidateFile, CandidateSet, ChosenFile, EpisodeMatch, FileResolver};
pub use catalog::{EpisodeInfo, MetadataCatalog, SeasonInfo, ShowInfo};
pub use error::{PlayerError, PlayerResult};
pub use extract::{ArchiveExtractor, ExtractError, ExtractOutcome};
pub use host::{NullHost, OverlayStatus, ProgressDialog, UiHost, WatchTimes};
pub use next::{NextEpisode, is_ready_for_next_file};
pub use params::{ContentIdentity, ContentType, PlaybackParams, PlaybackRequest, PlaybackState};
pub use registry::TorrentRegistry;
pub use resume::{RateLimitPolicy, ResumePoint, ResumeStore, ResumeWrite, resume_token};
pub use service::PlayerService;
pub use session::{PlaybackSession, SessionDeps, SessionPhase};
pub use status::{SessionStatus, StatusLines, format_bytes};
pub use upnext::{UpNextEpisode, UpNextPayload};
pub use watch::{NoopWatchState, ScrobbleAction, WatchProgress, WatchStateService};
