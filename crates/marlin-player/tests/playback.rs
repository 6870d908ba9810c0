use std::sync::Arc;
use std::time::Duration;

use marlin_config::PlayerSettings;
use marlin_events::{Event, TorrentState};
use marlin_player::{
    BufferPhase, ContentIdentity, PlaybackRequest, PlaybackSession, PlayerError, ResumePoint,
    ScrobbleAction, SessionPhase,
};
use marlin_test_support::fixtures::{
    Harness, INFO_HASH, MIB, SHOW_ID, drain_events, magnet, rar_release, season_catalog,
    season_pack, settings,
};
use marlin_test_support::mocks::StaticCatalog;
use marlin_torrent_core::{FilePriority, RemoveTorrent, TorrentRateLimit};
use tokio::time::sleep;

fn episode_request() -> PlaybackRequest {
    PlaybackRequest::new(magnet(INFO_HASH)).with_identity(ContentIdentity::episode(
        SHOW_ID,
        SHOW_ID * 1_000 + 102,
        1,
        2,
    ))
}

fn movie_request() -> PlaybackRequest {
    PlaybackRequest::new(magnet(INFO_HASH)).with_identity(ContentIdentity::movie(99))
}

fn removed(with_data: bool) -> Vec<(String, RemoveTorrent)> {
    vec![(INFO_HASH.to_string(), RemoveTorrent { with_data })]
}

#[tokio::test(start_paused = true)]
async fn episode_pack_buffers_matching_file_and_prepares_next() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    harness.handle.set_complete(true);
    let service = harness.service();

    let id = service.buffer_and_play(episode_request()).await?;
    let status = service.status(id).await?;
    assert_eq!(status.file_index, Some(1));
    assert_eq!(status.phase, SessionPhase::WaitingForPlaybackStart);
    assert_eq!(status.buffer_progress, 100);
    assert!(harness.host.selections().is_empty());
    assert!(harness.host.dialog().was_closed());
    assert_eq!(
        harness.handle.priorities(),
        vec![(1, FilePriority::High), (2, FilePriority::High)]
    );
    assert_eq!(
        harness.handle.prioritized().first(),
        Some(&vec![64, 65, 66, 67, 127])
    );
    assert_eq!(harness.handle.sequential(), Some(true));

    harness.host.set_watch_times(1_150.0, 1_200.0);
    harness.host.set_playing(true);
    sleep(Duration::from_secs(4)).await;

    let session = service.session(id).await?;
    assert_eq!(session.phase(), SessionPhase::Playing);
    let next = session.next_episode();
    assert_eq!(next.file.as_ref().map(|chosen| chosen.file.index), Some(3));
    assert!(next.started);
    assert_eq!(next.buffer_size, 6 * MIB + 64 * 1024);
    assert!(harness.deps.registry.has_next_file(INFO_HASH));

    let payloads = harness.host.up_next_payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(
        payloads[0].play_url,
        format!("/show/{SHOW_ID}/season/1/episode/3/play?silent=true")
    );
    assert_eq!(payloads[0].next_episode.show_title, "Harbor Lights");
    assert!(
        harness
            .host
            .subtitles()
            .iter()
            .any(|url| url.ends_with("Harbor.Lights.S01E02.1080p.srt"))
    );

    harness.host.set_playing(false);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert!(harness.engine.removals().is_empty());
    assert!(harness.deps.registry.has_leave_timer(INFO_HASH));
    assert_eq!(harness.watch.watched().len(), 1);
    let scrobbles = harness.watch.scrobbles();
    assert_eq!(scrobbles.first(), Some(&ScrobbleAction::Start));
    assert_eq!(scrobbles.last(), Some(&ScrobbleAction::Stop));
    assert!(harness.host.overlay().was_closed());

    sleep(Duration::from_secs(31)).await;
    assert_eq!(harness.engine.removals(), removed(false));

    let events = drain_events(&harness.deps.bus).await;
    assert!(events.iter().any(|event| matches!(
        event,
        Event::NextFilePrepared { file_index: 3, .. }
    )));
    assert!(
        events
            .iter()
            .any(|event| matches!(event, Event::PlaybackStopped { .. }))
    );
    Ok(())
}

#[tokio::test]
async fn rar_release_reuses_existing_extraction() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let extracted = dir.path().join("Quiet.Orbit.2021").join("extracted");
    std::fs::create_dir_all(&extracted)?;
    std::fs::write(extracted.join("quiet.orbit.2021.mkv"), b"video")?;
    let harness = Harness::new(rar_release(), StaticCatalog::new(), settings(dir.path()));
    harness.handle.set_complete(true);
    let service = harness.service();

    let id = service.buffer_and_play(movie_request()).await?;
    let status = service.status(id).await?;
    assert_eq!(
        status.file_path,
        Some(extracted.join("quiet.orbit.2021.mkv").display().to_string())
    );
    assert_eq!(harness.handle.sequential(), Some(false));
    assert_eq!(harness.handle.prioritized().first().map(Vec::len), Some(48));

    let events = drain_events(&harness.deps.bus).await;
    assert!(
        events
            .iter()
            .any(|event| matches!(event, Event::ExtractionStarted { .. }))
    );
    assert!(
        events
            .iter()
            .any(|event| matches!(event, Event::ExtractionCompleted { .. }))
    );
    if let Some(metrics) = &harness.metrics {
        assert_eq!(metrics.snapshot().extractions_succeeded_total, 1);
    }

    service.stop(id).await?;
    assert_eq!(harness.engine.removals(), removed(false));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn close_is_idempotent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    harness.handle.set_complete(true);
    let session = PlaybackSession::new(harness.deps.clone(), episode_request());

    session.buffer().await?;
    session.close().await;
    session.close().await;

    assert!(session.is_closed());
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert_eq!(harness.engine.removals(), removed(false));
    assert_eq!(harness.deps.registry.attached(INFO_HASH), 0);
    assert_eq!(session.buffer().await, Err(PlayerError::Closed));
    if let Some(metrics) = &harness.metrics {
        assert_eq!(metrics.snapshot().active_sessions, 0);
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn playback_that_never_starts_times_out() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    harness.handle.set_complete(true);
    let service = harness.service();

    let id = service.buffer_and_play(episode_request()).await?;
    let session = service.session(id).await?;
    sleep(Duration::from_secs(7)).await;

    assert_eq!(
        session.last_error(),
        Some(PlayerError::PlaybackTimeout { waited_secs: 5 })
    );
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert_eq!(harness.engine.removals(), removed(false));
    assert!(!harness.host.notifications().is_empty());
    assert!(harness.watch.scrobbles().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelled_dialog_aborts_buffering() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    harness.host.dialog().cancel();
    let service = harness.service();

    let result = service.buffer_and_play(episode_request()).await;
    assert_eq!(result, Err(PlayerError::UserCancelled));
    assert!(harness.host.dialog().was_closed());
    assert!(service.list().await.is_empty());
    assert_eq!(harness.engine.removals(), removed(false));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn insufficient_space_removes_torrent_with_data() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    harness.engine.set_free_space(false);
    let session = PlaybackSession::new(harness.deps.clone(), episode_request());

    assert_eq!(session.buffer().await, Err(PlayerError::InsufficientSpace));
    assert_eq!(
        session.controller().map(|controller| controller.phase()),
        Some(BufferPhase::InsufficientSpace)
    );
    assert_eq!(harness.engine.removals(), removed(true));
    assert!(
        harness
            .host
            .notifications()
            .iter()
            .any(|(_, message)| message.contains("Not enough space"))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_torrent_state_ends_buffering() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    let session = PlaybackSession::new(harness.deps.clone(), episode_request());

    let task = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.buffer().await }
    });
    sleep(Duration::from_millis(200)).await;
    harness.engine.bus().publish(Event::StateChanged {
        info_hash: INFO_HASH.to_string(),
        state: TorrentState::Failed {
            message: "tracker unreachable".to_string(),
        },
    });

    let result = task.await?;
    assert!(matches!(
        result,
        Err(PlayerError::Engine {
            operation: "torrent.state",
            ..
        })
    ));
    assert_eq!(
        session.controller().map(|controller| controller.phase()),
        Some(BufferPhase::Failed)
    );
    assert_eq!(session.phase(), SessionPhase::Stopped);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn background_session_leaves_torrent_running() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    let mut request = episode_request();
    request.background = true;
    let session = PlaybackSession::new(harness.deps.clone(), request);

    session.buffer().await?;
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert!(harness.engine.removals().is_empty());
    assert!(harness.host.dialog().percents().is_empty());
    assert_eq!(harness.deps.registry.attached(INFO_HASH), 0);
    assert!(harness.watch.scrobbles().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn known_torrent_is_resumed_instead_of_added() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    harness.handle.set_complete(true);
    harness.engine.set_known(true);
    let mut request = episode_request();
    request.resume_hash = Some(INFO_HASH.to_string());
    let session = PlaybackSession::new(harness.deps.clone(), request);

    session.buffer().await?;
    assert_eq!(harness.engine.added(), 0);
    assert_eq!(session.info_hash(), Some(INFO_HASH));
    session.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn accepted_resume_prompt_keeps_remote_position() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    harness.handle.set_complete(true);
    let point = ResumePoint {
        position_secs: 600.0,
        total_secs: 1_200.0,
    };
    harness.watch.set_resume(Some(point));
    harness.host.set_confirm(true);
    let session = PlaybackSession::new(harness.deps.clone(), episode_request());

    session.buffer().await?;
    let state = session.params().snapshot();
    assert!(state.resume_playback);
    assert_eq!(state.stored_resume, Some(point));
    session.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rate_limits_apply_after_buffering_and_lift_on_close() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut settings = settings(dir.path());
    settings.limit_after_buffering = true;
    settings.download_rate_limit = 2_000_000;
    let harness = Harness::new(season_pack(), season_catalog(), settings);
    harness.handle.set_complete(true);
    let session = PlaybackSession::new(harness.deps.clone(), episode_request());

    session.buffer().await?;
    assert_eq!(
        harness.engine.limits(),
        vec![TorrentRateLimit {
            download_bps: Some(2_000_000),
            upload_bps: None,
        }]
    );
    session.close().await;
    assert_eq!(
        harness.engine.limits().last(),
        Some(&TorrentRateLimit::unlimited())
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn next_session_on_kept_torrent_starts_without_next_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    harness.handle.set_complete(true);
    let service = harness.service();

    let first = service.buffer_and_play(episode_request()).await?;
    harness.host.set_watch_times(1_150.0, 1_200.0);
    harness.host.set_playing(true);
    sleep(Duration::from_secs(4)).await;
    assert!(service.session(first).await?.next_episode().started);
    harness.host.set_playing(false);
    sleep(Duration::from_secs(2)).await;
    assert!(harness.deps.registry.has_leave_timer(INFO_HASH));

    harness.engine.set_known(true);
    let mut request = PlaybackRequest::new(magnet(INFO_HASH)).with_identity(
        ContentIdentity::episode(SHOW_ID, SHOW_ID * 1_000 + 103, 1, 3),
    );
    request.resume_hash = Some(INFO_HASH.to_string());
    let second = service.buffer_and_play(request).await?;
    assert_eq!(service.status(second).await?.file_index, Some(3));
    assert!(!harness.deps.registry.has_leave_timer(INFO_HASH));
    assert!(!harness.deps.registry.has_next_file(INFO_HASH));

    harness.host.set_playing(true);
    sleep(Duration::from_secs(3)).await;
    let session = service.session(second).await?;
    let next = session.next_episode();
    assert!(next.file.is_none());
    assert!(!next.started);

    harness.host.set_playing(false);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert_eq!(harness.engine.removals(), removed(false));
    assert!(!harness.deps.registry.has_leave_timer(INFO_HASH));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn buffering_progress_only_rises_until_complete() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    let session = PlaybackSession::new(harness.deps.clone(), episode_request());

    let task = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.buffer().await }
    });
    sleep(Duration::from_millis(1_500)).await;
    harness.handle.add_pieces([64]);
    sleep(Duration::from_secs(1)).await;
    harness.handle.add_pieces([65, 66]);
    sleep(Duration::from_secs(1)).await;
    harness.handle.add_pieces([67, 127]);
    task.await??;

    let percents = harness.host.dialog().percents();
    assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]), "{percents:?}");
    assert!(percents.contains(&20));
    assert!(percents.contains(&60));
    assert_eq!(percents.last(), Some(&100));
    let controller = session.controller().expect("controller after buffering");
    assert_eq!(controller.phase(), BufferPhase::Finished);
    assert_eq!(controller.progress(), 100);
    session.close().await;
    Ok(())
}

#[cfg(unix)]
fn rar_settings(dir: &std::path::Path, script: &str) -> anyhow::Result<PlayerSettings> {
    let path = dir.join("fake-unrar.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n"))?;
    let mut settings = settings(dir);
    settings.unrar_command = format!("sh {}", path.display());
    Ok(settings)
}

#[cfg(unix)]
#[tokio::test]
async fn failed_extraction_ends_buffering_without_caps() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut settings = rar_settings(dir.path(), "echo broken archive\nexit 3")?;
    settings.limit_after_buffering = true;
    settings.download_rate_limit = 2_000_000;
    let harness = Harness::new(rar_release(), StaticCatalog::new(), settings);
    harness.handle.set_complete(true);
    let session = PlaybackSession::new(harness.deps.clone(), movie_request());

    let result = session.buffer().await;
    assert!(matches!(result, Err(PlayerError::ExtractionFailed { .. })));
    assert_eq!(
        session.controller().map(|controller| controller.phase()),
        Some(BufferPhase::Failed)
    );
    assert!(
        harness
            .host
            .notifications()
            .iter()
            .any(|(title, _)| title == "Extraction failed")
    );
    assert!(
        harness
            .engine
            .limits()
            .iter()
            .all(|limits| limits.download_bps.is_none())
    );
    assert_eq!(session.phase(), SessionPhase::Stopped);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn closing_during_extraction_stops_the_tool() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let settings = rar_settings(dir.path(), "exec sleep 20")?;
    let harness = Harness::new(rar_release(), StaticCatalog::new(), settings);
    harness.handle.set_complete(true);
    let session = PlaybackSession::new(harness.deps.clone(), movie_request());

    let task = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.buffer().await }
    });
    sleep(Duration::from_secs(2)).await;
    assert_eq!(
        session.controller().map(|controller| controller.phase()),
        Some(BufferPhase::Extracting)
    );

    let started = std::time::Instant::now();
    session.close().await;
    let result = tokio::time::timeout(Duration::from_secs(2), task).await??;
    assert_eq!(result, Err(PlayerError::Closed));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        session.controller().map(|controller| controller.phase()),
        Some(BufferPhase::Cancelled)
    );
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert_eq!(harness.engine.removals(), removed(false));
    Ok(())
}
