use std::time::Duration;

use marlin_player::{ContentIdentity, PlaybackRequest, PlayerError, SessionPhase};
use marlin_test_support::fixtures::{
    Harness, INFO_HASH, SHOW_ID, magnet, season_catalog, season_pack, settings,
};
use tokio::time::sleep;
use uuid::Uuid;

fn search_request(index: usize) -> PlaybackRequest {
    let mut request = PlaybackRequest::new(magnet(INFO_HASH))
        .with_identity(ContentIdentity::search("harbor lights"));
    request.chosen_index = Some(index);
    request
}

#[tokio::test]
async fn unknown_sessions_are_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    let service = harness.service();
    let id = Uuid::new_v4();

    let expected = PlayerError::SessionNotFound { session_id: id };
    assert_eq!(service.status(id).await, Err(expected.clone()));
    assert_eq!(service.stop(id).await, Err(expected.clone()));
    assert_eq!(service.notify_seeked(id).await, Err(expected.clone()));
    assert_eq!(service.notify_paused(id, true).await, Err(expected));
    assert!(service.list().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn player_notifications_reach_the_session() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    harness.handle.set_complete(true);
    let service = harness.service();

    let id = service.buffer_and_play(search_request(0)).await?;
    service.notify_paused(id, true).await?;
    service.notify_seeked(id).await?;
    let session = service.session(id).await?;
    assert!(session.params().paused_notified());
    assert!(session.params().take_seeked());
    assert!(!session.params().take_seeked());

    let listed = service.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id, id);
    assert_eq!(listed[0].info_hash.as_deref(), Some(INFO_HASH));

    service.stop(id).await?;
    assert!(session.is_closed());
    assert!(service.list().await.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn search_session_sends_query_up_next() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    harness.handle.set_complete(true);
    let service = harness.service();

    let id = service.buffer_and_play(search_request(0)).await?;
    assert_eq!(service.status(id).await?.file_index, Some(0));
    harness.host.set_watch_times(300.0, 1_200.0);
    harness.host.set_playing(true);
    sleep(Duration::from_secs(3)).await;

    let payloads = harness.host.up_next_payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(
        payloads[0].play_url,
        "/search?q=harbor%20lights&index=1&silent=true"
    );
    let session = service.session(id).await?;
    let next = session.next_episode();
    assert_eq!(next.file.map(|chosen| chosen.file.index), Some(1));
    assert!(!next.started);

    harness.host.set_playing(false);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert_eq!(service.prune().await, 1);
    assert_eq!(harness.engine.removals().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_every_session() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(season_pack(), season_catalog(), settings(dir.path()));
    harness.handle.set_complete(true);
    let service = harness.service();

    let request = PlaybackRequest::new(magnet(INFO_HASH)).with_identity(
        ContentIdentity::episode(SHOW_ID, SHOW_ID * 1_000 + 101, 1, 1),
    );
    let id = service.buffer_and_play(request).await?;
    let session = service.session(id).await?;
    service.shutdown().await;

    assert!(session.is_closed());
    assert!(service.list().await.is_empty());
    assert_eq!(harness.engine.removals().len(), 1);
    Ok(())
}
