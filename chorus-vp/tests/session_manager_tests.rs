//! Session manager tests
//!
//! Registry lifecycle: lazy creation, release paths (explicit, last
//! listener, idle sweep, shutdown) and the command boundary.

mod helpers;

use chorus_common::events::EngineState;
use chorus_vp::error::Error;
use futures::future::join_all;
use helpers::*;
use std::time::Duration;
use tokio::time::sleep;

const LONG: Duration = Duration::from_secs(10);

#[tokio::test(start_paused = true)]
async fn test_resolve_creates_one_engine_per_session() {
    let t = test_deps(&["guild-1", "guild-2"]).await;
    let manager = test_manager(t.deps, 60_000);

    let resolved = join_all((0..10).map(|_| manager.resolve("guild-1"))).await;
    assert_eq!(resolved.len(), 10);
    assert_eq!(manager.sessions().await.len(), 1);

    manager.resolve("guild-2").await;
    let ids: Vec<_> = manager.sessions().await.into_iter().map(|s| s.session_id).collect();
    assert_eq!(ids, vec!["guild-1", "guild-2"]);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_resolve_replaces_closed_engine() {
    let t = test_deps(&["guild-1"]).await;
    let manager = test_manager(t.deps, 60_000);

    let first = manager.resolve("guild-1").await;
    first.close().await.unwrap();
    assert_eq!(first.state().await, EngineState::Closed);

    let second = manager.resolve("guild-1").await;
    assert_eq!(second.state().await, EngineState::Idle);
    assert_eq!(manager.sessions().await.len(), 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_play_through_manager_creates_session() {
    let t = test_deps(&["guild-1"]).await;
    t.sources.script("a", Script::new(b'a', 1000));
    let manager = test_manager(t.deps, 60_000);

    let receipt = manager.play("guild-1", "a", "alice").await.unwrap();
    assert!(receipt.started_playback);

    let status = manager.status("guild-1").await.unwrap();
    assert_eq!(status.state, EngineState::Playing);
    assert_eq!(status.current.unwrap().track.source, "a");

    manager.pause("guild-1").await.unwrap();
    assert_eq!(manager.status("guild-1").await.unwrap().state, EngineState::Paused);
    manager.resume("guild-1").await.unwrap();
    manager.skip("guild-1").await.unwrap();
    assert_eq!(manager.status("guild-1").await.unwrap().state, EngineState::Idle);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_commands_for_unknown_session_are_not_found() {
    let t = test_deps(&[]).await;
    let manager = test_manager(t.deps, 60_000);

    assert!(matches!(manager.pause("ghost").await, Err(Error::NotFound(_))));
    assert!(matches!(manager.resume("ghost").await, Err(Error::NotFound(_))));
    assert!(matches!(manager.skip("ghost").await, Err(Error::NotFound(_))));
    assert!(matches!(manager.stop("ghost").await, Err(Error::NotFound(_))));
    assert!(matches!(manager.status("ghost").await, Err(Error::NotFound(_))));
    assert!(matches!(manager.remove("ghost", 0, 0).await, Err(Error::NotFound(_))));
    assert!(manager.sessions().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_play_without_voice_target_fails_to_connect() {
    let t = test_deps(&[]).await;
    t.sources.script("a", Script::new(b'a', 3));
    let manager = test_manager(t.deps, 60_000);

    let err = manager.play("guild-9", "a", "alice").await.unwrap_err();
    assert_eq!(err.kind(), "connect_failed");
    assert_eq!(t.net.connect_attempts(), 0);

    let status = manager.status("guild-9").await.unwrap();
    assert_eq!(status.state, EngineState::Idle);
    assert_eq!(status.queue.len(), 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_release_closes_engine() {
    let t = test_deps(&["guild-1"]).await;
    t.sources.script("a", Script::new(b'a', 1000));
    let manager = test_manager(t.deps, 60_000);

    manager.play("guild-1", "a", "alice").await.unwrap();
    let engine = manager.get("guild-1").await.unwrap();
    assert!(wait_for_frames(&t.net, 2, LONG).await);

    assert!(manager.release("guild-1").await);
    assert!(!manager.release("guild-1").await);

    assert_eq!(engine.state().await, EngineState::Closed);
    assert!(matches!(manager.status("guild-1").await, Err(Error::NotFound(_))));
    assert!(t.sources.log.open_now().is_empty());
    assert_eq!(t.net.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_last_listener_leaving_releases_session() {
    let t = test_deps(&["guild-1"]).await;
    let manager = test_manager(t.deps, 60_000);
    manager.resolve("guild-1").await;

    assert!(!manager.listeners_changed("guild-1", 3).await);
    assert!(manager.get("guild-1").await.is_some());

    assert!(manager.listeners_changed("guild-1", 0).await);
    assert!(manager.get("guild-1").await.is_none());
    assert!(!manager.listeners_changed("guild-1", 0).await);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_releases_only_idle_sessions() {
    let t = test_deps(&["guild-1", "guild-2"]).await;
    t.sources.script("a", Script::new(b'a', 1000));
    let manager = test_manager(t.deps, 1_000);

    manager.resolve("guild-1").await;
    manager.play("guild-2", "a", "alice").await.unwrap();

    assert!(manager.sweep_idle().await.is_empty());

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(manager.sweep_idle().await, vec!["guild-1".to_string()]);

    let remaining: Vec<_> = manager.sessions().await.into_iter().map(|s| s.session_id).collect();
    assert_eq!(remaining, vec!["guild-2"]);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_clock_restarts_after_playback() {
    let t = test_deps(&["guild-1"]).await;
    t.sources.script("a", Script::new(b'a', 25));
    let manager = test_manager(t.deps, 1_000);

    manager.resolve("guild-1").await;
    sleep(Duration::from_millis(800)).await;

    // 500ms of audio resets the idle clock when it finishes
    manager.play("guild-1", "a", "alice").await.unwrap();
    let engine = manager.get("guild-1").await.unwrap();
    sleep(Duration::from_millis(600)).await;
    assert_eq!(engine.state().await, EngineState::Idle);
    assert!(manager.sweep_idle().await.is_empty());

    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(manager.sweep_idle().await, vec!["guild-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_close_if_idle_is_decided_by_the_engine() {
    let t = test_deps(&["guild-1"]).await;
    t.sources.script("a", Script::new(b'a', 1000));
    let manager = test_manager(t.deps, 1_000);
    let engine = manager.resolve("guild-1").await;
    let idle_timeout = Duration::from_millis(1_000);

    // Not idle long enough yet
    assert!(!engine.close_if_idle(idle_timeout).await.unwrap());

    sleep(Duration::from_millis(1_500)).await;
    engine.play("a", "alice").await.unwrap();
    assert!(!engine.close_if_idle(idle_timeout).await.unwrap());
    assert_eq!(engine.state().await, EngineState::Playing);

    engine.stop().await.unwrap();
    sleep(Duration::from_millis(1_500)).await;
    assert!(engine.close_if_idle(idle_timeout).await.unwrap());
    assert_eq!(engine.state().await, EngineState::Closed);
    assert!(matches!(
        engine.close_if_idle(idle_timeout).await,
        Err(Error::SessionClosed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_racing_a_play_never_drops_it_silently() {
    let t = test_deps(&["guild-1"]).await;
    t.sources.script("a", Script::new(b'a', 1000));
    let manager = test_manager(t.deps, 1_000);

    let engine = manager.resolve("guild-1").await;
    sleep(Duration::from_millis(1_500)).await;

    let (released, played) = tokio::join!(manager.sweep_idle(), engine.play("a", "alice"));
    match played {
        Ok(receipt) => {
            assert!(receipt.started_playback);
            assert!(released.is_empty());
            assert_eq!(engine.state().await, EngineState::Playing);
            let kept = manager.get("guild-1").await.expect("session dropped");
            assert!(kept.same_engine(&engine));
        }
        Err(e) => {
            assert!(matches!(e, Error::SessionClosed(_)), "{:?}", e);
            assert_eq!(released, vec!["guild-1".to_string()]);
            assert!(manager.get("guild-1").await.is_none());
        }
    }

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_and_shutdown() {
    let t = test_deps(&["guild-1", "guild-2"]).await;
    t.sources.script("a", Script::new(b'a', 100_000));
    let manager = test_manager(t.deps, 500);
    let sweeper = manager.spawn_idle_sweeper();

    manager.resolve("guild-1").await;
    manager.play("guild-2", "a", "alice").await.unwrap();
    let playing = manager.get("guild-2").await.unwrap();

    sleep(Duration::from_millis(1_000)).await;
    let ids: Vec<_> = manager.sessions().await.into_iter().map(|s| s.session_id).collect();
    assert_eq!(ids, vec!["guild-2"]);

    manager.shutdown().await;
    sweeper.await.unwrap();

    assert_eq!(playing.state().await, EngineState::Closed);
    assert!(manager.sessions().await.is_empty());
    assert!(t.sources.log.open_now().is_empty());
}
