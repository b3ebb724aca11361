//! Shared test utilities for chorus-vp integration tests
//!
//! Provides scripted frame sources, an in-memory voice network and engine
//! harness builders. Frames carry their track's marker byte in `pcm[0]` so
//! tests can tell from the send log which track a frame belonged to.

#![allow(dead_code)]

pub mod mock_network;
pub mod scripted_source;

pub use mock_network::{MockConnector, NetworkState, SentFrame};
pub use scripted_source::{Script, ScriptEnd, ScriptedFactory, SourceLog};

use chorus_common::events::{EngineState, VoiceEvent};
use chorus_vp::config::{EngineConfig, ManagerConfig};
use chorus_vp::playback::{EngineDeps, PlaybackEngine, RetryPolicy};
use chorus_vp::session::{SessionManager, StaticTargets};
use chorus_vp::transport::SessionTarget;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

pub const SESSION: &str = "guild-1";

/// Engine tuning with short timeouts and deterministic backoff
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        read_timeout_ms: 200,
        max_decode_stalls: 2,
        send_timeout_ms: 100,
        connect_timeout_ms: 100,
        heartbeat_interval_ms: 250,
        heartbeat_timeout_ms: 100,
        max_missed_heartbeats: 2,
        control_timeout_ms: 1_000,
        connect_retry: RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 50,
            backoff_factor: 2.0,
            max_delay_ms: 400,
            jitter: false,
        },
        reconnect_retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 50,
            backoff_factor: 2.0,
            max_delay_ms: 400,
            jitter: false,
        },
        ..EngineConfig::default()
    }
}

pub fn target(session_id: &str) -> SessionTarget {
    SessionTarget {
        session_id: session_id.to_string(),
        endpoint: "127.0.0.1:50000".to_string(),
        ssrc: 4242,
        token: Some("secret".to_string()),
        payload_type: 120,
    }
}

/// Targets for every given session
pub async fn targets_for(sessions: &[&str]) -> Arc<StaticTargets> {
    let targets = Arc::new(StaticTargets::new());
    for id in sessions {
        targets.insert(target(id)).await;
    }
    targets
}

/// Mocks plus the dependency bundle built from them
pub struct TestDeps {
    pub deps: EngineDeps,
    pub sources: Arc<ScriptedFactory>,
    pub net: Arc<NetworkState>,
}

pub async fn test_deps(sessions: &[&str]) -> TestDeps {
    let sources = Arc::new(ScriptedFactory::new());
    let net = Arc::new(NetworkState::default());
    let (events, _) = broadcast::channel(1024);
    let deps = EngineDeps {
        sources: sources.clone(),
        connector: Arc::new(MockConnector::new(net.clone())),
        targets: targets_for(sessions).await,
        events,
    };
    TestDeps { deps, sources, net }
}

/// One engine wired to mocks, with an event receiver opened before spawn
pub struct Harness {
    pub engine: PlaybackEngine,
    pub sources: Arc<ScriptedFactory>,
    pub net: Arc<NetworkState>,
    pub events: broadcast::Receiver<VoiceEvent>,
}

pub async fn harness() -> Harness {
    harness_with(test_engine_config()).await
}

pub async fn harness_with(config: EngineConfig) -> Harness {
    let TestDeps { deps, sources, net } = test_deps(&[SESSION]).await;
    let events = deps.events.subscribe();
    let engine = PlaybackEngine::spawn(SESSION, config, deps);
    Harness {
        engine,
        sources,
        net,
        events,
    }
}

pub fn test_manager(deps: EngineDeps, idle_timeout_ms: u64) -> SessionManager {
    SessionManager::new(
        test_engine_config(),
        ManagerConfig {
            idle_timeout_ms,
            sweep_interval_ms: 100,
        },
        deps,
    )
}

/// Wait for the first event matching `pred`, skipping others
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<VoiceEvent>,
    limit: Duration,
    mut pred: F,
) -> Option<VoiceEvent>
where
    F: FnMut(&VoiceEvent) -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        }
    }
}

/// Drain every event currently buffered
pub fn drain_events(rx: &mut broadcast::Receiver<VoiceEvent>) -> Vec<VoiceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll until the engine reaches `state`
pub async fn wait_for_state(engine: &PlaybackEngine, state: EngineState, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if engine.state().await == state {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    engine.state().await == state
}

/// Poll until at least `count` frames went out
pub async fn wait_for_frames(net: &NetworkState, count: usize, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if net.sent().len() >= count {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    net.sent().len() >= count
}

pub fn is_state_change(event: &VoiceEvent, to: EngineState) -> bool {
    matches!(event, VoiceEvent::StateChanged { new_state, .. } if *new_state == to)
}
