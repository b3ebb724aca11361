//! Session registry
//!
//! **Responsibilities:**
//! - Map session ids to engines, creating them lazily
//! - Release engines on explicit disconnect, last listener leaving or idle timeout
//! - Command boundary for the gateway layer (and the HTTP API)
//!
//! The registry lock only covers lookup, insert and remove. Engines are
//! closed outside it, so a slow close never blocks other sessions.

use crate::config::{EngineConfig, ManagerConfig};
use crate::error::{Error, Result};
use crate::playback::{EngineDeps, EngineStatus, PlayReceipt, PlaybackEngine};
use chorus_common::events::{EngineState, TrackInfo, VoiceEvent};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ManagerInner {
    engines: Mutex<HashMap<String, PlaybackEngine>>,
    engine_config: EngineConfig,
    config: ManagerConfig,
    deps: EngineDeps,
    shutdown: CancellationToken,
}

/// Registry of per-session playback engines
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(engine_config: EngineConfig, config: ManagerConfig, deps: EngineDeps) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                engines: Mutex::new(HashMap::new()),
                engine_config,
                config,
                deps,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Engine for `session_id`, created on first use
    ///
    /// Closed engines still in the map are replaced.
    pub async fn resolve(&self, session_id: &str) -> PlaybackEngine {
        let mut engines = self.inner.engines.lock().await;
        if let Some(engine) = engines.get(session_id) {
            if !engine.state().await.is_terminal() {
                return engine.clone();
            }
            debug!(session = %session_id, "Replacing closed engine");
        }

        let engine = PlaybackEngine::spawn(
            session_id,
            self.inner.engine_config.clone(),
            self.inner.deps.clone(),
        );
        engines.insert(session_id.to_string(), engine.clone());
        engine
    }

    pub async fn get(&self, session_id: &str) -> Option<PlaybackEngine> {
        self.inner.engines.lock().await.get(session_id).cloned()
    }

    async fn require(&self, session_id: &str) -> Result<PlaybackEngine> {
        self.get(session_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("no active session {}", session_id)))
    }

    /// Close and forget the engine; returns false if there was none
    pub async fn release(&self, session_id: &str) -> bool {
        let engine = self.inner.engines.lock().await.remove(session_id);
        match engine {
            Some(engine) => {
                info!(session = %session_id, "Releasing session");
                if let Err(e) = engine.close().await {
                    warn!(session = %session_id, error = %e, "Close failed");
                }
                true
            }
            None => false,
        }
    }

    /// Gateway hook: voice channel listener count changed
    pub async fn listeners_changed(&self, session_id: &str, listeners: usize) -> bool {
        if listeners == 0 {
            debug!(session = %session_id, "Last listener left");
            self.release(session_id).await
        } else {
            false
        }
    }

    /// Release engines idle (empty queue) beyond `idle_timeout`, and any
    /// that already closed; returns the released session ids
    ///
    /// Each engine's driver confirms it is still idle before closing, so a
    /// caller that queued a track after the scan keeps its session.
    pub async fn sweep_idle(&self) -> Vec<String> {
        let idle_timeout = self.inner.config.idle_timeout();
        let mut candidates = Vec::new();
        {
            let engines = self.inner.engines.lock().await;
            for (id, engine) in engines.iter() {
                let closed = engine.state().await == EngineState::Closed;
                let idle_expired = engine
                    .idle_for()
                    .await
                    .map_or(false, |idle| idle >= idle_timeout);
                if closed || idle_expired {
                    candidates.push((id.clone(), engine.clone()));
                }
            }
        }

        let mut released = Vec::with_capacity(candidates.len());
        for (id, engine) in candidates {
            let gone = match engine.close_if_idle(idle_timeout).await {
                Ok(closed) => closed,
                Err(Error::SessionClosed(_)) => true,
                Err(e) => {
                    warn!(session = %id, error = %e, "Idle close failed");
                    false
                }
            };
            if !gone {
                debug!(session = %id, "Session active again, keeping it");
                continue;
            }

            {
                let mut engines = self.inner.engines.lock().await;
                if engines.get(&id).map_or(false, |current| current.same_engine(&engine)) {
                    engines.remove(&id);
                }
            }
            info!(session = %id, "Released idle session");
            released.push(id);
        }
        released
    }

    /// Run `sweep_idle` every `sweep_interval` until `shutdown`
    pub fn spawn_idle_sweeper(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.inner.config.sweep_interval();
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let released = manager.sweep_idle().await;
                        if !released.is_empty() {
                            debug!(count = released.len(), "Idle sweep released sessions");
                        }
                    }
                }
            }
            debug!("Idle sweeper stopped");
        })
    }

    /// Release every session and stop the sweeper
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let engines: Vec<_> = self.inner.engines.lock().await.drain().collect();
        info!(count = engines.len(), "Closing all sessions");
        join_all(engines.iter().map(|(_, engine)| engine.close())).await;
    }

    /// Status of every registered session
    pub async fn sessions(&self) -> Vec<EngineStatus> {
        let engines: Vec<_> = self.inner.engines.lock().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(engines.len());
        for engine in engines {
            statuses.push(engine.status().await);
        }
        statuses.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        statuses
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.inner.deps.events.subscribe()
    }

    // ---------------------------------------------------------------------
    // Command boundary
    // ---------------------------------------------------------------------

    pub async fn play(&self, session_id: &str, source: &str, requester: &str) -> Result<PlayReceipt> {
        self.resolve(session_id).await.play(source, requester).await
    }

    pub async fn pause(&self, session_id: &str) -> Result<()> {
        self.require(session_id).await?.pause().await
    }

    pub async fn resume(&self, session_id: &str) -> Result<()> {
        self.require(session_id).await?.resume().await
    }

    pub async fn skip(&self, session_id: &str) -> Result<()> {
        self.require(session_id).await?.skip().await
    }

    pub async fn stop(&self, session_id: &str) -> Result<()> {
        self.require(session_id).await?.stop().await
    }

    pub async fn status(&self, session_id: &str) -> Result<EngineStatus> {
        Ok(self.require(session_id).await?.status().await)
    }

    pub async fn remove(&self, session_id: &str, index: usize, generation: u64) -> Result<TrackInfo> {
        self.require(session_id).await?.remove(index, generation).await
    }
}
