//! Status reporting
//!
//! **Responsibilities:**
//! - Status snapshots for the command boundary and the HTTP API
//! - Event subscription
//! - Idle tracking for the session manager sweep

use super::core::PlaybackEngine;
use chorus_common::events::{EngineState, TrackInfo, VoiceEvent};
use chorus_common::time::format_clock;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Track being played (or paused, or waiting on a reconnect)
#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub track: TrackInfo,
    pub frames_sent: u64,
    pub position_ms: u64,
    /// `m:ss` rendering of `position_ms`
    pub position: String,
}

/// Engine status at one instant
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub session_id: String,
    pub state: EngineState,
    pub current: Option<NowPlaying>,
    pub queue: Vec<TrackInfo>,
    /// Pass back with index-based queue edits
    pub queue_generation: u64,
}

impl PlaybackEngine {
    pub async fn status(&self) -> EngineStatus {
        let (state, current) = {
            let status = self.shared.status.read().await;
            (status.state, status.current.clone())
        };
        let snapshot = self.shared.queue.snapshot().await;

        let current = current.map(|track| {
            let frames_sent = self.shared.frames_sent.load(Ordering::Relaxed);
            let position_ms = frames_sent * self.shared.config.format.frame_duration_ms as u64;
            NowPlaying {
                track,
                frames_sent,
                position_ms,
                position: format_clock(Duration::from_millis(position_ms)),
            }
        });

        EngineStatus {
            session_id: self.shared.session_id.clone(),
            state,
            current,
            queue: snapshot.entries.iter().map(|t| t.to_info()).collect(),
            queue_generation: snapshot.generation,
        }
    }

    pub async fn state(&self) -> EngineState {
        self.shared.status.read().await.state
    }

    /// How long the engine has been Idle with an empty queue
    pub async fn idle_for(&self) -> Option<Duration> {
        let since = {
            let status = self.shared.status.read().await;
            if status.state != EngineState::Idle {
                return None;
            }
            status.idle_since?
        };
        if !self.shared.queue.is_empty().await {
            return None;
        }
        Some(Instant::now().saturating_duration_since(since))
    }

    /// Receive this engine's events (and, on a shared bus, every other engine's)
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.shared.events.subscribe()
    }
}
