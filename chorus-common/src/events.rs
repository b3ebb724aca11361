//! Event types for the Chorus event system
//!
//! Every playback engine broadcasts [`VoiceEvent`]s. The HTTP layer streams
//! them over SSE and the gateway layer renders the user-facing ones
//! (`TrackInterrupted`, `SessionLost`, ...) into chat messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Playback engine state
///
/// Transitions are owned by the engine driver; see the engine module for the
/// full transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Connecting,
    Playing,
    Paused,
    Stalled,
    Closing,
    Closed,
}

impl EngineState {
    /// True while a track is loaded (playing, paused or waiting on a reconnect)
    pub fn has_active_track(self) -> bool {
        matches!(self, EngineState::Playing | EngineState::Paused | EngineState::Stalled)
    }

    /// True once the engine is shutting down or gone
    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Closing | EngineState::Closed)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::Idle => "idle",
            EngineState::Connecting => "connecting",
            EngineState::Playing => "playing",
            EngineState::Paused => "paused",
            EngineState::Stalled => "stalled",
            EngineState::Closing => "closing",
            EngineState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Track description carried by events and status responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub entry_id: Uuid,
    pub source: String,
    pub requester: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Chorus event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VoiceEvent {
    /// Engine state machine transition
    StateChanged {
        session_id: String,
        old_state: EngineState,
        new_state: EngineState,
        timestamp: DateTime<Utc>,
    },

    /// First frame of a track is about to be paced out
    TrackStarted {
        session_id: String,
        track: TrackInfo,
        timestamp: DateTime<Utc>,
    },

    /// Track left the engine (`completed = false` means skipped or stopped)
    TrackEnded {
        session_id: String,
        track: TrackInfo,
        completed: bool,
        frames_sent: u64,
        timestamp: DateTime<Utc>,
    },

    /// Track abandoned because its source failed (unavailable or decode error)
    TrackFailed {
        session_id: String,
        track: TrackInfo,
        kind: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Non-resumable track lost its position during a transport stall
    TrackInterrupted {
        session_id: String,
        track: TrackInfo,
        timestamp: DateTime<Utc>,
    },

    /// Queue contents changed
    QueueChanged {
        session_id: String,
        queue_len: usize,
        generation: u64,
        timestamp: DateTime<Utc>,
    },

    /// Initial connect exhausted its retry policy
    ConnectFailed {
        session_id: String,
        attempts: u32,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Reconnection after a stall exhausted its retry policy
    SessionLost {
        session_id: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// Engine released its transport and source and discarded its queue
    SessionClosed {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl VoiceEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            VoiceEvent::StateChanged { session_id, .. }
            | VoiceEvent::TrackStarted { session_id, .. }
            | VoiceEvent::TrackEnded { session_id, .. }
            | VoiceEvent::TrackFailed { session_id, .. }
            | VoiceEvent::TrackInterrupted { session_id, .. }
            | VoiceEvent::QueueChanged { session_id, .. }
            | VoiceEvent::ConnectFailed { session_id, .. }
            | VoiceEvent::SessionLost { session_id, .. }
            | VoiceEvent::SessionClosed { session_id, .. } => session_id,
        }
    }

    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            VoiceEvent::StateChanged { .. } => "StateChanged",
            VoiceEvent::TrackStarted { .. } => "TrackStarted",
            VoiceEvent::TrackEnded { .. } => "TrackEnded",
            VoiceEvent::TrackFailed { .. } => "TrackFailed",
            VoiceEvent::TrackInterrupted { .. } => "TrackInterrupted",
            VoiceEvent::QueueChanged { .. } => "QueueChanged",
            VoiceEvent::ConnectFailed { .. } => "ConnectFailed",
            VoiceEvent::SessionLost { .. } => "SessionLost",
            VoiceEvent::SessionClosed { .. } => "SessionClosed",
        }
    }
}
