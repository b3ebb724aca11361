//! Per-session playback engine
//!
//! **Module Structure:**
//! - `core.rs`: handle, spawn, control round-trips, close
//! - `driver.rs`: the driver task (state machine, pacing loop, stall recovery)
//! - `queue.rs`: queue operations (play, remove, move)
//! - `diagnostics.rs`: status snapshots and event subscription
//! - `liveness.rs`: keepalive monitor beside the pacing loop
//!
//! **State machine:**
//!
//! | From               | Trigger                               | To                    |
//! |--------------------|---------------------------------------|-----------------------|
//! | Idle               | play / start with queued tracks       | Connecting            |
//! | Connecting         | transport up, source opened           | Playing               |
//! | Connecting         | connect retries exhausted             | Idle (`ConnectFailed`)|
//! | Playing            | pause                                 | Paused                |
//! | Paused             | resume                                | Playing               |
//! | Playing            | end of track, queue non-empty         | Playing               |
//! | Playing            | end of track, queue empty             | Idle                  |
//! | Playing / Paused   | send failure, send timeout, link lost | Stalled               |
//! | Stalled            | reconnected                           | Playing (or Paused)   |
//! | Stalled            | reconnect retries exhausted           | Idle (`SessionLost`)  |
//! | Idle (empty queue) | idle sweep past `idle_timeout`        | Closing → Closed      |
//! | any                | close                                 | Closing → Closed      |
//!
//! Only the driver task writes engine state. Control calls are messages to
//! the driver with a oneshot reply, so they are never stuck behind a frame
//! read or send.

mod core;
mod diagnostics;
mod driver;
mod liveness;
mod queue;

pub use self::core::{EngineDeps, PlaybackEngine};
pub use diagnostics::{EngineStatus, NowPlaying};
pub use queue::PlayReceipt;

use crate::error::Result;
use std::time::Duration;
use tokio::sync::oneshot;

/// Requests handled by the driver task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    /// Begin playback if idle; `Ok(true)` if playback started
    Start,
    Pause,
    Resume,
    Skip,
    /// Clear the queue and go idle
    Stop,
    Close,
    /// Close only if Idle with an empty queue for at least this long
    CloseIfIdle(Duration),
}

pub(crate) struct Control {
    pub command: Command,
    pub reply: oneshot::Sender<Result<bool>>,
}
