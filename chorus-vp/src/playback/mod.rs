//! Playback engine and queue management

pub mod engine;
pub mod pacer;
pub mod queue;
pub mod retry;

pub use engine::{EngineDeps, EngineStatus, NowPlaying, PlayReceipt, PlaybackEngine};
pub use queue::{PlaybackQueue, QueueSnapshot, TrackRequest};
pub use retry::{RetryBudget, RetryPolicy};
