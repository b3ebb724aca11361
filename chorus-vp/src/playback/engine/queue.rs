//! Queue operations module
//!
//! **Responsibilities:**
//! - `play`: validate, enqueue, kick the driver if idle
//! - Index-based queue edits guarded by the snapshot generation
//! - QueueChanged emission for caller-side mutations
//!
//! Enqueueing never preempts the current track.

use super::core::PlaybackEngine;
use super::Command;
use crate::error::{Error, Result};
use crate::playback::queue::{QueueSnapshot, TrackRequest};
use chorus_common::events::TrackInfo;
use serde::Serialize;
use tracing::info;

/// Result of a successful `play`
#[derive(Debug, Clone, Serialize)]
pub struct PlayReceipt {
    pub track: TrackInfo,
    /// Position the track was appended at
    pub queue_position: usize,
    /// Whether this call took the engine out of Idle
    pub started_playback: bool,
}

impl PlaybackEngine {
    /// Queue a track and start playback if the engine is idle
    ///
    /// An unresolvable reference fails with `SourceUnavailable` and is not
    /// queued. If the engine cannot connect, the error is returned and the
    /// track stays queued.
    pub async fn play(&self, source: &str, requester: &str) -> Result<PlayReceipt> {
        self.ensure_open().await?;
        self.shared.sources.validate(source)?;

        let request = TrackRequest::new(source.trim(), requester);
        let track = request.to_info();
        let queue_position = self.shared.queue.enqueue(request).await?;
        self.shared.emit_queue_changed().await;

        info!(
            session = %self.shared.session_id,
            track = %track.entry_id,
            source = %track.source,
            requester = %track.requester,
            queue_position,
            "Track queued"
        );

        let started_playback = self.request(Command::Start).await?;
        Ok(PlayReceipt {
            track,
            queue_position,
            started_playback,
        })
    }

    /// Remove the entry at `index` of the snapshot taken at `generation`
    pub async fn remove(&self, index: usize, generation: u64) -> Result<TrackInfo> {
        self.ensure_open().await?;
        let removed = self.shared.queue.remove(index, generation).await?;
        self.shared.emit_queue_changed().await;
        info!(session = %self.shared.session_id, track = %removed.id, index, "Removed from queue");
        Ok(removed.to_info())
    }

    /// Move the entry at `from` to `to` of the snapshot taken at `generation`
    pub async fn move_entry(&self, from: usize, to: usize, generation: u64) -> Result<()> {
        self.ensure_open().await?;
        self.shared.queue.move_entry(from, to, generation).await?;
        self.shared.emit_queue_changed().await;
        Ok(())
    }

    /// Remove every queued entry added by `requester`; returns how many
    pub async fn remove_by_requester(&self, requester: &str) -> Result<usize> {
        self.ensure_open().await?;
        let removed = self.shared.queue.remove_where(|t| t.requester == requester).await;
        if !removed.is_empty() {
            self.shared.emit_queue_changed().await;
        }
        Ok(removed.len())
    }

    pub async fn queue_snapshot(&self) -> QueueSnapshot {
        self.shared.queue.snapshot().await
    }

    async fn ensure_open(&self) -> Result<()> {
        if self.shared.status.read().await.state.is_terminal() {
            return Err(Error::SessionClosed(self.shared.session_id.clone()));
        }
        Ok(())
    }
}
