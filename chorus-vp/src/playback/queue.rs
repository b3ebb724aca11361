//! Per-session playback queue
//!
//! **Responsibilities:**
//! - Ordered, in-memory sequence of [`TrackRequest`]s (FIFO unless reordered)
//! - Generation counter bumped on every mutation, carried by snapshots
//! - Stale-index protection for index-based remove / move
//!
//! Every mutation takes the write lock once, so the driver task and control
//! callers never observe a half-applied change.

use crate::error::{Error, Result};
use chorus_common::events::TrackInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// One queued track; immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackRequest {
    pub id: Uuid,
    pub source: String,
    pub requester: String,
    pub enqueued_at: DateTime<Utc>,
}

impl TrackRequest {
    pub fn new(source: impl Into<String>, requester: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            requester: requester.into(),
            enqueued_at: chorus_common::time::now(),
        }
    }

    pub fn to_info(&self) -> TrackInfo {
        TrackInfo {
            entry_id: self.id,
            source: self.source.clone(),
            requester: self.requester.clone(),
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Consistent view of the queue at one generation
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub generation: u64,
    pub entries: Vec<TrackRequest>,
}

struct QueueInner {
    entries: VecDeque<TrackRequest>,
    generation: u64,
}

impl QueueInner {
    fn check_generation(&self, index: usize, expected: u64) -> Result<()> {
        if expected != self.generation {
            return Err(Error::StaleIndex {
                index,
                expected,
                actual: self.generation,
            });
        }
        if index >= self.entries.len() {
            return Err(Error::InvalidIndex {
                index,
                len: self.entries.len(),
            });
        }
        Ok(())
    }

    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

/// Thread-safe ordered queue of track requests
pub struct PlaybackQueue {
    inner: RwLock<QueueInner>,
    max_len: Option<usize>,
}

impl PlaybackQueue {
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            inner: RwLock::new(QueueInner {
                entries: VecDeque::new(),
                generation: 0,
            }),
            max_len,
        }
    }

    /// Append a track; returns its 0-based position
    pub async fn enqueue(&self, track: TrackRequest) -> Result<usize> {
        let mut inner = self.inner.write().await;
        if let Some(max) = self.max_len {
            if inner.entries.len() >= max {
                return Err(Error::QueueFull(max));
            }
        }
        debug!(track = %track.id, source = %track.source, "Enqueued");
        inner.entries.push_back(track);
        inner.bump();
        Ok(inner.entries.len() - 1)
    }

    /// Pop the head of the queue
    pub async fn dequeue_next(&self) -> Option<TrackRequest> {
        let mut inner = self.inner.write().await;
        let track = inner.entries.pop_front()?;
        inner.bump();
        Some(track)
    }

    pub async fn peek(&self) -> Option<TrackRequest> {
        self.inner.read().await.entries.front().cloned()
    }

    /// Remove the entry at `index` of the snapshot taken at `expected_generation`
    pub async fn remove(&self, index: usize, expected_generation: u64) -> Result<TrackRequest> {
        let mut inner = self.inner.write().await;
        inner.check_generation(index, expected_generation)?;
        let track = inner
            .entries
            .remove(index)
            .ok_or(Error::InvalidIndex { index, len: 0 })?;
        inner.bump();
        Ok(track)
    }

    /// Remove every entry matching `predicate`; returns the removed entries
    pub async fn remove_where<F>(&self, mut predicate: F) -> Vec<TrackRequest>
    where
        F: FnMut(&TrackRequest) -> bool,
    {
        let mut inner = self.inner.write().await;
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(inner.entries.len());
        for track in inner.entries.drain(..) {
            if predicate(&track) {
                removed.push(track);
            } else {
                kept.push_back(track);
            }
        }
        inner.entries = kept;
        if !removed.is_empty() {
            inner.bump();
        }
        removed
    }

    /// Move the entry at `from` to position `to` (positions after removal)
    pub async fn move_entry(&self, from: usize, to: usize, expected_generation: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check_generation(from, expected_generation)?;
        let len = inner.entries.len();
        if to >= len {
            return Err(Error::InvalidIndex { index: to, len });
        }
        if from != to {
            if let Some(track) = inner.entries.remove(from) {
                inner.entries.insert(to, track);
            }
            inner.bump();
        }
        Ok(())
    }

    /// Drop every entry; returns how many were removed
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.write().await;
        let count = inner.entries.len();
        if count > 0 {
            inner.entries.clear();
            inner.bump();
        }
        count
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.read().await;
        QueueSnapshot {
            generation: inner.generation,
            entries: inner.entries.iter().cloned().collect(),
        }
    }

    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}
