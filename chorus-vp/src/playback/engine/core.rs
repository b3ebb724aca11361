//! Core playback engine - handle and lifecycle
//!
//! **Responsibilities:**
//! - PlaybackEngine handle and the state it shares with the driver task
//! - Spawning the driver
//! - Control round-trips (pause, resume, skip, stop, start)
//! - Idempotent close

use super::driver::Driver;
use super::{Command, Control};
use crate::audio::source::SourceFactory;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::playback::queue::PlaybackQueue;
use crate::transport::{TargetProvider, TransportConnector};
use chorus_common::events::{EngineState, TrackInfo, VoiceEvent};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Collaborators injected into every engine
#[derive(Clone)]
pub struct EngineDeps {
    pub sources: Arc<dyn SourceFactory>,
    pub connector: Arc<dyn TransportConnector>,
    pub targets: Arc<dyn TargetProvider>,
    /// Shared event bus; every engine publishes into the same channel
    pub events: broadcast::Sender<VoiceEvent>,
}

/// Engine state visible outside the driver
///
/// Written only by the driver task.
pub(super) struct StatusCell {
    pub(super) state: EngineState,
    pub(super) current: Option<TrackInfo>,
    /// Set when entering Idle, cleared on leaving it
    pub(super) idle_since: Option<Instant>,
}

/// State shared between the handle(s) and the driver task
pub(super) struct EngineShared {
    pub(super) session_id: String,
    pub(super) config: EngineConfig,
    pub(super) queue: PlaybackQueue,
    pub(super) status: RwLock<StatusCell>,

    /// Frames sent for the current track
    /// AtomicU64 for lock-free updates in the pacing loop
    pub(super) frames_sent: AtomicU64,

    pub(super) events: broadcast::Sender<VoiceEvent>,
    pub(super) sources: Arc<dyn SourceFactory>,
    pub(super) control_tx: mpsc::UnboundedSender<Control>,
    pub(super) cancel: CancellationToken,
    pub(super) driver: Mutex<Option<JoinHandle<()>>>,
}

impl EngineShared {
    pub(super) fn emit(&self, event: VoiceEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    pub(super) async fn emit_queue_changed(&self) {
        let snapshot = self.queue.snapshot().await;
        self.emit(VoiceEvent::QueueChanged {
            session_id: self.session_id.clone(),
            queue_len: snapshot.entries.len(),
            generation: snapshot.generation,
            timestamp: chorus_common::time::now(),
        });
    }

    pub(super) fn closed_error(&self) -> Error {
        Error::SessionClosed(self.session_id.clone())
    }
}

/// Handle to one session's playback engine
///
/// Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct PlaybackEngine {
    pub(super) shared: Arc<EngineShared>,
}

impl PlaybackEngine {
    /// Create the engine and start its driver task (state Idle)
    pub fn spawn(session_id: impl Into<String>, config: EngineConfig, deps: EngineDeps) -> Self {
        let session_id = session_id.into();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(EngineShared {
            queue: PlaybackQueue::new(config.max_queue_len),
            status: RwLock::new(StatusCell {
                state: EngineState::Idle,
                current: None,
                idle_since: Some(Instant::now()),
            }),
            frames_sent: AtomicU64::new(0),
            events: deps.events,
            sources: deps.sources,
            control_tx,
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
            session_id,
            config,
        });

        let driver = Driver::new(Arc::clone(&shared), control_rx, deps.connector, deps.targets);
        let handle = tokio::spawn(driver.run());
        if let Ok(mut slot) = shared.driver.lock() {
            *slot = Some(handle);
        }

        info!(session = %shared.session_id, "Playback engine created");
        Self { shared }
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Send a command to the driver and wait for its reply
    ///
    /// `Start` may include a full connect with retries, so it is bounded by
    /// the connect retry policy instead of `control_timeout`.
    pub(super) async fn request(&self, command: Command) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.shared
            .control_tx
            .send(Control { command, reply })
            .map_err(|_| self.shared.closed_error())?;

        let outcome = if command == Command::Start {
            rx.await
        } else {
            let limit = self.shared.config.control_timeout();
            timeout(limit, rx).await.map_err(|_| {
                Error::Internal(format!("{:?} not acknowledged within {:?}", command, limit))
            })?
        };
        outcome.map_err(|_| self.shared.closed_error())?
    }

    /// Begin playing the queue if the engine is idle
    ///
    /// Returns `Ok(false)` when there is nothing to play or playback is
    /// already underway.
    pub async fn start(&self) -> Result<bool> {
        self.request(Command::Start).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await.map(|_| ())
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(Command::Resume).await.map(|_| ())
    }

    /// Abandon the current track and move to the next queued one
    pub async fn skip(&self) -> Result<()> {
        self.request(Command::Skip).await.map(|_| ())
    }

    /// Clear the queue, close the current track and go idle
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await.map(|_| ())
    }

    /// Release everything and stop the driver. Idempotent.
    pub async fn close(&self) -> Result<()> {
        match self.request(Command::Close).await {
            Ok(_) | Err(Error::SessionClosed(_)) => {}
            Err(e) => warn!(session = %self.shared.session_id, error = %e, "Close not acknowledged"),
        }
        self.shared.cancel.cancel();
        self.join_driver().await;
        Ok(())
    }

    /// Close if the engine has sat Idle with an empty queue for at least
    /// `idle_timeout`; returns whether it closed
    ///
    /// The driver makes the decision, so a track queued before the request
    /// is handled keeps the engine alive.
    pub async fn close_if_idle(&self, idle_timeout: Duration) -> Result<bool> {
        let closed = self.request(Command::CloseIfIdle(idle_timeout)).await?;
        if closed {
            self.join_driver().await;
        }
        Ok(closed)
    }

    /// Whether both handles drive the same engine
    pub fn same_engine(&self, other: &PlaybackEngine) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    async fn join_driver(&self) {
        let handle = self.shared.driver.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut handle) = handle {
            let limit = self.shared.config.control_timeout();
            if timeout(limit, &mut handle).await.is_err() {
                warn!(session = %self.shared.session_id, "Driver did not stop within {:?}, aborting", limit);
                handle.abort();
            } else {
                debug!(session = %self.shared.session_id, "Driver stopped");
            }
        }
    }
}
