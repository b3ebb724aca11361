//! Engine driver task
//!
//! **Responsibilities:**
//! - Sole writer of engine state
//! - Pacing loop: read one frame, wait for the send slot, send it
//! - Track transitions (end of track, skip, decode failure)
//! - Stall handling and reconnection with a shared retry budget
//! - Reacting to a lost link reported by the liveness monitor
//!
//! Every await point in the loop sits inside a `select!` with the control
//! channel and the cancellation token, or is bounded by a configured timeout.

use super::core::EngineShared;
use super::liveness::{link_lost, LivenessMonitor};
use super::{Command, Control};
use crate::audio::source::FrameSource;
use crate::audio::types::AudioFrame;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::playback::pacer::Pacer;
use crate::playback::queue::TrackRequest;
use crate::playback::retry::RetryBudget;
use crate::transport::{TargetProvider, Transport, TransportConnector};
use chorus_common::events::{EngineState, VoiceEvent};
use chorus_common::time::now;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Track currently loaded in the engine
struct ActiveTrack {
    request: TrackRequest,
    source: Box<dyn FrameSource>,
    /// Frame read but not yet sent; survives cancelled steps and stalls
    pending: Option<AudioFrame>,
}

/// Result of one pacing step
enum Step {
    Sent,
    EndOfTrack,
    DecodeStalled,
    DecodeFailed(Error),
    SendFailed(Error),
    NoTrack,
}

enum Flow {
    Continue,
    Exit,
}

/// Outcome of a wait that control commands may cut short
enum Interrupted<T> {
    Done(T),
    /// Stop arrived; the engine is already Idle
    Aborted,
    /// Close or cancellation
    Exit,
}

pub(super) struct Driver {
    shared: Arc<EngineShared>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    connector: Arc<dyn TransportConnector>,
    targets: Arc<dyn TargetProvider>,

    state: EngineState,
    transport: Option<Box<dyn Transport>>,
    track: Option<ActiveTrack>,
    pacer: Pacer,
    /// Present exactly while `transport` is
    liveness: Option<LivenessMonitor>,

    /// Reconnect attempts, shared across stalls until a frame goes out
    stall_budget: RetryBudget,
    decode_stalls: u32,
    paused_before_stall: bool,
}

impl Driver {
    pub(super) fn new(
        shared: Arc<EngineShared>,
        control_rx: mpsc::UnboundedReceiver<Control>,
        connector: Arc<dyn TransportConnector>,
        targets: Arc<dyn TargetProvider>,
    ) -> Self {
        let pacer = Pacer::new(shared.config.format.frame_duration());
        let stall_budget = RetryBudget::new(shared.config.reconnect_retry.clone());

        Self {
            shared,
            control_rx,
            connector,
            targets,
            state: EngineState::Idle,
            transport: None,
            track: None,
            pacer,
            liveness: None,
            stall_budget,
            decode_stalls: 0,
            paused_before_stall: false,
        }
    }

    pub(super) async fn run(mut self) {
        debug!(session = %self.shared.session_id, "Driver started");
        loop {
            let flow = match self.state {
                EngineState::Playing => self.playing_cycle().await,
                EngineState::Stalled => self.recover().await,
                EngineState::Idle | EngineState::Paused | EngineState::Connecting => {
                    self.wait_for_command().await
                }
                EngineState::Closing | EngineState::Closed => Flow::Exit,
            };
            if let Flow::Exit = flow {
                break;
            }
        }
        self.close_engine().await;
        self.control_rx.close();
        debug!(session = %self.shared.session_id, "Driver exited");
    }

    // ---------------------------------------------------------------------
    // Loop bodies
    // ---------------------------------------------------------------------

    async fn playing_cycle(&mut self) -> Flow {
        let cancel = self.shared.cancel.clone();

        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Flow::Exit,
            control = self.control_rx.recv() => return self.on_control(control).await,
            cause = link_lost(&mut self.liveness) => return self.on_link_lost(cause).await,
            step = frame_step(&mut self.track, &mut self.transport, &mut self.pacer, &self.shared.config) => step,
        };
        self.on_step(step).await;
        Flow::Continue
    }

    async fn wait_for_command(&mut self) -> Flow {
        let cancel = self.shared.cancel.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Flow::Exit,
            control = self.control_rx.recv() => self.on_control(control).await,
            cause = link_lost(&mut self.liveness) => self.on_link_lost(cause).await,
        }
    }

    async fn recover(&mut self) -> Flow {
        let mut budget = self.stall_budget.clone();
        let outcome = self.connect_with_budget(&mut budget).await;
        self.stall_budget = budget;

        match outcome {
            Interrupted::Done(Ok(link)) => {
                info!(
                    session = %self.shared.session_id,
                    attempts = self.stall_budget.used(),
                    "Voice transport reconnected"
                );
                self.install_transport(link);
                let target = if self.paused_before_stall {
                    EngineState::Paused
                } else {
                    EngineState::Playing
                };
                if self.track.is_some() {
                    self.set_state(target).await;
                } else {
                    self.advance_or_idle(target).await;
                }
                Flow::Continue
            }
            Interrupted::Done(Err(_)) => {
                self.session_lost().await;
                Flow::Continue
            }
            Interrupted::Aborted => {
                self.stall_budget.reset();
                Flow::Continue
            }
            Interrupted::Exit => Flow::Exit,
        }
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    async fn on_control(&mut self, control: Option<Control>) -> Flow {
        let Some(Control { command, reply }) = control else {
            return Flow::Exit;
        };
        debug!(session = %self.shared.session_id, ?command, state = %self.state, "Command received");

        let result = match (command, self.state) {
            (Command::Close, _) => {
                self.close_engine().await;
                let _ = reply.send(Ok(true));
                return Flow::Exit;
            }
            (Command::CloseIfIdle(limit), EngineState::Idle) => {
                if self.idle_at_least(limit).await {
                    self.close_engine().await;
                    let _ = reply.send(Ok(true));
                    return Flow::Exit;
                }
                Ok(false)
            }
            (Command::CloseIfIdle(_), _) => Ok(false),
            (Command::Start, EngineState::Idle) => return self.start_playback(reply).await,
            (Command::Start, _) => Ok(false),
            (Command::Pause, EngineState::Playing) => {
                self.set_state(EngineState::Paused).await;
                Ok(true)
            }
            (Command::Pause, EngineState::Paused) => Ok(false),
            (Command::Resume, EngineState::Paused) => {
                self.pacer.reset();
                self.set_state(EngineState::Playing).await;
                Ok(true)
            }
            (Command::Resume, EngineState::Playing) => Ok(false),
            (Command::Skip, EngineState::Playing | EngineState::Paused) => {
                self.skip_current().await;
                Ok(true)
            }
            (Command::Stop, _) => {
                self.stop_playback().await;
                Ok(true)
            }
            (command, state) => Err(Error::InvalidState(format!(
                "cannot {:?} while {}",
                command, state
            ))),
        };
        let _ = reply.send(result);
        Flow::Continue
    }

    /// Idle + Start: connect (with retries) and load the queue head
    async fn start_playback(&mut self, reply: oneshot::Sender<Result<bool>>) -> Flow {
        if self.shared.queue.is_empty().await {
            let _ = reply.send(Ok(false));
            return Flow::Continue;
        }

        self.set_state(EngineState::Connecting).await;
        self.stall_budget.reset();

        let connected = self.transport.as_ref().map_or(false, |t| t.is_connected());
        if connected {
            self.pacer.reset();
        } else {
            self.release_transport().await;
            let mut budget = RetryBudget::new(self.shared.config.connect_retry.clone());
            match self.connect_with_budget(&mut budget).await {
                Interrupted::Done(Ok(link)) => {
                    info!(
                        session = %self.shared.session_id,
                        attempts = budget.used(),
                        "Voice transport connected"
                    );
                    self.install_transport(link);
                }
                Interrupted::Done(Err(e)) => {
                    error!(
                        session = %self.shared.session_id,
                        attempts = budget.used(),
                        error = %e,
                        "Could not connect voice transport"
                    );
                    self.shared.emit(VoiceEvent::ConnectFailed {
                        session_id: self.shared.session_id.clone(),
                        attempts: budget.used(),
                        message: e.to_string(),
                        timestamp: now(),
                    });
                    self.set_state(EngineState::Idle).await;
                    let _ = reply.send(Err(e));
                    return Flow::Continue;
                }
                Interrupted::Aborted => {
                    let _ = reply.send(Ok(false));
                    return Flow::Continue;
                }
                Interrupted::Exit => {
                    let _ = reply.send(Err(self.shared.closed_error()));
                    return Flow::Exit;
                }
            }
        }

        let result = self.advance_to_next(EngineState::Playing).await;
        let _ = reply.send(result);
        Flow::Continue
    }

    async fn skip_current(&mut self) {
        let target = if self.state == EngineState::Paused {
            EngineState::Paused
        } else {
            EngineState::Playing
        };
        self.finish_track(false).await;
        self.advance_or_idle(target).await;
    }

    async fn stop_playback(&mut self) {
        let cleared = self.shared.queue.clear().await;
        if cleared > 0 {
            self.shared.emit_queue_changed().await;
        }
        self.finish_track(false).await;
        self.stall_budget.reset();
        self.paused_before_stall = false;
        self.set_state(EngineState::Idle).await;
        info!(session = %self.shared.session_id, cleared, "Playback stopped");
    }

    /// Release source, transport and queue. Idempotent.
    async fn close_engine(&mut self) {
        if self.state == EngineState::Closed {
            return;
        }
        self.set_state(EngineState::Closing).await;
        self.finish_track(false).await;
        self.release_transport().await;
        let dropped = self.shared.queue.clear().await;
        self.set_state(EngineState::Closed).await;
        self.shared.cancel.cancel();

        self.shared.emit(VoiceEvent::SessionClosed {
            session_id: self.shared.session_id.clone(),
            timestamp: now(),
        });
        info!(session = %self.shared.session_id, dropped, "Engine closed");
    }

    // ---------------------------------------------------------------------
    // Pacing outcomes
    // ---------------------------------------------------------------------

    async fn on_step(&mut self, step: Step) {
        match step {
            Step::Sent => {
                self.decode_stalls = 0;
                self.stall_budget.reset();
                self.shared.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Step::EndOfTrack => {
                self.finish_track(true).await;
                self.advance_or_idle(EngineState::Playing).await;
            }
            Step::DecodeStalled => {
                self.decode_stalls += 1;
                let stall = Error::DecodeStall(self.shared.config.read_timeout());
                if self.decode_stalls > self.shared.config.max_decode_stalls {
                    let e = Error::Decode(format!(
                        "{} consecutive decoder stalls ({})",
                        self.decode_stalls, stall
                    ));
                    self.fail_track(e).await;
                    self.advance_or_idle(EngineState::Playing).await;
                } else {
                    warn!(
                        session = %self.shared.session_id,
                        stalls = self.decode_stalls,
                        "{}", stall
                    );
                }
            }
            Step::DecodeFailed(e) => {
                self.fail_track(e).await;
                self.advance_or_idle(EngineState::Playing).await;
            }
            Step::SendFailed(e) => self.enter_stall(e).await,
            Step::NoTrack => self.advance_or_idle(EngineState::Playing).await,
        }
    }

    async fn on_link_lost(&mut self, cause: Error) -> Flow {
        if matches!(self.state, EngineState::Playing | EngineState::Paused) {
            self.enter_stall(cause).await;
        } else {
            // Nothing to resume; the next start reconnects
            info!(session = %self.shared.session_id, error = %cause, "Dropping dead idle transport");
            self.release_transport().await;
        }
        Flow::Continue
    }

    async fn enter_stall(&mut self, cause: Error) {
        warn!(
            session = %self.shared.session_id,
            kind = cause.kind(),
            error = %cause,
            "Voice transport stalled"
        );
        self.paused_before_stall = self.state == EngineState::Paused;
        self.release_transport().await;
        let resumable = self.track.as_ref().map(|t| t.source.is_resumable());
        if resumable == Some(false) {
            self.interrupt_track().await;
        }
        self.set_state(EngineState::Stalled).await;
    }

    async fn session_lost(&mut self) {
        let attempts = self.stall_budget.used();
        error!(session = %self.shared.session_id, attempts, "Voice session lost");
        self.finish_track(false).await;
        self.shared.emit(VoiceEvent::SessionLost {
            session_id: self.shared.session_id.clone(),
            attempts,
            timestamp: now(),
        });
        self.stall_budget.reset();
        self.paused_before_stall = false;
        self.set_state(EngineState::Idle).await;
    }

    // ---------------------------------------------------------------------
    // Track lifecycle
    // ---------------------------------------------------------------------

    /// Load the next playable track into `target`, or go Idle
    ///
    /// Tracks whose source cannot be opened are reported and skipped. Returns
    /// the last open failure if the queue ran dry without a playable track.
    async fn advance_to_next(&mut self, target: EngineState) -> Result<bool> {
        let mut last_error = None;

        while let Some(request) = self.shared.queue.dequeue_next().await {
            self.shared.emit_queue_changed().await;

            match self.shared.sources.open(&request).await {
                Ok(source) => {
                    let info = request.to_info();
                    info!(
                        session = %self.shared.session_id,
                        track = %request.id,
                        source = %request.source,
                        "Track started"
                    );
                    self.shared.frames_sent.store(0, Ordering::Relaxed);
                    self.decode_stalls = 0;
                    self.track = Some(ActiveTrack {
                        request,
                        source,
                        pending: None,
                    });
                    self.set_state(target).await;
                    self.shared.status.write().await.current = Some(info.clone());
                    self.shared.emit(VoiceEvent::TrackStarted {
                        session_id: self.shared.session_id.clone(),
                        track: info,
                        timestamp: now(),
                    });
                    return Ok(true);
                }
                Err(e) => {
                    warn!(
                        session = %self.shared.session_id,
                        track = %request.id,
                        error = %e,
                        "Skipping unplayable track"
                    );
                    self.shared.emit(VoiceEvent::TrackFailed {
                        session_id: self.shared.session_id.clone(),
                        track: request.to_info(),
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                        timestamp: now(),
                    });
                    last_error = Some(e);
                }
            }
        }

        self.set_state(EngineState::Idle).await;
        match last_error {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }

    async fn advance_or_idle(&mut self, target: EngineState) {
        if let Err(e) = self.advance_to_next(target).await {
            debug!(session = %self.shared.session_id, error = %e, "Queue exhausted without a playable track");
        }
    }

    /// Close the current track and report it as ended
    async fn finish_track(&mut self, completed: bool) {
        let Some(mut active) = self.track.take() else {
            return;
        };
        active.source.close().await;
        let frames_sent = self.shared.frames_sent.load(Ordering::Relaxed);
        debug!(
            session = %self.shared.session_id,
            track = %active.request.id,
            completed,
            frames_sent,
            "Track ended"
        );
        self.clear_current().await;
        self.shared.emit(VoiceEvent::TrackEnded {
            session_id: self.shared.session_id.clone(),
            track: active.request.to_info(),
            completed,
            frames_sent,
            timestamp: now(),
        });
    }

    async fn fail_track(&mut self, cause: Error) {
        self.decode_stalls = 0;
        let Some(mut active) = self.track.take() else {
            return;
        };
        active.source.close().await;
        warn!(
            session = %self.shared.session_id,
            track = %active.request.id,
            kind = cause.kind(),
            error = %cause,
            "Track failed"
        );
        self.clear_current().await;
        self.shared.emit(VoiceEvent::TrackFailed {
            session_id: self.shared.session_id.clone(),
            track: active.request.to_info(),
            kind: cause.kind().to_string(),
            message: cause.to_string(),
            timestamp: now(),
        });
    }

    /// Non-resumable track cannot survive the stall
    async fn interrupt_track(&mut self) {
        let Some(mut active) = self.track.take() else {
            return;
        };
        active.source.close().await;
        let cause = Error::TrackInterrupted(active.request.source.clone());
        warn!(session = %self.shared.session_id, track = %active.request.id, "{}", cause);
        self.clear_current().await;
        self.shared.emit(VoiceEvent::TrackInterrupted {
            session_id: self.shared.session_id.clone(),
            track: active.request.to_info(),
            timestamp: now(),
        });
    }

    // ---------------------------------------------------------------------
    // Connection
    // ---------------------------------------------------------------------

    fn install_transport(&mut self, link: Box<dyn Transport>) {
        self.liveness = Some(LivenessMonitor::spawn(
            link.keepalive(),
            &self.shared.config,
            &self.shared.cancel,
            self.shared.session_id.clone(),
        ));
        self.transport = Some(link);
        self.pacer.reset();
    }

    async fn release_transport(&mut self) {
        self.liveness = None;
        if let Some(mut link) = self.transport.take() {
            link.close().await;
        }
    }

    /// Connect attempts until success or `budget` runs out
    async fn connect_with_budget(&mut self, budget: &mut RetryBudget) -> Interrupted<Result<Box<dyn Transport>>> {
        let mut last_error: Option<Error> = None;

        while let Some((attempt, delay)) = budget.next_attempt() {
            if !delay.is_zero() {
                debug!(session = %self.shared.session_id, attempt, ?delay, "Backing off before connect");
                match self.interruptible(sleep(delay)).await {
                    Interrupted::Done(()) => {}
                    Interrupted::Aborted => return Interrupted::Aborted,
                    Interrupted::Exit => return Interrupted::Exit,
                }
            }

            let attempt_future = connect_once(
                Arc::clone(&self.targets),
                Arc::clone(&self.connector),
                self.shared.session_id.clone(),
                self.shared.config.connect_timeout(),
            );
            match self.interruptible(attempt_future).await {
                Interrupted::Done(Ok(link)) => return Interrupted::Done(Ok(link)),
                Interrupted::Done(Err(e)) => {
                    warn!(session = %self.shared.session_id, attempt, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
                Interrupted::Aborted => return Interrupted::Aborted,
                Interrupted::Exit => return Interrupted::Exit,
            }
        }

        Interrupted::Done(Err(Error::ConnectFailed {
            attempts: budget.used(),
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "retry budget exhausted".to_string()),
        }))
    }

    /// Await `fut` while still answering commands
    ///
    /// Used for backoff sleeps and connect attempts (Connecting, Stalled).
    /// Start is acknowledged as already underway; pause, resume and skip are
    /// rejected; stop and close cut the wait short.
    async fn interruptible<T, F>(&mut self, fut: F) -> Interrupted<T>
    where
        F: Future<Output = T>,
    {
        tokio::pin!(fut);
        let cancel = self.shared.cancel.clone();

        loop {
            let control = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Interrupted::Exit,
                control = self.control_rx.recv() => control,
                out = &mut fut => return Interrupted::Done(out),
            };
            let Some(Control { command, reply }) = control else {
                return Interrupted::Exit;
            };

            match command {
                Command::Start => {
                    let _ = reply.send(Ok(false));
                }
                Command::CloseIfIdle(_) => {
                    let _ = reply.send(Ok(false));
                }
                Command::Pause | Command::Resume | Command::Skip => {
                    let _ = reply.send(Err(Error::InvalidState(format!(
                        "cannot {:?} while {}",
                        command, self.state
                    ))));
                }
                Command::Stop => {
                    self.stop_playback().await;
                    let _ = reply.send(Ok(true));
                    return Interrupted::Aborted;
                }
                Command::Close => {
                    self.close_engine().await;
                    let _ = reply.send(Ok(true));
                    return Interrupted::Exit;
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // State
    // ---------------------------------------------------------------------

    async fn set_state(&mut self, new_state: EngineState) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }
        self.state = new_state;
        {
            let mut status = self.shared.status.write().await;
            status.state = new_state;
            status.idle_since = (new_state == EngineState::Idle).then(Instant::now);
            if !new_state.has_active_track() {
                status.current = None;
            }
        }

        info!(session = %self.shared.session_id, from = %old_state, to = %new_state, "State changed");
        self.shared.emit(VoiceEvent::StateChanged {
            session_id: self.shared.session_id.clone(),
            old_state,
            new_state,
            timestamp: now(),
        });
    }

    async fn clear_current(&mut self) {
        self.shared.status.write().await.current = None;
    }

    /// Idle with an empty queue for at least `limit`
    async fn idle_at_least(&mut self, limit: Duration) -> bool {
        if !self.shared.queue.is_empty().await {
            return false;
        }
        let since = self.shared.status.read().await.idle_since;
        since.map_or(false, |since| Instant::now().saturating_duration_since(since) >= limit)
    }
}

/// Read (if needed), pace and send one frame
///
/// Cancel-safe: a read frame is parked in `pending` before any other await,
/// and is only cleared after a successful send.
async fn frame_step(
    track: &mut Option<ActiveTrack>,
    transport: &mut Option<Box<dyn Transport>>,
    pacer: &mut Pacer,
    config: &EngineConfig,
) -> Step {
    let Some(active) = track.as_mut() else {
        return Step::NoTrack;
    };

    if active.pending.is_none() {
        match timeout(config.read_timeout(), active.source.next_frame()).await {
            Err(_) => return Step::DecodeStalled,
            Ok(Err(e)) => return Step::DecodeFailed(e),
            Ok(Ok(None)) => return Step::EndOfTrack,
            Ok(Ok(Some(frame))) => active.pending = Some(frame),
        }
    }

    pacer.tick().await;

    let Some(link) = transport.as_mut() else {
        return Step::SendFailed(Error::TransportDisconnected("no transport".to_string()));
    };
    let Some(frame) = active.pending.as_ref() else {
        return Step::NoTrack;
    };
    match timeout(config.send_timeout(), link.send(frame)).await {
        Err(_) => Step::SendFailed(Error::SendTimeout(config.send_timeout())),
        Ok(Err(e)) => Step::SendFailed(e),
        Ok(Ok(())) => {
            active.pending = None;
            Step::Sent
        }
    }
}

async fn connect_once(
    targets: Arc<dyn TargetProvider>,
    connector: Arc<dyn TransportConnector>,
    session_id: String,
    limit: Duration,
) -> Result<Box<dyn Transport>> {
    let target = targets.target_for(&session_id).await?;
    timeout(limit, connector.connect(&target))
        .await
        .map_err(|_| Error::ConnectFailed {
            attempts: 1,
            message: format!("{}: timed out after {:?}", target.endpoint, limit),
        })?
}
