//! Transport liveness monitor
//!
//! One task per installed transport. It checks the link every `heartbeat_interval`
//! through the transport's [`LivenessCheck`] and reports the link lost after
//! `max_missed_heartbeats` consecutive failures. Frames keep flowing while a
//! check is in flight; the driver only hears about a lost link.

use crate::config::EngineConfig;
use crate::error::Error;
use crate::transport::LivenessCheck;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(super) struct LivenessMonitor {
    stop: CancellationToken,
    lost: mpsc::Receiver<Error>,
}

impl LivenessMonitor {
    /// Start checking; the task ends when the monitor is dropped or `parent`
    /// is cancelled
    pub(super) fn spawn(
        check: Arc<dyn LivenessCheck>,
        config: &EngineConfig,
        parent: &CancellationToken,
        session_id: String,
    ) -> Self {
        let stop = parent.child_token();
        let (tx, lost) = mpsc::channel(1);

        let period = config.heartbeat_interval();
        let limit = config.heartbeat_timeout();
        let max_missed = config.max_missed_heartbeats;
        let token = stop.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut missed = 0u32;

            loop {
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    outcome = async {
                        ticker.tick().await;
                        timeout(limit, check.check()).await
                    } => outcome,
                };

                let failure = match outcome {
                    Ok(Ok(())) => {
                        missed = 0;
                        continue;
                    }
                    Ok(Err(e)) => e,
                    Err(_) => Error::TransportDisconnected(format!(
                        "heartbeat unanswered within {:?}",
                        limit
                    )),
                };

                missed += 1;
                warn!(session = %session_id, missed, max_missed, error = %failure, "Heartbeat missed");
                if missed >= max_missed {
                    let _ = tx.send(failure).await;
                    break;
                }
            }
            debug!(session = %session_id, "Liveness monitor stopped");
        });

        Self { stop, lost }
    }

    /// Resolves once the link has been declared lost
    pub(super) async fn lost(&mut self) -> Option<Error> {
        self.lost.recv().await
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Waits on the monitor if there is one; pending forever otherwise
pub(super) async fn link_lost(monitor: &mut Option<LivenessMonitor>) -> Error {
    if let Some(monitor) = monitor.as_mut() {
        if let Some(e) = monitor.lost().await {
            return e;
        }
    }
    std::future::pending().await
}
