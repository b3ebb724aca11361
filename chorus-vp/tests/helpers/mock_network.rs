//! In-memory voice network
//!
//! Failure counters are consumed one per operation: `fail_connects = 2`
//! makes the next two connect attempts fail. Set a counter to `u32::MAX`
//! for a permanently broken link. A failed heartbeat only fails that check;
//! the link itself stays usable.

use async_trait::async_trait;
use chorus_vp::audio::AudioFrame;
use chorus_vp::error::{Error, Result};
use chorus_vp::transport::{LivenessCheck, SessionTarget, Transport, TransportConnector};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// One frame accepted by a mock transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentFrame {
    /// Which connection carried it (1-based, in connect order)
    pub connection: u32,
    pub marker: u8,
    pub sequence: u64,
    pub at: Instant,
}

#[derive(Debug, Default)]
pub struct NetworkState {
    pub fail_connects: AtomicU32,
    pub fail_sends: AtomicU32,
    pub fail_heartbeats: AtomicU32,
    /// Round-trip time of every heartbeat
    pub heartbeat_delay_ms: AtomicU64,
    heartbeats: AtomicU32,
    connect_attempts: AtomicU32,
    connections: AtomicU32,
    closes: AtomicU32,
    sent: Mutex<Vec<SentFrame>>,
}

impl NetworkState {
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Successful connects
    pub fn connections(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Heartbeats answered
    pub fn heartbeats(&self) -> u32 {
        self.heartbeats.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap().clone()
    }

    /// `(marker, sequence)` of every frame sent, in send order
    pub fn sent_ids(&self) -> Vec<(u8, u64)> {
        self.sent().iter().map(|f| (f.marker, f.sequence)).collect()
    }

    pub fn sent_markers(&self) -> Vec<u8> {
        self.sent().iter().map(|f| f.marker).collect()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct MockConnector {
    net: Arc<NetworkState>,
}

impl MockConnector {
    pub fn new(net: Arc<NetworkState>) -> Self {
        Self { net }
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(&self, target: &SessionTarget) -> Result<Box<dyn Transport>> {
        self.net.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.net.fail_connects) {
            return Err(Error::ConnectFailed {
                attempts: 1,
                message: format!("{}: unreachable", target.endpoint),
            });
        }
        let id = self.net.connections.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MockTransport {
            id,
            net: Arc::clone(&self.net),
            connected: Arc::new(AtomicBool::new(true)),
        }))
    }
}

pub struct MockTransport {
    id: u32,
    net: Arc<NetworkState>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: &AudioFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::TransportDisconnected("closed".to_string()));
        }
        if take_one(&self.net.fail_sends) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(Error::TransportDisconnected("injected send failure".to_string()));
        }
        self.net.sent.lock().unwrap().push(SentFrame {
            connection: self.id,
            marker: frame.pcm.first().copied().unwrap_or_default(),
            sequence: frame.sequence,
            at: Instant::now(),
        });
        Ok(())
    }

    fn keepalive(&self) -> Arc<dyn LivenessCheck> {
        Arc::new(MockKeepalive {
            net: Arc::clone(&self.net),
            connected: Arc::clone(&self.connected),
        })
    }

    async fn close(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.net.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub struct MockKeepalive {
    net: Arc<NetworkState>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl LivenessCheck for MockKeepalive {
    async fn check(&self) -> Result<()> {
        let delay = self.net.heartbeat_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
        if !self.connected.load(Ordering::SeqCst) || take_one(&self.net.fail_heartbeats) {
            return Err(Error::TransportDisconnected("heartbeat lost".to_string()));
        }
        self.net.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
