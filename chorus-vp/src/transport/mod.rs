//! Voice transport abstraction
//!
//! The engine never touches sockets directly. It asks a [`TargetProvider`]
//! for the current [`SessionTarget`] (the gateway refreshes these on voice
//! server updates), hands it to a [`TransportConnector`] and pushes frames
//! through the resulting [`Transport`].

pub mod udp;

pub use udp::{UdpConnector, UdpKeepalive, UdpTransport};

use crate::audio::types::AudioFrame;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Where and how to reach a session's voice server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTarget {
    pub session_id: String,

    /// `host:port` of the voice server
    pub endpoint: String,

    /// Synchronization source identifier assigned by the gateway
    pub ssrc: u32,

    /// Voice credentials, sent with the connect handshake
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// RTP payload type of the negotiated codec
    pub payload_type: u8,
}

/// Live connection to one voice session
///
/// `send` must be cancel-safe: a cancelled call either sent the frame or
/// did not, and the next call may resend it.
#[async_trait]
pub trait Transport: Send {
    /// Push one frame; `Error::TransportDisconnected` if the link dropped
    async fn send(&mut self, frame: &AudioFrame) -> Result<()>;

    /// Handle for keepalive round trips that run beside `send`
    ///
    /// Checks through a closed transport fail with
    /// `Error::TransportDisconnected`.
    fn keepalive(&self) -> Arc<dyn LivenessCheck>;

    /// Release the connection. Idempotent.
    async fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Keepalive round trip against the voice server
#[async_trait]
pub trait LivenessCheck: Send + Sync {
    /// One round trip; `Error::TransportDisconnected` if it went unanswered
    async fn check(&self) -> Result<()>;
}

/// Establishes transports
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// One connection attempt; retries belong to the caller
    async fn connect(&self, target: &SessionTarget) -> Result<Box<dyn Transport>>;
}

/// Source of session targets, asked on every connect and reconnect
#[async_trait]
pub trait TargetProvider: Send + Sync {
    async fn target_for(&self, session_id: &str) -> Result<SessionTarget>;
}
