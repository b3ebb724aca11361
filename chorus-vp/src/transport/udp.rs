//! UDP voice transport
//!
//! One datagram per frame: a 12-byte RTP header followed by the payload.
//! Liveness is checked with a keepalive datagram (`0xC9` + 32-bit nonce)
//! that the voice server echoes back unchanged. The connect handshake is the
//! same keepalive with the session token appended.
//!
//! Frames are only ever sent on the socket; the [`UdpKeepalive`] is its only
//! reader, so keepalives and frames share it without coordination.

use crate::audio::types::{AudioFrame, FrameFormat};
use crate::error::{Error, Result};
use crate::transport::{LivenessCheck, SessionTarget, Transport, TransportConnector};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info};

/// RTP version 2, no padding, no extension, no CSRC
const RTP_VERSION_BYTE: u8 = 0x80;

pub const RTP_HEADER_LEN: usize = 12;

/// First byte of keepalive datagrams
pub const KEEPALIVE_MARKER: u8 = 0xC9;

pub const KEEPALIVE_LEN: usize = 8;

/// Encode an RTP header
pub fn encode_rtp_header(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> [u8; RTP_HEADER_LEN] {
    let mut header = [0u8; RTP_HEADER_LEN];
    header[0] = RTP_VERSION_BYTE;
    header[1] = payload_type & 0x7f;
    header[2..4].copy_from_slice(&sequence.to_be_bytes());
    header[4..8].copy_from_slice(&timestamp.to_be_bytes());
    header[8..12].copy_from_slice(&ssrc.to_be_bytes());
    header
}

/// Encode a keepalive datagram
pub fn encode_keepalive(nonce: u32) -> [u8; KEEPALIVE_LEN] {
    let mut packet = [0u8; KEEPALIVE_LEN];
    packet[0] = KEEPALIVE_MARKER;
    packet[4..8].copy_from_slice(&nonce.to_be_bytes());
    packet
}

/// Send `packet` and wait for the identical datagram to come back
async fn echo_roundtrip(socket: &UdpSocket, packet: &[u8], wait: Duration) -> std::io::Result<()> {
    socket.send(packet).await?;
    let mut buf = vec![0u8; packet.len().max(1500)];
    timeout(wait, async {
        loop {
            let n = socket.recv(&mut buf).await?;
            if &buf[..n] == packet {
                return Ok::<(), std::io::Error>(());
            }
            // Anything else from the voice server is not ours to interpret
        }
    })
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "no keepalive echo"))?
}

/// Opens [`UdpTransport`]s
#[derive(Debug, Clone)]
pub struct UdpConnector {
    format: FrameFormat,
    connect_timeout: Duration,
    heartbeat_timeout: Duration,
}

impl UdpConnector {
    pub fn new(format: FrameFormat, connect_timeout: Duration, heartbeat_timeout: Duration) -> Self {
        Self {
            format,
            connect_timeout,
            heartbeat_timeout,
        }
    }

    async fn open(&self, target: &SessionTarget) -> std::io::Result<(UdpSocket, SocketAddr)> {
        let peer = lookup_host(target.endpoint.as_str())
            .await?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "endpoint did not resolve"))?;
        let bind: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(peer).await?;

        let mut handshake = encode_keepalive(rand::random()).to_vec();
        if let Some(token) = &target.token {
            handshake.extend_from_slice(token.as_bytes());
        }
        echo_roundtrip(&socket, &handshake, self.connect_timeout).await?;
        Ok((socket, peer))
    }
}

#[async_trait]
impl TransportConnector for UdpConnector {
    async fn connect(&self, target: &SessionTarget) -> Result<Box<dyn Transport>> {
        let (socket, peer) = timeout(self.connect_timeout, self.open(target))
            .await
            .map_err(|_| Error::ConnectFailed {
                attempts: 1,
                message: format!("{}: timed out after {:?}", target.endpoint, self.connect_timeout),
            })?
            .map_err(|e| Error::ConnectFailed {
                attempts: 1,
                message: format!("{}: {}", target.endpoint, e),
            })?;

        info!(session = %target.session_id, %peer, ssrc = target.ssrc, "Voice transport connected");

        let socket = Arc::new(socket);
        let keepalive = Arc::new(UdpKeepalive {
            socket: Arc::downgrade(&socket),
            peer,
            nonce: AtomicU32::new(rand::random()),
            wait: self.heartbeat_timeout,
        });

        Ok(Box::new(UdpTransport {
            socket: Some(socket),
            keepalive,
            peer,
            ssrc: target.ssrc,
            payload_type: target.payload_type,
            sequence: rand::random(),
            timestamp: rand::random(),
            samples_per_frame: self.format.samples_per_frame(),
        }))
    }
}

/// Connected UDP voice link
#[derive(Debug)]
pub struct UdpTransport {
    socket: Option<Arc<UdpSocket>>,
    keepalive: Arc<UdpKeepalive>,
    peer: SocketAddr,
    ssrc: u32,
    payload_type: u8,
    sequence: u16,
    timestamp: u32,
    samples_per_frame: u32,
}

impl UdpTransport {
    fn socket(&self) -> Result<&UdpSocket> {
        self.socket
            .as_deref()
            .ok_or_else(|| Error::TransportDisconnected(format!("{}: transport closed", self.peer)))
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, frame: &AudioFrame) -> Result<()> {
        let header = encode_rtp_header(self.payload_type, self.sequence, self.timestamp, self.ssrc);
        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + frame.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(&frame.pcm);

        self.socket()?
            .send(&packet)
            .await
            .map_err(|e| Error::TransportDisconnected(format!("{}: {}", self.peer, e)))?;

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.samples_per_frame);
        Ok(())
    }

    fn keepalive(&self) -> Arc<dyn LivenessCheck> {
        self.keepalive.clone()
    }

    async fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!(peer = %self.peer, "Voice transport closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

/// Keepalive sender for one [`UdpTransport`]
///
/// Holds the socket weakly: once the transport is closed, checks fail.
#[derive(Debug)]
pub struct UdpKeepalive {
    socket: Weak<UdpSocket>,
    peer: SocketAddr,
    nonce: AtomicU32,
    wait: Duration,
}

#[async_trait]
impl LivenessCheck for UdpKeepalive {
    async fn check(&self) -> Result<()> {
        let socket = self
            .socket
            .upgrade()
            .ok_or_else(|| Error::TransportDisconnected(format!("{}: transport closed", self.peer)))?;
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        echo_roundtrip(&socket, &encode_keepalive(nonce), self.wait)
            .await
            .map_err(|e| Error::TransportDisconnected(format!("{}: heartbeat failed: {}", self.peer, e)))
    }
}
