//! Core audio data types
//!
//! Defines the PCM frame layout the decoder produces and the frames that flow
//! from a [`FrameSource`](super::source::FrameSource) to a transport.
//!
//! **Format:**
//! - Samples are signed 16-bit little endian
//! - Stereo interleaved: [L, R, L, R, ...]
//! - Every frame covers exactly `frame_duration_ms` of audio

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bytes per PCM sample (s16le)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Fixed PCM frame layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameFormat {
    /// Samples per second per channel
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,

    /// Duration of one frame in milliseconds
    pub frame_duration_ms: u32,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frame_duration_ms: 20,
        }
    }
}

impl FrameFormat {
    /// Samples per channel in one frame (960 for 48 kHz / 20 ms)
    pub fn samples_per_frame(&self) -> u32 {
        (self.sample_rate as u64 * self.frame_duration_ms as u64 / 1000) as u32
    }

    /// Byte length of one frame on the decoder pipe
    pub fn bytes_per_frame(&self) -> usize {
        self.samples_per_frame() as usize * self.channels as usize * BYTES_PER_SAMPLE
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("engine.format.sample_rate must be > 0".to_string()));
        }
        if self.channels == 0 {
            return Err(Error::Config("engine.format.channels must be > 0".to_string()));
        }
        if self.frame_duration_ms == 0 {
            return Err(Error::Config(
                "engine.format.frame_duration_ms must be > 0".to_string(),
            ));
        }
        if (self.sample_rate as u64 * self.frame_duration_ms as u64) % 1000 != 0 {
            return Err(Error::Config(format!(
                "engine.format: {} Hz does not divide into {} ms frames",
                self.sample_rate, self.frame_duration_ms
            )));
        }
        Ok(())
    }
}

/// One fixed-duration block of PCM audio
///
/// Produced by a frame source, consumed exactly once by the engine's pacing
/// loop and dropped after it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Position within the track, starting at 0, no gaps
    pub sequence: u64,

    /// Raw interleaved PCM bytes (always `bytes_per_frame` long)
    pub pcm: Vec<u8>,
}

impl AudioFrame {
    pub fn new(sequence: u64, pcm: Vec<u8>) -> Self {
        Self { sequence, pcm }
    }

    /// A frame of digital silence
    pub fn silence(sequence: u64, format: &FrameFormat) -> Self {
        Self {
            sequence,
            pcm: vec![0; format.bytes_per_frame()],
        }
    }

    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}
