//! Scripted frame sources
//!
//! Source references name scripts registered on the factory. A reference
//! without a script fails validation; a script with `fail_open` passes
//! validation but cannot be opened.

use async_trait::async_trait;
use chorus_vp::audio::{AudioFrame, FrameSource, SourceFactory, SourceKind};
use chorus_vp::error::{Error, Result};
use chorus_vp::playback::TrackRequest;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// What a source does after its last frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Clean end of stream
    Eof,
    /// Decoder error
    Fail,
    /// Never produces another frame
    Hang,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub marker: u8,
    pub frames: u64,
    pub end: ScriptEnd,
    pub resumable: bool,
    pub fail_open: bool,
}

impl Script {
    pub fn new(marker: u8, frames: u64) -> Self {
        Self {
            marker,
            frames,
            end: ScriptEnd::Eof,
            resumable: true,
            fail_open: false,
        }
    }

    pub fn ending(mut self, end: ScriptEnd) -> Self {
        self.end = end;
        self
    }

    pub fn non_resumable(mut self) -> Self {
        self.resumable = false;
        self
    }

    pub fn unopenable(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

/// Record of decoder lifecycles
#[derive(Debug, Default)]
pub struct SourceLog {
    opens: Mutex<Vec<String>>,
    closes: Mutex<Vec<String>>,
}

impl SourceLog {
    pub fn opens(&self) -> Vec<String> {
        self.opens.lock().unwrap().clone()
    }

    pub fn closes(&self) -> Vec<String> {
        self.closes.lock().unwrap().clone()
    }

    /// Sources opened but not yet closed
    pub fn open_now(&self) -> Vec<String> {
        let mut open = self.opens();
        for closed in self.closes() {
            if let Some(pos) = open.iter().position(|s| *s == closed) {
                open.remove(pos);
            }
        }
        open
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    scripts: Mutex<HashMap<String, Script>>,
    pub log: Arc<SourceLog>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: &str, script: Script) {
        self.scripts.lock().unwrap().insert(name.to_string(), script);
    }
}

#[async_trait]
impl SourceFactory for ScriptedFactory {
    fn validate(&self, source_ref: &str) -> Result<SourceKind> {
        if !self.scripts.lock().unwrap().contains_key(source_ref.trim()) {
            return Err(Error::SourceUnavailable(format!("no script for {}", source_ref)));
        }
        SourceKind::parse(source_ref)
    }

    async fn open(&self, track: &TrackRequest) -> Result<Box<dyn FrameSource>> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&track.source)
            .cloned()
            .ok_or_else(|| Error::SourceUnavailable(track.source.clone()))?;
        if script.fail_open {
            return Err(Error::SourceUnavailable(format!("{} cannot be opened", track.source)));
        }
        self.log.opens.lock().unwrap().push(track.source.clone());
        Ok(Box::new(ScriptedSource {
            name: track.source.clone(),
            script,
            next_sequence: 0,
            closed: false,
            log: Arc::clone(&self.log),
        }))
    }
}

pub struct ScriptedSource {
    name: String,
    script: Script,
    next_sequence: u64,
    closed: bool,
    log: Arc<SourceLog>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        if self.closed {
            return Ok(None);
        }
        if self.next_sequence >= self.script.frames {
            return match self.script.end {
                ScriptEnd::Eof => Ok(None),
                ScriptEnd::Fail => Err(Error::Decode(format!("{}: corrupt stream", self.name))),
                ScriptEnd::Hang => std::future::pending().await,
            };
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Ok(Some(AudioFrame::new(sequence, vec![self.script.marker, 0, 0, 0])))
    }

    fn is_resumable(&self) -> bool {
        self.script.resumable
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.closes.lock().unwrap().push(self.name.clone());
        }
    }
}
