//! External decoder process
//!
//! **Responsibilities:**
//! - Build the decoder command line for a [`SourceKind`]
//! - Spawn one process per track (stdin null, stdout piped, stderr captured)
//! - Slice stdout into fixed-size PCM frames, padding the final partial frame
//! - Map exit status to end-of-stream or `Error::Decode`
//! - Kill the process on close (and on drop, via `kill_on_drop`)

use crate::audio::source::{FrameSource, SourceFactory, SourceKind};
use crate::audio::types::{AudioFrame, FrameFormat};
use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use crate::playback::queue::TrackRequest;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Spawns [`ProcessSource`]s according to [`DecoderConfig`]
#[derive(Debug, Clone)]
pub struct ProcessSourceFactory {
    config: DecoderConfig,
    format: FrameFormat,
}

impl ProcessSourceFactory {
    pub fn new(config: DecoderConfig, format: FrameFormat) -> Self {
        Self { config, format }
    }

    /// Program and arguments for one source
    pub fn command_line(&self, kind: &SourceKind) -> Result<(String, Vec<String>)> {
        let input = kind.decoder_input();
        let (program, template): (&str, Vec<&String>) = match kind {
            SourceKind::LocalFile(_) => (self.config.program.as_str(), self.config.args.iter().collect()),
            SourceKind::Remote(_) => (
                self.config.program.as_str(),
                self.config.remote_args.iter().chain(self.config.args.iter()).collect(),
            ),
            SourceKind::Search { .. } => {
                let program = self.config.search_program.as_deref().ok_or_else(|| {
                    Error::SourceUnavailable("search sources are not enabled".to_string())
                })?;
                (program, self.config.search_args.iter().collect())
            }
        };

        let args = template
            .into_iter()
            .map(|arg| {
                arg.replace("{source}", &input)
                    .replace("{sample_rate}", &self.format.sample_rate.to_string())
                    .replace("{channels}", &self.format.channels.to_string())
            })
            .collect();
        Ok((program.to_string(), args))
    }

    /// Remote streams cannot be re-read after a stall unless configured so
    fn resumable(&self, kind: &SourceKind) -> bool {
        !kind.is_remote() || self.config.remote_resumable
    }
}

#[async_trait]
impl SourceFactory for ProcessSourceFactory {
    fn validate(&self, source_ref: &str) -> Result<SourceKind> {
        let kind = SourceKind::parse(source_ref)?;
        match &kind {
            SourceKind::LocalFile(path) if !path.is_file() => Err(Error::SourceUnavailable(format!(
                "file not found: {}",
                path.display()
            ))),
            SourceKind::Search { .. } if self.config.search_program.is_none() => Err(
                Error::SourceUnavailable("search sources are not enabled".to_string()),
            ),
            _ => Ok(kind),
        }
    }

    async fn open(&self, track: &TrackRequest) -> Result<Box<dyn FrameSource>> {
        let kind = self.validate(&track.source)?;
        let (program, args) = self.command_line(&kind)?;

        debug!(track = %track.id, program = %program, ?args, "Spawning decoder");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::SourceUnavailable(format!("failed to spawn decoder '{}': {}", program, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("decoder stdout not captured".to_string()))?;
        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_reader(stderr, Arc::clone(&stderr_tail), self.config.stderr_lines));

        Ok(Box::new(ProcessSource {
            label: track.source.clone(),
            child: Some(child),
            stdout: Some(stdout),
            stderr_tail,
            stderr_task,
            buf: vec![0; self.format.bytes_per_frame()],
            filled: 0,
            sequence: 0,
            eof: false,
            finished: false,
            resumable: self.resumable(&kind),
            kill_timeout: self.config.kill_timeout(),
        }))
    }
}

/// Keeps the last `capacity` stderr lines of the decoder
fn spawn_stderr_reader(
    stderr: ChildStderr,
    tail: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if capacity == 0 {
                continue;
            }
            if let Ok(mut tail) = tail.lock() {
                if tail.len() == capacity {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    })
}

/// One running decoder process
pub struct ProcessSource {
    label: String,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,

    /// Frame being assembled; survives cancelled reads
    buf: Vec<u8>,
    filled: usize,

    sequence: u64,
    eof: bool,
    finished: bool,
    resumable: bool,
    kill_timeout: Duration,
}

impl ProcessSource {
    fn take_frame(&mut self) -> AudioFrame {
        let frame_bytes = self.buf.len();
        let pcm = std::mem::replace(&mut self.buf, vec![0; frame_bytes]);
        self.filled = 0;
        let frame = AudioFrame::new(self.sequence, pcm);
        self.sequence += 1;
        frame
    }

    fn stderr_summary(&self) -> String {
        match self.stderr_tail.lock() {
            Ok(tail) if !tail.is_empty() => tail.iter().cloned().collect::<Vec<_>>().join(" | "),
            _ => "no decoder output".to_string(),
        }
    }

    /// Stdout hit EOF: check the exit status, then flush the partial frame
    async fn finish_stream(&mut self) -> Result<Option<AudioFrame>> {
        let status = match self.child.as_mut() {
            Some(child) => match timeout(self.kill_timeout, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    self.finished = true;
                    return Err(Error::Decode(format!("{}: wait failed: {}", self.label, e)));
                }
                Err(_) => {
                    warn!(source = %self.label, "Decoder closed stdout but did not exit");
                    None
                }
            },
            None => None,
        };

        if let Some(status) = status {
            self.child = None;
            if !status.success() {
                if let Some(task) = self.stderr_task.take() {
                    let _ = timeout(self.kill_timeout, task).await;
                }
                self.finished = true;
                let summary = self.stderr_summary();
                warn!(source = %self.label, %status, stderr = %summary, "Decoder failed");
                return Err(Error::Decode(format!("{} exited with {}: {}", self.label, status, summary)));
            }
        }

        self.finished = true;
        if self.filled > 0 {
            // Remainder of the buffer is already zeroed
            Ok(Some(self.take_frame()))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl FrameSource for ProcessSource {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        if self.finished {
            return Ok(None);
        }
        if self.eof {
            return self.finish_stream().await;
        }

        while self.filled < self.buf.len() {
            let Some(stdout) = self.stdout.as_mut() else {
                return Ok(None);
            };
            let n = stdout
                .read(&mut self.buf[self.filled..])
                .await
                .map_err(|e| Error::Decode(format!("{}: read failed: {}", self.label, e)))?;
            if n == 0 {
                self.eof = true;
                self.stdout = None;
                return self.finish_stream().await;
            }
            self.filled += n;
        }

        Ok(Some(self.take_frame()))
    }

    fn is_resumable(&self) -> bool {
        self.resumable
    }

    async fn close(&mut self) {
        self.finished = true;
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!(source = %self.label, error = %e, "Decoder already exited");
            }
            if timeout(self.kill_timeout, child.wait()).await.is_err() {
                warn!(source = %self.label, "Decoder did not exit within {:?}", self.kill_timeout);
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}
