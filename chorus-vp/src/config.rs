//! Configuration management for chorus-vp
//!
//! Bootstrap configuration is a single TOML file located through
//! [`chorus_common::config::ConfigLocator`]:
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`CHORUS_CONFIG`)
//! 3. `~/.config/chorus/config.toml`
//! 4. `/etc/chorus/config.toml`
//! 5. Built-in defaults (code constants)
//!
//! Every timing value is exposed as a tunable; none of the retry, timeout or
//! idle constants are protocol.
//!
//! ```toml
//! port = 5750
//!
//! [logging]
//! level = "debug"
//!
//! [engine]
//! send_timeout_ms = 1000
//! [engine.reconnect_retry]
//! max_attempts = 5
//!
//! [[targets]]
//! session_id = "guild-1"
//! endpoint = "127.0.0.1:50000"
//! ssrc = 1234
//! ```

use crate::audio::types::FrameFormat;
use crate::error::{Error, Result};
use crate::playback::retry::{RetryOverrides, RetryPolicy};
use crate::transport::SessionTarget;
use chorus_common::config::{ConfigLocator, ConfigSource};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CHORUS_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// HTTP control API port
    pub port: u16,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Per-engine playback tuning
    pub engine: EngineConfig,

    /// External decoder process
    pub decoder: DecoderConfig,

    /// Session registry tuning
    pub manager: ManagerConfig,

    /// Voice targets known at startup (the gateway adds more at runtime)
    pub targets: Vec<TargetConfig>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: 5750,
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
            decoder: DecoderConfig::default(),
            manager: ManagerConfig::default(),
            targets: Vec::new(),
        }
    }
}

impl TomlConfig {
    /// Locate, parse and validate the configuration
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let locator = ConfigLocator::new("chorus", CONFIG_ENV_VAR);
        let (config, source): (TomlConfig, ConfigSource) = locator.load(cli_path)?;
        config.validate()?;
        Ok((config, source))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.decoder.validate()?;
        if self.manager.sweep_interval_ms == 0 {
            return Err(Error::Config("manager.sweep_interval_ms must be > 0".to_string()));
        }
        for target in &self.targets {
            if target.session_id.trim().is_empty() {
                return Err(Error::Config("targets[].session_id must not be empty".to_string()));
            }
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "chorus_vp=info,tower_http=info".to_string(),
        }
    }
}

/// Playback engine tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// PCM frame layout produced by the decoder
    pub format: FrameFormat,

    /// Longest wait for one frame before counting a decoder stall
    pub read_timeout_ms: u64,

    /// Consecutive stalls tolerated before the track is abandoned
    pub max_decode_stalls: u32,

    /// Longest wait for one frame send
    pub send_timeout_ms: u64,

    /// Bound on a single connect attempt
    pub connect_timeout_ms: u64,

    /// Liveness check period while connected
    pub heartbeat_interval_ms: u64,

    /// Longest wait for a liveness check to be answered
    pub heartbeat_timeout_ms: u64,

    /// Consecutive unanswered checks before the transport counts as lost
    pub max_missed_heartbeats: u32,

    /// Longest wait for a control call to be acknowledged by the engine
    pub control_timeout_ms: u64,

    /// Retry policy for the initial connect (Connecting state)
    #[serde(deserialize_with = "connect_retry_over_defaults")]
    pub connect_retry: RetryPolicy,

    /// Retry policy for reconnects after a stall (Stalled state)
    #[serde(deserialize_with = "reconnect_retry_over_defaults")]
    pub reconnect_retry: RetryPolicy,

    /// Optional cap on queued tracks
    pub max_queue_len: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            format: FrameFormat::default(),
            read_timeout_ms: 2_000,
            max_decode_stalls: 5,
            send_timeout_ms: 1_000,
            connect_timeout_ms: 5_000,
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 2_000,
            max_missed_heartbeats: 3,
            control_timeout_ms: 10_000,
            connect_retry: RetryPolicy {
                max_attempts: 4,
                base_delay_ms: 500,
                backoff_factor: 2.0,
                max_delay_ms: 8_000,
                jitter: true,
            },
            reconnect_retry: RetryPolicy {
                max_attempts: 5,
                base_delay_ms: 1_000,
                backoff_factor: 2.0,
                max_delay_ms: 15_000,
                jitter: true,
            },
            max_queue_len: None,
        }
    }
}

/// A partial `[engine.connect_retry]` table keeps the connect defaults
fn connect_retry_over_defaults<'de, D>(deserializer: D) -> std::result::Result<RetryPolicy, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = RetryOverrides::deserialize(deserializer)?;
    Ok(overrides.apply(EngineConfig::default().connect_retry))
}

fn reconnect_retry_over_defaults<'de, D>(deserializer: D) -> std::result::Result<RetryPolicy, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = RetryOverrides::deserialize(deserializer)?;
    Ok(overrides.apply(EngineConfig::default().reconnect_retry))
}

impl EngineConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.format.validate()?;
        for (name, value) in [
            ("read_timeout_ms", self.read_timeout_ms),
            ("send_timeout_ms", self.send_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("control_timeout_ms", self.control_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("engine.{} must be > 0", name)));
            }
        }
        if self.max_missed_heartbeats == 0 {
            return Err(Error::Config("engine.max_missed_heartbeats must be > 0".to_string()));
        }
        self.connect_retry.validate()?;
        self.reconnect_retry.validate()?;
        if self.max_queue_len == Some(0) {
            return Err(Error::Config("engine.max_queue_len must be > 0 when set".to_string()));
        }
        Ok(())
    }
}

/// External decoder process configuration
///
/// Argument templates accept `{source}`, `{sample_rate}` and `{channels}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Decoder executable for local files and stream URLs
    pub program: String,

    /// Arguments for `program`
    pub args: Vec<String>,

    /// Extra arguments placed before `args` for http(s) sources
    pub remote_args: Vec<String>,

    /// Front-end used for `ytsearch:` / `scsearch:` references (disabled if unset)
    pub search_program: Option<String>,

    /// Arguments for `search_program`
    pub search_args: Vec<String>,

    /// Whether remote sources keep their position across a transport stall
    pub remote_resumable: bool,

    /// Grace period for the decoder to exit after being killed
    pub kill_timeout_ms: u64,

    /// Decoder stderr lines kept for error reports
    pub stderr_lines: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        let owned = |args: &[&str]| args.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            program: "ffmpeg".to_string(),
            args: owned(&[
                "-hide_banner",
                "-loglevel",
                "error",
                "-nostdin",
                "-i",
                "{source}",
                "-vn",
                "-f",
                "s16le",
                "-ar",
                "{sample_rate}",
                "-ac",
                "{channels}",
                "pipe:1",
            ]),
            remote_args: owned(&[
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
            ]),
            search_program: None,
            search_args: Vec::new(),
            remote_resumable: false,
            kill_timeout_ms: 2_000,
            stderr_lines: 20,
        }
    }
}

impl DecoderConfig {
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::Config("decoder.program must not be empty".to_string()));
        }
        if !self.args.iter().any(|a| a.contains("{source}")) {
            return Err(Error::Config("decoder.args must reference {source}".to_string()));
        }
        Ok(())
    }
}

/// Session registry tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Idle time (Idle state, empty queue) after which a session is released
    pub idle_timeout_ms: u64,

    /// How often the idle sweep runs
    pub sweep_interval_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 300_000,
            sweep_interval_ms: 30_000,
        }
    }
}

impl ManagerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Voice target known at startup
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub session_id: String,
    pub endpoint: String,
    pub ssrc: u32,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_payload_type")]
    pub payload_type: u8,
}

fn default_payload_type() -> u8 {
    120
}

impl From<TargetConfig> for SessionTarget {
    fn from(t: TargetConfig) -> Self {
        SessionTarget {
            session_id: t.session_id,
            endpoint: t.endpoint,
            ssrc: t.ssrc,
            token: t.token,
            payload_type: t.payload_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_common::config::parse_toml;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        config.validate().unwrap();
        assert_eq!(config.engine.connect_retry.max_attempts, 4);
        assert_eq!(config.engine.format.bytes_per_frame(), 3840);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: TomlConfig = parse_toml(
            r#"
            port = 6000

            [engine]
            send_timeout_ms = 250

            [engine.reconnect_retry]
            max_attempts = 3

            [[targets]]
            session_id = "guild-1"
            endpoint = "127.0.0.1:50000"
            ssrc = 42
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.engine.send_timeout(), Duration::from_millis(250));
        assert_eq!(config.engine.reconnect_retry.max_attempts, 3);
        assert_eq!(config.engine.reconnect_retry.base_delay_ms, 1_000);
        assert_eq!(config.engine.read_timeout_ms, 2_000);
        assert_eq!(config.targets[0].payload_type, 120);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_retry_table_keeps_policy_defaults() {
        let config: TomlConfig = parse_toml(
            r#"
            [engine.connect_retry]
            jitter = false

            [engine.reconnect_retry]
            base_delay_ms = 250
            "#,
        )
        .unwrap();

        let connect = &config.engine.connect_retry;
        assert_eq!(connect.max_attempts, 4);
        assert_eq!(connect.base_delay_ms, 500);
        assert_eq!(connect.max_delay_ms, 8_000);
        assert!(!connect.jitter);

        let reconnect = &config.engine.reconnect_retry;
        assert_eq!(reconnect.max_attempts, 5);
        assert_eq!(reconnect.base_delay_ms, 250);
        assert_eq!(reconnect.max_delay_ms, 15_000);
        assert!(reconnect.jitter);
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = TomlConfig::default();
        config.engine.send_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_decoder_args_need_source_placeholder() {
        let mut config = DecoderConfig::default();
        config.args = vec!["-i".to_string(), "pipe:0".to_string()];
        assert!(config.validate().is_err());
    }
}
