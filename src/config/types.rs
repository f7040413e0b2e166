use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identifies this agent to the endpoint. Defaults to the hostname.
    #[serde(default)]
    pub agent_id: Option<String>,
    pub sources: HashMap<String, SourceConfig>,
    #[serde(default)]
    pub buffer: BufferConfig,
    pub shipper: ShipperConfig,
    pub checkpoint: CheckpointConfig,
    pub dead_letter: DeadLetterConfig,
    #[serde(default)]
    pub status: Option<StatusConfig>,
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

impl Config {
    /// Agent identity used in outgoing request headers.
    pub fn resolved_agent_id(&self) -> String {
        self.agent_id.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.to_str().map(|s| s.to_string()))
                .unwrap_or_else(|| "logferry".to_string())
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// File path or glob pattern (file sources)
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Listen address (socket sources)
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub format: RecordFormat,
    #[serde(default)]
    pub timestamp: Option<TimestampConfig>,
    /// Regex with a named group 'level' used by the text format
    #[serde(default)]
    pub level_pattern: Option<String>,
    /// Static attributes merged into every event from this source
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub read: ReadConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    File,
    Socket,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampConfig {
    pub pattern: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadConfig {
    /// Where to start when no checkpoint exists
    #[serde(default = "default_read_start")]
    pub start: ReadStart,
    #[serde(default = "default_follow")]
    pub follow: bool,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            start: default_read_start(),
            follow: default_follow(),
            poll_interval: default_poll_interval(),
            max_line_bytes: default_max_line_bytes(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_read_start() -> ReadStart {
    ReadStart::Beginning
}

fn default_follow() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_max_line_bytes() -> usize {
    256 * 1024
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStart {
    Beginning,
    End,
}

/// Capped exponential backoff shared by readers and the shipper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(200)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Hard bound on in-memory events before spilling to disk
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Occupancy at which readers are paused
    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,
    /// Occupancy at which paused readers resume
    #[serde(default = "default_low_watermark")]
    pub low_watermark: usize,
    /// How long a push may wait on a full buffer before spilling
    #[serde(default = "default_spill_after", with = "humantime_serde")]
    pub spill_after: Duration,
    #[serde(default = "default_spill_chunk")]
    pub spill_chunk: usize,
    #[serde(default = "default_overflow_dir")]
    pub overflow_dir: PathBuf,
    /// Bound of the reader -> normalizer channel per source
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            high_watermark: default_high_watermark(),
            low_watermark: default_low_watermark(),
            spill_after: default_spill_after(),
            spill_chunk: default_spill_chunk(),
            overflow_dir: default_overflow_dir(),
            channel_capacity: default_channel_capacity(),
            flush_interval: default_flush_interval(),
            batch: BatchConfig::default(),
        }
    }
}

fn default_capacity() -> usize {
    10_000
}

fn default_high_watermark() -> usize {
    8_000
}

fn default_low_watermark() -> usize {
    4_000
}

fn default_spill_after() -> Duration {
    Duration::from_secs(5)
}

fn default_spill_chunk() -> usize {
    500
}

fn default_overflow_dir() -> PathBuf {
    PathBuf::from("~/.local/share/logferry/overflow")
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_max_events() -> usize {
    500
}

fn default_max_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipperConfig {
    pub endpoint: String,
    /// Bearer credential sent in the Authorization header
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_concurrency() -> usize {
    2
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Ndjson,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    pub listen: String,
}
