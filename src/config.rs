use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aggregate::Thresholds;
use crate::gate::GatePolicy;
use crate::session::{EmptySnapshotPolicy, SessionMode, SessionSettings};

const DEFAULT_CHANNEL_URL: &str = "serial:///dev/ttyUSB0";
const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SETTLE_MS: u64 = 2_000;
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 416;
const DEFAULT_CONFIDENCE: f32 = 0.3;
const DEFAULT_OVERLAP: f32 = 0.3;

#[derive(Debug, Deserialize, Default)]
struct TallydConfigFile {
    channel: Option<ChannelConfigFile>,
    detector: Option<DetectorConfigFile>,
    session: Option<SessionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ChannelConfigFile {
    url: Option<String>,
    baud_rate: Option<u32>,
    read_timeout_ms: Option<u64>,
    settle_ms: Option<u64>,
    max_payload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    script_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    overlap_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    mode: Option<SessionMode>,
    gate: Option<GatePolicy>,
    empty_snapshot: Option<EmptySnapshotPolicy>,
    cycle_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TallydConfig {
    pub channel: ChannelSettings,
    pub detector: DetectorSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub url: String,
    /// Used for serial URLs without a `baud` query parameter.
    pub baud_rate: u32,
    /// Applies separately to the header and the body of each payload.
    pub read_timeout: Duration,
    /// Pause after opening a serial device before the first capture.
    pub settle: Duration,
    pub max_payload_bytes: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CHANNEL_URL.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub script_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub overlap_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            script_path: None,
            model_path: None,
            labels_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE,
            overlap_threshold: DEFAULT_OVERLAP,
        }
    }
}

impl DetectorSettings {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            confidence: self.confidence_threshold,
            overlap: self.overlap_threshold,
        }
    }
}

impl TallydConfig {
    /// Load from the JSON file named by `TALLY_CONFIG` (if set), then apply
    /// `TALLY_*` environment overrides and validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var("TALLY_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Like [`load`](Self::load) with an explicit file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => TallydConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TallydConfigFile) -> Self {
        let channel = file.channel.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let session = file.session.unwrap_or_default();

        let channel_defaults = ChannelSettings::default();
        let detector_defaults = DetectorSettings::default();

        let detector = DetectorSettings {
            backend: detector.backend.unwrap_or(detector_defaults.backend),
            script_path: detector.script_path,
            model_path: detector.model_path,
            labels_path: detector.labels_path,
            input_size: detector.input_size.unwrap_or(detector_defaults.input_size),
            confidence_threshold: detector
                .confidence_threshold
                .unwrap_or(detector_defaults.confidence_threshold),
            overlap_threshold: detector
                .overlap_threshold
                .unwrap_or(detector_defaults.overlap_threshold),
        };
        let channel = ChannelSettings {
            url: channel.url.unwrap_or(channel_defaults.url),
            baud_rate: channel.baud_rate.unwrap_or(channel_defaults.baud_rate),
            read_timeout: channel
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(channel_defaults.read_timeout),
            settle: channel
                .settle_ms
                .map(Duration::from_millis)
                .unwrap_or(channel_defaults.settle),
            max_payload_bytes: channel
                .max_payload_bytes
                .unwrap_or(channel_defaults.max_payload_bytes),
        };
        let session = SessionSettings {
            mode: session.mode.unwrap_or_default(),
            gate: session.gate.unwrap_or_default(),
            empty_snapshot: session.empty_snapshot.unwrap_or_default(),
            thresholds: detector.thresholds(),
            read_timeout: channel.read_timeout,
            cycle_interval: Duration::from_millis(session.cycle_interval_ms.unwrap_or(0)),
        };
        Self {
            channel,
            detector,
            session,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_nonempty("TALLY_CHANNEL") {
            self.channel.url = url;
        }
        if let Some(mode) = env_nonempty("TALLY_MODE") {
            self.session.mode = mode.parse()?;
        }
        if let Some(gate) = env_nonempty("TALLY_GATE") {
            self.session.gate = gate.parse()?;
        }
        if let Some(policy) = env_nonempty("TALLY_EMPTY_POLICY") {
            self.session.empty_snapshot = policy.parse()?;
        }
        if let Some(backend) = env_nonempty("TALLY_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(value) = env_nonempty("TALLY_CONFIDENCE") {
            self.detector.confidence_threshold = value
                .parse()
                .map_err(|_| anyhow!("TALLY_CONFIDENCE must be a number"))?;
        }
        if let Some(value) = env_nonempty("TALLY_OVERLAP") {
            self.detector.overlap_threshold = value
                .parse()
                .map_err(|_| anyhow!("TALLY_OVERLAP must be a number"))?;
        }
        if let Some(value) = env_nonempty("TALLY_READ_TIMEOUT_MS") {
            let millis: u64 = value.parse().map_err(|_| {
                anyhow!("TALLY_READ_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.channel.read_timeout = Duration::from_millis(millis);
        }
        if let Some(value) = env_nonempty("TALLY_CYCLE_INTERVAL_MS") {
            let millis: u64 = value.parse().map_err(|_| {
                anyhow!("TALLY_CYCLE_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.session.cycle_interval = Duration::from_millis(millis);
        }
        self.sync_session();
        Ok(())
    }

    /// Apply overrides that arrive after loading (e.g. command-line flags).
    pub fn override_channel(&mut self, url: String) {
        self.channel.url = url;
    }

    pub fn override_mode(&mut self, mode: SessionMode) {
        self.session.mode = mode;
    }

    /// Keep the session's copies of channel/detector values in step.
    fn sync_session(&mut self) {
        self.session.thresholds = self.detector.thresholds();
        self.session.read_timeout = self.channel.read_timeout;
    }

    fn validate(&mut self) -> Result<()> {
        for (name, value) in [
            ("confidence_threshold", self.detector.confidence_threshold),
            ("overlap_threshold", self.detector.overlap_threshold),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(anyhow!("{} must be in [0, 1), got {}", name, value));
            }
        }
        if self.channel.read_timeout.is_zero() {
            return Err(anyhow!("read timeout must be greater than zero"));
        }
        if self.channel.max_payload_bytes == 0 {
            return Err(anyhow!("max_payload_bytes must be greater than zero"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        Ok(())
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<TallydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
