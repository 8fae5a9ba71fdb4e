use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::ingest::{RetryPolicy, StreamConfig, WebcamConfig};
use crate::visualize::FormatOptions;

const DEFAULT_SOURCE_URI: &str = "stub://camera";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_PROBE_RETRY_MS: u64 = 5_000;
const DEFAULT_FFPROBE_BIN: &str = "ffprobe";
const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";
const DEFAULT_MIN_SCORE: f32 = 0.5;
const DEFAULT_NMS_THRESH: f64 = 0.3;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    source: Option<SourceConfigFile>,
    probe: Option<ProbeConfigFile>,
    decoder: Option<DecoderConfigFile>,
    formatter: Option<FormatterConfigFile>,
    nms: Option<NmsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    kind: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeConfigFile {
    retry_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
    ffprobe_bin: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DecoderConfigFile {
    ffmpeg_bin: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FormatterConfigFile {
    max_boxes_to_draw: Option<usize>,
    min_score_thresh: Option<f32>,
    agnostic_mode: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct NmsConfigFile {
    enabled: Option<bool>,
    overlap_thresh: Option<f64>,
}

/// Where frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Local capture device (or `stub://`).
    Local,
    /// Remote stream decoded by ffmpeg.
    Stream,
}

impl SourceKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" | "webcam" => Ok(Self::Local),
            "stream" | "remote" => Ok(Self::Stream),
            other => Err(anyhow!(
                "unknown source kind '{}' (expected local or stream)",
                other
            )),
        }
    }

    /// Guess the kind from a URI: network schemes and playlists are streams.
    pub fn infer(uri: &str) -> Self {
        let lower = uri.trim().to_lowercase();
        let is_stream = ["http://", "https://", "rtsp://", "rtmp://", "udp://", "tcp://"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
            || lower.ends_with(".m3u8");
        if is_stream {
            Self::Stream
        } else {
            Self::Local
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source: SourceSettings,
    pub probe: ProbeSettings,
    pub ffmpeg_bin: String,
    pub formatter: FormatOptions,
    pub nms: NmsSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub uri: String,
    /// Explicit kind; inferred from `uri` when `None`.
    pub kind: Option<SourceKind>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub retry: RetryPolicy,
    pub ffprobe_bin: String,
}

#[derive(Debug, Clone, Copy)]
pub struct NmsSettings {
    pub enabled: bool,
    pub overlap_thresh: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(PipelineConfigFile::default())
    }
}

impl PipelineConfig {
    /// Load from `VISION_CONFIG` (JSON, optional) and apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VISION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let file_cfg = file_cfg.unwrap_or_default();
        let kind = file_cfg
            .source
            .as_ref()
            .and_then(|source| source.kind.as_deref())
            .map(SourceKind::parse)
            .transpose()?;
        let mut cfg = Self::from_file(file_cfg);
        cfg.source.kind = kind;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let source_file = file.source.unwrap_or_default();
        let probe_file = file.probe.unwrap_or_default();
        let formatter_file = file.formatter.unwrap_or_default();
        let nms_file = file.nms.unwrap_or_default();

        let source = SourceSettings {
            uri: source_file
                .uri
                .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            kind: None,
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
        };
        let probe = ProbeSettings {
            retry: RetryPolicy {
                delay: Duration::from_millis(
                    probe_file.retry_delay_ms.unwrap_or(DEFAULT_PROBE_RETRY_MS),
                ),
                max_attempts: probe_file.max_attempts,
            },
            ffprobe_bin: probe_file
                .ffprobe_bin
                .unwrap_or_else(|| DEFAULT_FFPROBE_BIN.to_string()),
        };
        let ffmpeg_bin = file
            .decoder
            .and_then(|decoder| decoder.ffmpeg_bin)
            .unwrap_or_else(|| DEFAULT_FFMPEG_BIN.to_string());
        let formatter = FormatOptions {
            max_boxes_to_draw: formatter_file.max_boxes_to_draw,
            min_score_thresh: formatter_file.min_score_thresh.unwrap_or(DEFAULT_MIN_SCORE),
            agnostic_mode: formatter_file.agnostic_mode.unwrap_or(false),
        };
        let nms = NmsSettings {
            enabled: nms_file.enabled.unwrap_or(false),
            overlap_thresh: nms_file.overlap_thresh.unwrap_or(DEFAULT_NMS_THRESH),
        };
        Self {
            source,
            probe,
            ffmpeg_bin,
            formatter,
            nms,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("VISION_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Ok(kind) = std::env::var("VISION_SOURCE_KIND") {
            if !kind.trim().is_empty() {
                self.source.kind = Some(SourceKind::parse(&kind)?);
            }
        }
        if let Some(width) = parse_env::<u32>("VISION_WIDTH")? {
            self.source.width = width;
        }
        if let Some(height) = parse_env::<u32>("VISION_HEIGHT")? {
            self.source.height = height;
        }
        if let Some(min_score) = parse_env::<f32>("VISION_MIN_SCORE")? {
            self.formatter.min_score_thresh = min_score;
        }
        if let Some(max_attempts) = parse_env::<u32>("VISION_PROBE_MAX_ATTEMPTS")? {
            self.probe.retry.max_attempts = Some(max_attempts);
        }
        if let Some(delay_ms) = parse_env::<u64>("VISION_PROBE_RETRY_MS")? {
            self.probe.retry.delay = Duration::from_millis(delay_ms);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("source uri must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "source size must be non-zero (got {}x{})",
                self.source.width,
                self.source.height
            ));
        }
        if !(0.0..=1.0).contains(&self.formatter.min_score_thresh) {
            return Err(anyhow!(
                "min_score_thresh must be within [0, 1] (got {})",
                self.formatter.min_score_thresh
            ));
        }
        if !(self.nms.overlap_thresh > 0.0 && self.nms.overlap_thresh <= 1.0) {
            return Err(anyhow!(
                "nms overlap_thresh must be within (0, 1] (got {})",
                self.nms.overlap_thresh
            ));
        }
        if self.probe.retry.max_attempts == Some(0) {
            return Err(anyhow!("probe max_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Effective source kind.
    pub fn source_kind(&self) -> SourceKind {
        self.source
            .kind
            .unwrap_or_else(|| SourceKind::infer(&self.source.uri))
    }

    pub fn webcam_config(&self) -> WebcamConfig {
        WebcamConfig {
            device: self.source.uri.clone(),
            width: self.source.width,
            height: self.source.height,
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            uri: self.source.uri.clone(),
            probe_retry: self.probe.retry,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
