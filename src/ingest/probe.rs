//! Stream metadata probing.
//!
//! Before decoding a remote stream the source needs its frame size. The probe
//! runs `ffprobe` with JSON output and takes the size from the first stream
//! that reports one. Probing is retried until it succeeds (see `handshake`).

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::process::{Command, Stdio};

use super::retry::{retry, RetryPolicy};

/// Size and codec of the stream that will be decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
    pub codec_name: Option<String>,
    pub format_name: Option<String>,
}

/// Source of stream metadata.
pub trait StreamProbe: Send {
    fn probe(&mut self, uri: &str) -> Result<StreamMetadata>;
}

impl<F> StreamProbe for F
where
    F: FnMut(&str) -> Result<StreamMetadata> + Send,
{
    fn probe(&mut self, uri: &str) -> Result<StreamMetadata> {
        self(uri)
    }
}

/// `ffprobe -v quiet -print_format json -show_format -show_streams <uri>`
#[derive(Clone, Debug)]
pub struct FfprobeProbe {
    pub binary: String,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self {
            binary: "ffprobe".to_string(),
        }
    }
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl StreamProbe for FfprobeProbe {
    fn probe(&mut self, uri: &str) -> Result<StreamMetadata> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                uri,
            ])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", self.binary))?;
        parse_probe_output(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    streams: Option<Vec<ProbeStream>>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
}

/// Parse ffprobe's JSON report.
///
/// A report without a `streams` list (ffprobe prints `{}` when the stream is
/// unreachable) or without any sized stream is an error.
pub fn parse_probe_output(raw: &[u8]) -> Result<StreamMetadata> {
    let report: ProbeReport =
        serde_json::from_slice(raw).context("probe output is not valid JSON")?;
    let streams = report
        .streams
        .ok_or_else(|| anyhow!("probe output has no streams"))?;
    let (stream, width, height) = streams
        .into_iter()
        .find_map(|s| match (s.width, s.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((s, w, h)),
            _ => None,
        })
        .ok_or_else(|| anyhow!("probe output has no stream with a frame size"))?;
    Ok(StreamMetadata {
        width,
        height,
        codec_name: stream.codec_name,
        format_name: report.format.and_then(|f| f.format_name),
    })
}

/// Probe `uri` until metadata is obtained or the policy gives up.
pub fn handshake<P: StreamProbe + ?Sized>(
    probe: &mut P,
    uri: &str,
    policy: RetryPolicy,
) -> Result<StreamMetadata> {
    let metadata = retry(
        policy,
        |_| probe.probe(uri),
        |attempt, err| {
            if policy.retries_after(attempt) {
                log::warn!(
                    "could not access stream {} (attempt {}): {:#}; trying again in {:?}",
                    uri,
                    attempt,
                    err,
                    policy.delay
                );
            } else {
                log::warn!(
                    "could not access stream {} (attempt {}): {:#}; giving up",
                    uri,
                    attempt,
                    err
                );
            }
        },
    )?;
    log::info!(
        "retrieved stream metadata for {}: {}x{} codec={}",
        uri,
        metadata.width,
        metadata.height,
        metadata.codec_name.as_deref().unwrap_or("unknown")
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const HLS_REPORT: &str = r#"{
        "streams": [
            {"index": 0, "codec_name": "aac", "codec_type": "audio"},
            {"index": 1, "codec_name": "h264", "codec_type": "video", "width": 432, "height": 240}
        ],
        "format": {"format_name": "hls", "nb_streams": 2}
    }"#;

    #[test]
    fn parses_first_sized_stream() -> Result<()> {
        let meta = parse_probe_output(HLS_REPORT.as_bytes())?;
        assert_eq!(meta.width, 432);
        assert_eq!(meta.height, 240);
        assert_eq!(meta.codec_name.as_deref(), Some("h264"));
        assert_eq!(meta.format_name.as_deref(), Some("hls"));
        Ok(())
    }

    #[test]
    fn empty_report_is_rejected() {
        let err = parse_probe_output(b"{}").unwrap_err();
        assert!(err.to_string().contains("no streams"));
    }

    #[test]
    fn report_without_sized_stream_is_rejected() {
        let raw = br#"{"streams": [{"codec_name": "aac"}]}"#;
        assert!(parse_probe_output(raw).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_probe_output(b"not json").is_err());
    }

    #[test]
    fn handshake_retries_until_metadata_arrives() -> Result<()> {
        let mut calls = 0;
        let mut probe = |_: &str| {
            calls += 1;
            if calls < 3 {
                parse_probe_output(b"{}")
            } else {
                parse_probe_output(HLS_REPORT.as_bytes())
            }
        };
        let meta = handshake(
            &mut probe,
            "http://example.invalid/live.m3u8",
            RetryPolicy::bounded(5, Duration::ZERO),
        )?;
        assert_eq!((meta.width, meta.height), (432, 240));
        assert_eq!(calls, 3);
        Ok(())
    }

    #[test]
    fn handshake_respects_attempt_bound() {
        let mut probe = |_: &str| parse_probe_output(b"{}");
        let result = handshake(
            &mut probe,
            "http://example.invalid/live.m3u8",
            RetryPolicy::bounded(2, Duration::ZERO),
        );
        assert!(result.is_err());
    }
}
