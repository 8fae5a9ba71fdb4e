//! Remote stream frame source.
//!
//! `StreamGrabber` turns a segmented/remote stream (HLS, RTSP, ...) into
//! frames by delegating decoding to an external process:
//!
//! 1. Handshake: probe the stream for its frame size, retrying on a fixed
//!    delay until metadata arrives (see `probe::handshake`).
//! 2. Launch a decoder that writes raw `bgr24` frames, back to back, to a pipe.
//! 3. Each capture reads exactly `width * height * 3` bytes and shapes them
//!    into a `Frame`. A short read means the stream ended or stalled; it is
//!    fatal for the worker and not retried.
//!
//! The decoder is reached through `StreamDecoder`, so tests can substitute an
//! in-memory byte source for the ffmpeg process.

use anyhow::{anyhow, Context, Result};
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};

use super::capture::{FrameGrabber, FrameSource, GrabFailure};
use super::probe::{handshake, FfprobeProbe, StreamMetadata, StreamProbe};
use super::retry::RetryPolicy;
use crate::frame::{Frame, PixelFormat};

/// Configuration for a remote stream source.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Stream URI (e.g., "http://10.0.0.5:8080/hls/live.m3u8").
    pub uri: String,
    /// Handshake retry schedule. Unbounded by default.
    pub probe_retry: RetryPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            uri: "http://127.0.0.1:8080/hls/live.m3u8".to_string(),
            probe_retry: RetryPolicy::default(),
        }
    }
}

/// Launches the process that turns a stream into raw frames.
pub trait StreamDecoder: Send {
    fn open(&mut self, uri: &str, metadata: &StreamMetadata) -> Result<DecoderPipe>;
}

/// Readable end of a decoder, plus the process behind it (if any).
///
/// The process is killed and reaped when the pipe is dropped.
pub struct DecoderPipe {
    reader: Box<dyn Read + Send>,
    child: Option<Child>,
}

impl DecoderPipe {
    /// Pipe backed by an arbitrary reader, with no process to manage.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            child: None,
        }
    }

    /// Pipe reading a child's stdout. The child must have been spawned with
    /// `Stdio::piped()` stdout.
    pub fn from_child(mut child: Child) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("decoder process has no stdout pipe"))?;
        Ok(Self {
            reader: Box::new(stdout),
            child: Some(child),
        })
    }

    /// Fill `buf` completely. Returns an error naming how many bytes arrived
    /// when the pipe ends early.
    pub fn read_frame_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(anyhow::Error::new(err).context("read decoder pipe")),
            }
        }
        if filled < buf.len() {
            return Err(anyhow!(
                "decoder pipe ended after {} of {} frame bytes",
                filled,
                buf.len()
            ));
        }
        Ok(())
    }
}

impl Drop for DecoderPipe {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(err) = child.kill() {
                log::debug!("decoder process already exited: {}", err);
            }
            if let Err(err) = child.wait() {
                log::debug!("failed to reap decoder process: {}", err);
            }
        }
    }
}

/// `ffmpeg -i <uri> -loglevel quiet -an -f image2pipe -pix_fmt bgr24 -vcodec rawvideo -`
#[derive(Clone, Debug)]
pub struct FfmpegDecoder {
    pub binary: String,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }
}

impl FfmpegDecoder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args(uri: &str) -> [&str; 12] {
        [
            "-i",
            uri,
            "-loglevel",
            "quiet",
            "-an",
            "-f",
            "image2pipe",
            "-pix_fmt",
            "bgr24",
            "-vcodec",
            "rawvideo",
            "-",
        ]
    }
}

impl StreamDecoder for FfmpegDecoder {
    fn open(&mut self, uri: &str, metadata: &StreamMetadata) -> Result<DecoderPipe> {
        let child = Command::new(&self.binary)
            .args(Self::args(uri))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch {} for {}", self.binary, uri))?;
        log::info!(
            "StreamSource: decoding {} as {}x{} bgr24 (pid {})",
            uri,
            metadata.width,
            metadata.height,
            child.id()
        );
        DecoderPipe::from_child(child)
    }
}

/// Grabber reading fixed-size raw frames from a decoder pipe.
pub struct StreamGrabber {
    uri: String,
    metadata: StreamMetadata,
    pipe: DecoderPipe,
    frame_len: usize,
}

impl StreamGrabber {
    /// Run the handshake and launch the decoder.
    pub fn connect<P, D>(config: &StreamConfig, probe: &mut P, decoder: &mut D) -> Result<Self>
    where
        P: StreamProbe + ?Sized,
        D: StreamDecoder + ?Sized,
    {
        let metadata = handshake(probe, &config.uri, config.probe_retry)?;
        let frame_len = Frame::byte_len_for(metadata.width, metadata.height)?;
        let pipe = decoder.open(&config.uri, &metadata)?;
        Ok(Self {
            uri: config.uri.clone(),
            metadata,
            pipe,
            frame_len,
        })
    }
}

impl FrameGrabber for StreamGrabber {
    fn grab(&mut self) -> Result<Frame> {
        let mut buf = vec![0u8; self.frame_len];
        self.pipe
            .read_frame_bytes(&mut buf)
            .with_context(|| format!("stream {} ended or stalled", self.uri))?;
        Frame::from_raw(
            buf,
            self.metadata.width,
            self.metadata.height,
            PixelFormat::Bgr24,
        )
    }

    fn describe(&self) -> String {
        self.uri.clone()
    }

    fn on_failure(&self) -> GrabFailure {
        GrabFailure::Halt
    }
}

/// Remote stream source with the ffprobe/ffmpeg binaries found on `PATH`.
pub fn open_stream(config: &StreamConfig) -> Result<FrameSource<StreamGrabber>> {
    open_stream_with(
        config,
        &mut FfprobeProbe::default(),
        &mut FfmpegDecoder::default(),
    )
}

/// Remote stream source with explicit probe and decoder.
pub fn open_stream_with<P, D>(
    config: &StreamConfig,
    probe: &mut P,
    decoder: &mut D,
) -> Result<FrameSource<StreamGrabber>>
where
    P: StreamProbe + ?Sized,
    D: StreamDecoder + ?Sized,
{
    let grabber = StreamGrabber::connect(config, probe, decoder)?;
    FrameSource::new(grabber)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    struct CursorDecoder {
        bytes: Vec<u8>,
    }

    impl StreamDecoder for CursorDecoder {
        fn open(&mut self, _uri: &str, _metadata: &StreamMetadata) -> Result<DecoderPipe> {
            Ok(DecoderPipe::from_reader(Cursor::new(self.bytes.clone())))
        }
    }

    fn fixed_probe(width: u32, height: u32) -> impl FnMut(&str) -> Result<StreamMetadata> + Send {
        move |_: &str| {
            Ok(StreamMetadata {
                width,
                height,
                codec_name: Some("h264".to_string()),
                format_name: Some("hls".to_string()),
            })
        }
    }

    fn test_config() -> StreamConfig {
        StreamConfig {
            uri: "http://example.invalid/live.m3u8".to_string(),
            probe_retry: RetryPolicy::bounded(3, Duration::ZERO),
        }
    }

    #[test]
    fn ffmpeg_args_request_raw_bgr_without_audio() {
        let args = FfmpegDecoder::args("http://cam/live.m3u8");
        assert_eq!(args[1], "http://cam/live.m3u8");
        for pair in [
            ["-an", "-f"],
            ["-pix_fmt", "bgr24"],
            ["-vcodec", "rawvideo"],
            ["-loglevel", "quiet"],
        ] {
            assert!(args.windows(2).any(|w| w == pair), "missing {:?}", pair);
        }
        assert_eq!(args[args.len() - 1], "-");
    }

    #[test]
    fn grabs_fixed_size_frames_in_order() -> Result<()> {
        let frame_len = 2 * 3 * 3;
        let mut bytes = vec![1u8; frame_len];
        bytes.extend(vec![2u8; frame_len]);
        let mut decoder = CursorDecoder { bytes };

        let mut grabber = StreamGrabber::connect(&test_config(), &mut fixed_probe(2, 3), &mut decoder)?;
        let first = grabber.grab()?;
        let second = grabber.grab()?;
        assert_eq!((first.width, first.height), (2, 3));
        assert_eq!(first.format, PixelFormat::Bgr24);
        assert!(first.as_bytes().iter().all(|&b| b == 1));
        assert!(second.as_bytes().iter().all(|&b| b == 2));
        Ok(())
    }

    #[test]
    fn short_read_is_fatal() -> Result<()> {
        let mut decoder = CursorDecoder {
            bytes: vec![0u8; 10],
        };
        let mut grabber = StreamGrabber::connect(&test_config(), &mut fixed_probe(2, 3), &mut decoder)?;
        let err = grabber.grab().unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("10 of 18"), "{}", message);
        assert_eq!(grabber.on_failure(), GrabFailure::Halt);
        Ok(())
    }

    #[test]
    fn open_fails_when_first_frame_is_missing() {
        let mut decoder = CursorDecoder { bytes: Vec::new() };
        let result = open_stream_with(&test_config(), &mut fixed_probe(2, 3), &mut decoder);
        assert!(result.is_err());
    }

    #[test]
    fn unreachable_stream_gives_up_with_bounded_policy() {
        let mut probe = |_: &str| -> Result<StreamMetadata> { Err(anyhow!("connection refused")) };
        let mut decoder = CursorDecoder { bytes: Vec::new() };
        let result = StreamGrabber::connect(&test_config(), &mut probe, &mut decoder);
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn dropping_pipe_kills_and_reaps_decoder() -> Result<()> {
        let child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()?;
        let pid = child.id().to_string();
        let pipe = DecoderPipe::from_child(child)?;
        drop(pipe);

        // A reaped process no longer accepts signals.
        let alive = Command::new("kill")
            .args(["-0", pid.as_str()])
            .stderr(Stdio::null())
            .status()?
            .success();
        assert!(!alive, "decoder process {} survived its pipe", pid);
        Ok(())
    }
}
