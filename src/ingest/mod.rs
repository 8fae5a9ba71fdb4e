//! Frame ingestion sources.
//!
//! This module provides sources that keep a shared slot filled with the most
//! recent frame:
//! - Local capture devices (`webcam`; V4L2 behind feature: ingest-v4l2)
//! - Remote streams decoded by an external ffmpeg process (`stream`)
//! - Synthetic `stub://` devices (testing)
//!
//! Every source is a `FrameGrabber` driven by `FrameSource`, which runs the
//! capture loop on its own thread. Readers never block on capture and always
//! see the latest complete frame; frames in between may be skipped.

pub mod capture;
pub mod probe;
pub mod retry;
pub mod stream;
pub mod webcam;

pub use capture::{CaptureStats, FrameGrabber, FrameSource, GrabFailure};
pub use probe::{handshake, FfprobeProbe, StreamMetadata, StreamProbe};
pub use retry::{retry, RetryPolicy};
pub use stream::{
    open_stream, open_stream_with, DecoderPipe, FfmpegDecoder, StreamConfig, StreamDecoder,
    StreamGrabber,
};
pub use webcam::{open_webcam, WebcamConfig, WebcamGrabber};
