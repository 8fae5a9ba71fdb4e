//! Vision feed helpers
//!
//! Building blocks for a video object-detection loop.
//!
//! # Architecture
//!
//! A caller starts a frame source, which captures on a background thread
//! into a shared slot. The caller repeatedly takes the latest frame (never
//! waiting on I/O), hands it to a detector, and turns the detector's output
//! into display primitives. A timer measures achieved throughput on the side.
//!
//! # Module Structure
//!
//! - `frame`: Frame container and the shared latest-frame slot
//! - `ingest`: Frame sources (local camera, remote stream via ffmpeg)
//! - `timer`: Frames-per-second measurement
//! - `visualize`: Detection formatting, colors, overlap suppression
//! - `detect`: Seam for the external detector
//! - `config`: Pipeline configuration (JSON file + env overrides)

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod timer;
pub mod visualize;

pub use config::{PipelineConfig, SourceKind};
pub use detect::{DetectorBackend, StubBackend};
pub use frame::{Frame, FrameSlot, PixelFormat};
pub use ingest::{
    open_stream, open_webcam, CaptureStats, FrameGrabber, FrameSource, GrabFailure, RetryPolicy,
    StreamConfig, StreamGrabber, WebcamConfig, WebcamGrabber,
};
pub use timer::FpsTimer;
pub use visualize::{
    draw_boxes_and_labels, non_max_suppression, DetectionBatch, DisplayPrimitives, FormatOptions,
    Rgb,
};
