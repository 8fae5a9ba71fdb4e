//! Local camera frame source.
//!
//! This module provides `WebcamGrabber` for capturing frames from a local
//! capture device at a requested size.
//!
//! - `stub://` devices produce synthetic frames (tests, demos).
//! - Device paths (e.g., /dev/video0) use V4L2 (feature: ingest-v4l2).
//!
//! A failed capture does not stop the source: the slot is cleared, `grabbed`
//! turns false and the next capture is attempted. Callers should check the
//! first `read()` before relying on the stream.

use anyhow::Result;
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;

use super::capture::{FrameGrabber, FrameSource, GrabFailure};
use crate::frame::{Frame, PixelFormat};

/// Configuration for a local capture device.
#[derive(Clone, Debug)]
pub struct WebcamConfig {
    /// Device path (e.g., "/dev/video0") or "stub://<name>".
    pub device: String,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Local capture device grabber.
pub struct WebcamGrabber {
    backend: WebcamBackend,
}

enum WebcamBackend {
    Synthetic(SyntheticWebcam),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceWebcam),
}

impl WebcamGrabber {
    /// Open the device and request the configured frame size.
    pub fn open(config: WebcamConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            anyhow::bail!(
                "webcam size must be non-zero (got {}x{})",
                config.width,
                config.height
            );
        }
        if config.device.starts_with("stub://") {
            log::info!("WebcamSource: opened {} (synthetic)", config.device);
            Ok(Self {
                backend: WebcamBackend::Synthetic(SyntheticWebcam::new(config)),
            })
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                Ok(Self {
                    backend: WebcamBackend::Device(DeviceWebcam::open(config)?),
                })
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                anyhow::bail!(
                    "local capture of {} requires the ingest-v4l2 feature",
                    config.device
                )
            }
        }
    }
}

impl FrameGrabber for WebcamGrabber {
    fn grab(&mut self) -> Result<Frame> {
        match &mut self.backend {
            WebcamBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(source) => source.next_frame(),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            WebcamBackend::Synthetic(source) => source.config.device.clone(),
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(source) => source.config.device.clone(),
        }
    }

    fn on_failure(&self) -> GrabFailure {
        GrabFailure::Skip
    }
}

/// Open a local capture device and perform the initial capture.
pub fn open_webcam(config: WebcamConfig) -> Result<FrameSource<WebcamGrabber>> {
    FrameSource::new(WebcamGrabber::open(config)?)
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

/// Pacing of synthetic captures, roughly 30 fps.
const SYNTHETIC_FRAME_INTERVAL: std::time::Duration = std::time::Duration::from_millis(33);

struct SyntheticWebcam {
    config: WebcamConfig,
    frame_count: u64,
    /// Changes every 50 frames to simulate something entering the scene.
    scene_state: u8,
}

impl SyntheticWebcam {
    fn new(config: WebcamConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.frame_count > 0 {
            std::thread::sleep(SYNTHETIC_FRAME_INTERVAL);
        }
        self.frame_count += 1;
        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let len = Frame::byte_len_for(self.config.width, self.config.height)?;
        let mut pixels = vec![0u8; len];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }

        Frame::from_raw(
            pixels,
            self.config.width,
            self.config.height,
            PixelFormat::Bgr24,
        )
    }
}

// ----------------------------------------------------------------------------
// V4L2 device source
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceWebcam {
    config: WebcamConfig,
    state: DeviceState,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceWebcam {
    fn open(config: WebcamConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 device {}", config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        // The driver may pick a different size; frames use whatever it grants.
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "WebcamSource: failed to set {}x{} on {}: {}",
                    config.width,
                    config.height,
                    config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "WebcamSource: opened {} ({}x{})",
            config.device,
            format.width,
            format.height
        );
        Ok(Self {
            config,
            state,
            active_width: format.width,
            active_height: format.height,
        })
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (buf, _meta) = self
            .state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;

        Frame::from_raw(
            buf.to_vec(),
            self.active_width,
            self.active_height,
            PixelFormat::Rgb24,
        )
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
