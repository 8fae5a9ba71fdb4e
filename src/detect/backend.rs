use anyhow::Result;

use crate::frame::Frame;
use crate::visualize::DetectionBatch;

/// Detector backend trait.
///
/// The object-detection model lives outside this crate; a backend adapts it
/// to frames in and a `DetectionBatch` (boxes as `[ymin, xmin, ymax, xmax]`,
/// class ids, scores) out.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// The frame is a shared snapshot; implementations must not assume it
    /// stays the source's current frame after the call.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionBatch>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
