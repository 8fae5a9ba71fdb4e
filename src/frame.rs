//! Frame containers.
//!
//! - `Frame`: dense 3-channel pixel buffer with a fixed shape.
//! - `FrameSlot`: single shared slot holding the most recent frame of a source.
//!
//! A capture worker is the only writer of a slot; readers take snapshots.
//! Publishing swaps the slot's `Arc<Frame>`, so a reader holding an older
//! snapshot keeps a complete frame while the slot moves on.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Bytes per pixel for every supported format.
pub const CHANNELS: usize = 3;

/// Channel order of a frame's pixel data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Blue, green, red (ffmpeg `bgr24`).
    Bgr24,
    /// Red, green, blue (V4L2 `RGB3`).
    Rgb24,
}

/// Decoded image buffer of `width * height * 3` bytes, row-major.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    captured_at: Instant,
}

impl Frame {
    /// Shape raw bytes into a frame. Fails when the byte count does not match
    /// the requested dimensions.
    pub fn from_raw(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = Self::byte_len_for(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "cannot reshape {} bytes into a {}x{}x{} frame ({} bytes expected)",
                data.len(),
                height,
                width,
                CHANNELS,
                expected
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            captured_at: Instant::now(),
        })
    }

    /// Number of bytes in a frame of the given dimensions.
    pub fn byte_len_for(width: u32, height: u32) -> Result<usize> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at column `x`, row `y`, in the frame's channel order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let px = self.data.get(idx..idx + CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }

    /// Time since the frame was shaped.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

// ----------------------------------------------------------------------------
// FrameSlot: latest-frame handoff between a worker and its readers
// ----------------------------------------------------------------------------

/// Shared slot holding the latest frame plus the "grabbed" flag.
///
/// Cloning a `FrameSlot` yields another handle to the same slot. Writes always
/// overwrite; reads never wait on capture and only hold the lock for a pointer
/// clone.
#[derive(Clone, Debug, Default)]
pub struct FrameSlot {
    inner: Arc<SlotInner>,
}

#[derive(Debug, Default)]
struct SlotInner {
    latest: Mutex<Option<Arc<Frame>>>,
    grabbed: AtomicBool,
    published: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        *self.lock() = Some(frame);
        self.inner.grabbed.store(true, Ordering::Release);
        self.inner.published.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop the stored frame after a failed capture.
    pub fn clear(&self) {
        *self.lock() = None;
        self.inner.grabbed.store(false, Ordering::Release);
    }

    /// Most recent frame, or `None` if nothing has been captured.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.lock().clone()
    }

    /// Whether the last capture attempt produced a frame.
    pub fn grabbed(&self) -> bool {
        self.inner.grabbed.load(Ordering::Acquire)
    }

    /// Number of frames published since the slot was created.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Frame>>> {
        // A writer cannot leave the slot half-updated, so a poisoned lock is
        // still safe to read.
        self.inner
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_filled(value: u8) -> Frame {
        Frame::from_raw(vec![value; 4 * 2 * 3], 4, 2, PixelFormat::Bgr24).unwrap()
    }

    #[test]
    fn from_raw_rejects_short_buffers() {
        let err = Frame::from_raw(vec![0u8; 10], 4, 2, PixelFormat::Bgr24).unwrap_err();
        assert!(err.to_string().contains("cannot reshape 10 bytes"));
    }

    #[test]
    fn pixel_reads_row_major_triplets() {
        let mut data = vec![0u8; 4 * 2 * 3];
        // (x=1, y=1) -> index (1*4 + 1) * 3 = 15
        data[15..18].copy_from_slice(&[1, 2, 3]);
        let frame = Frame::from_raw(data, 4, 2, PixelFormat::Rgb24).unwrap();
        assert_eq!(frame.pixel(1, 1), Some([1, 2, 3]));
        assert_eq!(frame.pixel(4, 0), None);
    }

    #[test]
    fn slot_starts_empty() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
        assert!(!slot.grabbed());
        assert_eq!(slot.published(), 0);
    }

    #[test]
    fn slot_overwrites_and_keeps_old_snapshots_intact() {
        let slot = FrameSlot::new();
        slot.publish(frame_filled(1));
        let first = slot.latest().unwrap();

        slot.publish(frame_filled(2));
        let second = slot.latest().unwrap();

        assert!(first.as_bytes().iter().all(|&b| b == 1));
        assert!(second.as_bytes().iter().all(|&b| b == 2));
        assert_eq!(slot.published(), 2);
        assert!(slot.grabbed());
    }

    #[test]
    fn slot_clear_resets_grabbed() {
        let slot = FrameSlot::new();
        slot.publish(frame_filled(7));
        slot.clear();
        assert!(slot.latest().is_none());
        assert!(!slot.grabbed());
        assert_eq!(slot.published(), 1);
    }
}
