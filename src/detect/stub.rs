use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::frame::Frame;
use crate::visualize::DetectionBatch;

/// Class id reported by the stub for a changed frame.
pub const CHANGE_CLASS_ID: i64 = 1;

/// Stub backend for demos and tests.
///
/// Reports one full-frame box (normalized coordinates) whenever the frame
/// content differs from the previous call, and nothing otherwise.
#[derive(Default)]
pub struct StubBackend {
    last_hash: Option<[u8; 32]>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionBatch> {
        let current_hash: [u8; 32] = Sha256::digest(frame.as_bytes()).into();
        let changed = self.last_hash.is_some_and(|prev| prev != current_hash);
        self.last_hash = Some(current_hash);

        if changed {
            Ok(DetectionBatch::new(
                vec![[0.0, 0.0, 1.0, 1.0]],
                vec![CHANGE_CLASS_ID],
                Some(vec![0.85]),
            ))
        } else {
            Ok(DetectionBatch::new(Vec::new(), Vec::new(), Some(Vec::new())))
        }
    }
}
