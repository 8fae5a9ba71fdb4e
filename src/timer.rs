//! Throughput measurement.
//!
//! `FpsTimer` brackets a measurement window: `start()`, one `update()` per
//! processed frame, `stop()`, then `elapsed()` / `fps()`. It is meant for a
//! single caller and is not shared across threads.

use anyhow::{anyhow, Result};
use std::time::Instant;

#[derive(Clone, Debug, Default)]
pub struct FpsTimer {
    start: Option<Instant>,
    end: Option<Instant>,
    frames: u64,
}

impl FpsTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of the window.
    pub fn start(self) -> Self {
        self.start_at(Instant::now())
    }

    pub fn start_at(mut self, at: Instant) -> Self {
        self.start = Some(at);
        self
    }

    /// Record the end of the window.
    pub fn stop(&mut self) {
        self.stop_at(Instant::now());
    }

    pub fn stop_at(&mut self, at: Instant) {
        self.end = Some(at);
    }

    /// Count one processed frame.
    pub fn update(&mut self) {
        self.frames += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Seconds between `start()` and `stop()`.
    pub fn elapsed(&self) -> Result<f64> {
        let start = self
            .start
            .ok_or_else(|| anyhow!("timer was never started"))?;
        let end = self
            .end
            .ok_or_else(|| anyhow!("timer was not stopped"))?;
        let span = end
            .checked_duration_since(start)
            .ok_or_else(|| anyhow!("timer stopped before it started"))?;
        Ok(span.as_secs_f64())
    }

    /// Frames per second over the window.
    pub fn fps(&self) -> Result<f64> {
        let elapsed = self.elapsed()?;
        if elapsed == 0.0 {
            return Err(anyhow!("cannot compute fps over a zero-length window"));
        }
        Ok(self.frames as f64 / elapsed)
    }
}
