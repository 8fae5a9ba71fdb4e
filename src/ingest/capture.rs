//! Background capture worker.
//!
//! `FrameSource` owns a `FrameGrabber` and, once started, moves it onto a
//! dedicated thread that captures in a loop and publishes every frame into a
//! `FrameSlot`. The caller only ever touches the slot, so `read()` returns
//! instantly regardless of the producer's frame rate.
//!
//! Stopping is advisory: `stop()` sets a flag that the worker checks before
//! each capture. A capture call that is already blocked runs to completion
//! before the worker exits.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::{Frame, FrameSlot};

/// Pause before the next capture after a skipped failure.
pub const SKIP_RETRY_DELAY: Duration = Duration::from_millis(50);

/// What the worker does after a failed capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrabFailure {
    /// Clear the slot, mark nothing grabbed, and try again.
    Skip,
    /// Keep the last frame and end the worker.
    Halt,
}

/// A blocking producer of frames.
///
/// Implementations are moved onto the worker thread by `FrameSource::start`,
/// after which nothing else may touch the underlying device or pipe.
pub trait FrameGrabber: Send + 'static {
    /// Block until the next frame is available.
    fn grab(&mut self) -> Result<Frame>;

    /// Human-readable source identifier for logs and stats.
    fn describe(&self) -> String;

    fn on_failure(&self) -> GrabFailure {
        GrabFailure::Halt
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub source: String,
    pub running: bool,
    pub last_error: Option<String>,
}

/// Frame source with a background update loop.
pub struct FrameSource<G: FrameGrabber> {
    grabber: Option<G>,
    description: String,
    slot: FrameSlot,
    stopped: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
    worker: Option<JoinHandle<()>>,
}

impl<G: FrameGrabber> FrameSource<G> {
    /// Wrap a grabber and perform one synchronous capture so the slot is
    /// populated before `start()`.
    ///
    /// With `GrabFailure::Halt` a failed first capture is an error; with
    /// `GrabFailure::Skip` the source is returned with an empty slot and the
    /// caller is expected to check `read()` before relying on it.
    pub fn new(mut grabber: G) -> Result<Self> {
        let description = grabber.describe();
        let slot = FrameSlot::new();
        let last_error = Arc::new(Mutex::new(None));

        match grabber.grab() {
            Ok(frame) => slot.publish(frame),
            Err(err) => match grabber.on_failure() {
                GrabFailure::Skip => {
                    log::warn!("{}: initial capture failed: {:#}", description, err);
                    set_error(&last_error, &err);
                }
                GrabFailure::Halt => {
                    return Err(err.context(format!("initial capture from {}", description)));
                }
            },
        }

        Ok(Self {
            grabber: Some(grabber),
            description,
            slot,
            stopped: Arc::new(AtomicBool::new(false)),
            last_error,
            worker: None,
        })
    }

    /// Launch the background update loop.
    pub fn start(mut self) -> Result<Self> {
        let grabber = self
            .grabber
            .take()
            .ok_or_else(|| anyhow!("frame source {} already started", self.description))?;
        let slot = self.slot.clone();
        let stopped = self.stopped.clone();
        let last_error = self.last_error.clone();

        let worker = std::thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || run_capture(grabber, slot, stopped, last_error))
            .map_err(|e| anyhow!("failed to spawn capture thread: {}", e))?;
        self.worker = Some(worker);

        log::info!("{}: capture started", self.description);
        Ok(self)
    }

    /// Most recently captured frame. Never blocks on capture.
    pub fn read(&self) -> Option<Arc<Frame>> {
        self.slot.latest()
    }

    /// Whether the last capture attempt produced a frame.
    pub fn grabbed(&self) -> bool {
        self.slot.grabbed()
    }

    /// Ask the worker to exit before its next capture. Does not wait.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether the worker thread is still alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Wait for the worker to exit. Call `stop()` first unless the source is
    /// expected to end on its own.
    pub fn join(mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("capture thread for {} panicked", self.description))?;
        }
        Ok(())
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.slot.published(),
            source: self.description.clone(),
            running: self.is_running(),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

impl<G: FrameGrabber> Drop for FrameSource<G> {
    fn drop(&mut self) {
        // Detach rather than join: the worker may be blocked in a capture call.
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn run_capture<G: FrameGrabber>(
    mut grabber: G,
    slot: FrameSlot,
    stopped: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
) {
    let description = grabber.describe();
    let policy = grabber.on_failure();
    // Only the first failure of a run is logged at warn.
    let mut failing = !slot.grabbed();
    loop {
        if stopped.load(Ordering::SeqCst) {
            log::info!("{}: capture stopped", description);
            return;
        }
        match grabber.grab() {
            Ok(frame) => {
                if failing {
                    log::info!("{}: capture recovered", description);
                    failing = false;
                }
                slot.publish(frame);
            }
            Err(err) => {
                set_error(&last_error, &err);
                match policy {
                    GrabFailure::Skip => {
                        if failing {
                            log::debug!("{}: capture still failing: {:#}", description, err);
                        } else {
                            log::warn!("{}: capture failed: {:#}", description, err);
                            failing = true;
                        }
                        slot.clear();
                        std::thread::sleep(SKIP_RETRY_DELAY);
                    }
                    GrabFailure::Halt => {
                        log::error!("{}: capture ended: {:#}", description, err);
                        return;
                    }
                }
            }
        }
    }
}

fn set_error(last_error: &Mutex<Option<String>>, err: &anyhow::Error) {
    *last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(format!("{:#}", err));
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::time::Instant;

    struct ChannelGrabber {
        rx: Receiver<Frame>,
        policy: GrabFailure,
    }

    impl FrameGrabber for ChannelGrabber {
        fn grab(&mut self) -> Result<Frame> {
            self.rx.recv().map_err(|_| anyhow!("channel closed"))
        }

        fn describe(&self) -> String {
            "channel://test".to_string()
        }

        fn on_failure(&self) -> GrabFailure {
            self.policy
        }
    }

    fn frame_filled(value: u8) -> Frame {
        Frame::from_raw(vec![value; 2 * 2 * 3], 2, 2, PixelFormat::Bgr24).unwrap()
    }

    fn channel_source(policy: GrabFailure) -> (Sender<Frame>, Result<FrameSource<ChannelGrabber>>) {
        let (tx, rx) = channel();
        tx.send(frame_filled(0)).unwrap();
        let source = FrameSource::new(ChannelGrabber { rx, policy });
        (tx, source)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn new_performs_initial_capture() {
        let (_tx, source) = channel_source(GrabFailure::Halt);
        let source = source.unwrap();
        let frame = source.read().expect("initial frame");
        assert!(frame.as_bytes().iter().all(|&b| b == 0));
        assert!(source.grabbed());
        assert!(!source.is_running());
    }

    #[test]
    fn initial_failure_with_halt_is_an_error() {
        let (tx, rx) = channel::<Frame>();
        drop(tx);
        let result = FrameSource::new(ChannelGrabber {
            rx,
            policy: GrabFailure::Halt,
        });
        assert!(result.is_err());
    }

    #[test]
    fn initial_failure_with_skip_leaves_slot_empty() {
        let (tx, rx) = channel::<Frame>();
        drop(tx);
        let source = FrameSource::new(ChannelGrabber {
            rx,
            policy: GrabFailure::Skip,
        })
        .unwrap();
        assert!(source.read().is_none());
        assert!(!source.grabbed());
        assert!(source.stats().last_error.is_some());
    }

    #[test]
    fn read_returns_latest_published_frame() -> Result<()> {
        let (tx, source) = channel_source(GrabFailure::Halt);
        let source = source?.start()?;

        for n in 1..=5u8 {
            tx.send(frame_filled(n)).unwrap();
            wait_until(|| source.stats().frames_captured == 1 + n as u64);
            let frame = source.read().expect("frame");
            assert!(frame.as_bytes().iter().all(|&b| b == n));
        }

        drop(tx);
        wait_until(|| !source.is_running());
        let stats = source.stats();
        assert_eq!(stats.frames_captured, 6);
        assert_eq!(stats.last_error.as_deref(), Some("channel closed"));
        // Halt keeps the last good frame readable.
        assert!(source.read().is_some());
        source.join()
    }

    #[test]
    fn start_without_grabber_is_rejected() {
        let source: FrameSource<ChannelGrabber> = FrameSource {
            grabber: None,
            description: "channel://test".to_string(),
            slot: FrameSlot::new(),
            stopped: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(Mutex::new(None)),
            worker: None,
        };
        let err = source.start().err().expect("second start must fail");
        assert!(err.to_string().contains("already started"));
    }

    #[test]
    fn stop_ends_worker_after_inflight_capture() -> Result<()> {
        let (tx, source) = channel_source(GrabFailure::Halt);
        let source = source?.start()?;
        source.stop();
        // The worker may already be blocked in recv(); one more frame lets it
        // observe the flag.
        let _ = tx.send(frame_filled(9));
        wait_until(|| !source.is_running());
        assert!(source.stats().last_error.is_none());
        source.join()
    }

    #[test]
    fn skip_policy_clears_slot_and_keeps_running() -> Result<()> {
        let (tx, source) = channel_source(GrabFailure::Skip);
        let source = source?.start()?;
        drop(tx);
        wait_until(|| !source.grabbed());
        assert!(source.read().is_none());
        assert!(source.is_running());
        source.stop();
        wait_until(|| !source.is_running());
        source.join()
    }

    struct BrokenDevice {
        attempts: Arc<AtomicUsize>,
    }

    impl FrameGrabber for BrokenDevice {
        fn grab(&mut self) -> Result<Frame> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("device unplugged"))
        }

        fn describe(&self) -> String {
            "broken://test".to_string()
        }

        fn on_failure(&self) -> GrabFailure {
            GrabFailure::Skip
        }
    }

    #[test]
    fn skip_policy_pauses_between_failed_captures() -> Result<()> {
        let attempts = Arc::new(AtomicUsize::new(0));
        let source = FrameSource::new(BrokenDevice {
            attempts: attempts.clone(),
        })?
        .start()?;

        std::thread::sleep(SKIP_RETRY_DELAY * 4);
        source.stop();
        wait_until(|| !source.is_running());

        // One initial capture plus roughly one attempt per pause.
        let made = attempts.load(Ordering::SeqCst);
        assert!(made >= 2, "worker never retried ({} attempts)", made);
        assert!(made <= 10, "worker retried without pausing ({} attempts)", made);
        assert_eq!(source.stats().last_error.as_deref(), Some("device unplugged"));
        source.join()
    }
}
