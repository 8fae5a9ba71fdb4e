//! vision_feed - threaded capture feeding a detector
//!
//! This binary:
//! 1. Opens the configured source (local camera or remote stream)
//! 2. Captures on a background thread into a latest-frame slot
//! 3. Runs the detector on each new frame
//! 4. Formats detections into rectangles, score labels and colors
//! 5. Optionally suppresses overlapping rectangles
//! 6. Reports achieved throughput

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vision_feed::ingest::{open_stream_with, FfmpegDecoder, FfprobeProbe};
use vision_feed::{
    draw_boxes_and_labels, open_webcam, DetectorBackend, FpsTimer, Frame, FrameGrabber,
    FrameSource, PipelineConfig, SourceKind, StubBackend,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Source URI or device; overrides VISION_SOURCE and the config file.
    #[arg(long)]
    source: Option<String>,
    /// Source kind: local or stream. Inferred from the URI when omitted.
    #[arg(long)]
    kind: Option<String>,
    /// Stop after this many processed frames.
    #[arg(long)]
    frames: Option<u64>,
    /// Stop after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,
    /// Run overlap suppression on the formatted rectangles.
    #[arg(long)]
    nms: bool,
    /// Print display primitives for every processed frame as JSON lines.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = PipelineConfig::load()?;
    if let Some(source) = &args.source {
        cfg.source.uri = source.clone();
    }
    if let Some(kind) = &args.kind {
        cfg.source.kind = Some(SourceKind::parse(kind)?);
    }
    if args.nms {
        cfg.nms.enabled = true;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || stop_handler.store(true, Ordering::SeqCst))
        .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    match cfg.source_kind() {
        SourceKind::Local => {
            let source = open_webcam(cfg.webcam_config())?;
            run(source, &cfg, &args, &stop)
        }
        SourceKind::Stream => {
            let mut probe = FfprobeProbe::new(cfg.probe.ffprobe_bin.clone());
            let mut decoder = FfmpegDecoder::new(cfg.ffmpeg_bin.clone());
            let source = open_stream_with(&cfg.stream_config(), &mut probe, &mut decoder)?;
            run(source, &cfg, &args, &stop)
        }
    }
}

fn run<G: FrameGrabber>(
    source: FrameSource<G>,
    cfg: &PipelineConfig,
    args: &Args,
    stop: &AtomicBool,
) -> Result<()> {
    if source.read().is_none() {
        log::warn!("first capture produced no frame; waiting for the source");
    }
    let source = source.start()?;

    let mut detector = StubBackend::new();
    detector.warm_up()?;
    log::info!("detector backend: {}", detector.name());

    let deadline = args
        .seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut timer = FpsTimer::new().start();
    let mut last_processed: Option<Arc<Frame>> = None;
    let mut last_health_log = Instant::now();

    loop {
        if stop.load(Ordering::SeqCst) {
            log::info!("stop requested");
            break;
        }
        if args.frames.is_some_and(|max| timer.frames() >= max) {
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        let frame = match source.read() {
            Some(frame) if !is_same_frame(&last_processed, &frame) => frame,
            _ => {
                if !source.is_running() {
                    let stats = source.stats();
                    log::warn!(
                        "capture from {} ended: {}",
                        stats.source,
                        stats.last_error.as_deref().unwrap_or("no error recorded")
                    );
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
        };

        let batch = detector.detect(&frame)?;
        let mut primitives = draw_boxes_and_labels(&batch, &cfg.formatter)?;
        if cfg.nms.enabled {
            let formatted = primitives.len();
            primitives =
                primitives.suppress_overlaps(frame.width, frame.height, cfg.nms.overlap_thresh);
            log::debug!("{} boxes, {} after suppression", formatted, primitives.len());
        }
        if args.json {
            println!("{}", serde_json::to_string(&primitives)?);
        } else if !primitives.is_empty() {
            log::debug!("{} display groups: {:?}", primitives.len(), primitives.scores);
        }

        timer.update();
        last_processed = Some(frame);

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = source.stats();
            log::info!(
                "source={} running={} captured={} processed={} frame_age={:?}",
                stats.source,
                stats.running,
                stats.frames_captured,
                timer.frames(),
                source.read().map(|f| f.age())
            );
            last_health_log = Instant::now();
        }
    }

    source.stop();
    timer.stop();
    match timer.fps() {
        Ok(fps) => {
            log::info!("elapsed time: {:.2}s", timer.elapsed()?);
            log::info!("approx. fps: {:.2}", fps);
        }
        Err(e) => log::info!("throughput unavailable: {}", e),
    }
    Ok(())
}

fn is_same_frame(last: &Option<Arc<Frame>>, frame: &Arc<Frame>) -> bool {
    last.as_ref().is_some_and(|last| Arc::ptr_eq(last, frame))
}

