//! Live preview demo
//!
//! Drives the edgecam pipeline from a synthetic NV21 camera:
//! 1. A camera thread renders moving bars plus sensor noise at `--fps`
//! 2. Frames flow through the drop-oldest channel to the processing thread
//! 3. The display mode flips between raw and edge detection every `--toggle-secs`
//! 4. On exit the last presented frame is optionally saved as JPEG and the
//!    pipeline statistics are printed as JSON
//!
//! Usage: cargo run -p demos --bin live_preview -- --seconds 5 --snapshot last.jpg

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use edgecam_camera::{Frame, RgbaFrame, Submission};
use edgecam_pipeline::{PipelineConfig, PipelineController, ProcessingMode};
use edgecam_render::RecordingSurface;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use log::{debug, info, warn};
use rand::Rng;

const BAR_WIDTH: u32 = 32;
const JPEG_QUALITY: u8 = 50;

#[derive(Parser)]
#[command(about = "Synthetic camera preview through the edgecam pipeline")]
struct CliArgs {
    #[arg(long, default_value = "640")]
    width: u32,

    #[arg(long, default_value = "480")]
    height: u32,

    /// Target camera frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Stop after this many seconds (Ctrl+C stops earlier)
    #[arg(long, default_value = "10")]
    seconds: u64,

    /// Flip raw/edge mode this often; 0 disables toggling
    #[arg(long, default_value = "2")]
    toggle_secs: u64,

    /// Pipeline configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the last presented frame here as JPEG
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

/// Moving vertical bars with a little noise, neutral chroma.
fn synthetic_nv21(width: u32, height: u32, len: usize, tick: u64, rng: &mut impl Rng) -> Vec<u8> {
    let mut bytes = vec![128u8; len];
    let offset = tick.wrapping_mul(4) as u32;
    for y in 0..height {
        for x in 0..width {
            let base: i16 = if (x.wrapping_add(offset) / BAR_WIDTH) % 2 == 0 { 60 } else { 200 };
            let noisy = base + rng.gen_range(-6..=6);
            bytes[y as usize * width as usize + x as usize] = noisy.clamp(0, 255) as u8;
        }
    }
    bytes
}

fn save_snapshot(frame: RgbaFrame, path: &Path) -> Result<()> {
    let (w, h) = (frame.width(), frame.height());
    let rgb = DynamicImage::ImageRgba8(frame.into_image()).to_rgb8();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY)
        .encode_image(&rgb)
        .context("encoding snapshot")?;
    info!("saved {w}x{h} snapshot to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = CliArgs::parse();
    anyhow::ensure!(args.fps > 0, "--fps must be positive");
    let frame_len = Frame::expected_len(args.width, args.height)
        .with_context(|| format!("{}x{} is too large for one frame", args.width, args.height))?;

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    // only the last frame is needed for the snapshot
    let (surface, probe) = RecordingSurface::with_history(0);
    let pipeline = Arc::new(PipelineController::with_canny(config, Box::new(surface))?);
    debug!("pipeline config: {}", serde_json::to_string(pipeline.config())?);
    pipeline.resize_surface(args.width, args.height);
    pipeline.initialize()?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }

    // camera thread
    let camera = {
        let pipeline = pipeline.clone();
        let stop = stop.clone();
        let (width, height) = (args.width, args.height);
        let interval = Duration::from_secs(1) / args.fps;
        thread::Builder::new().name("synthetic-camera".into()).spawn(move || {
            let mut rng = rand::thread_rng();
            let mut tick = 0u64;
            while !stop.load(Ordering::SeqCst) {
                let started = Instant::now();
                let bytes = synthetic_nv21(width, height, frame_len, tick, &mut rng);
                match pipeline.submit(bytes, width, height) {
                    Submission::Closed => break,
                    Submission::Dropped { sequence } => debug!("camera outran pipeline, lost {sequence}"),
                    Submission::Accepted => {}
                }
                tick += 1;
                thread::sleep(interval.saturating_sub(started.elapsed()));
            }
            tick
        })?
    };

    let run_for = Duration::from_secs(args.seconds);
    let toggle_every = Duration::from_secs(args.toggle_secs);
    let started = Instant::now();
    let mut last_toggle = started;
    while started.elapsed() < run_for && !stop.load(Ordering::SeqCst) {
        if !toggle_every.is_zero() && last_toggle.elapsed() >= toggle_every {
            let next = match pipeline.mode() {
                ProcessingMode::Raw => ProcessingMode::EdgeDetect,
                ProcessingMode::EdgeDetect => ProcessingMode::Raw,
            };
            pipeline.set_processing_mode(next.code());
            info!("mode -> {next:?}");
            last_toggle = Instant::now();
        }
        thread::sleep(Duration::from_millis(20));
    }

    stop.store(true, Ordering::SeqCst);
    let report = pipeline.destroy()?;
    let captured = camera
        .join()
        .map_err(|_| anyhow::anyhow!("camera thread panicked"))?;
    if !report.drained {
        warn!("pipeline did not drain in time");
    }
    info!(
        "camera produced {captured} frame(s), {} presented ({} reached the surface)",
        report.frames_presented,
        probe.present_count()
    );

    if let Some(path) = &args.snapshot {
        match probe.last_frame() {
            Some(frame) => save_snapshot(frame, path)?,
            None => warn!("no frame was presented; skipping snapshot"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&pipeline.stats())?);
    Ok(())
}
