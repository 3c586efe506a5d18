//! yuyv-capture binary: stream frames from a V4L2 device.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use yuyv_capture::{Camera, CameraDevice, CameraError, CaptureConfig, Frame};

/// Capture YUYV frames from a V4L2 device and convert them to RGB.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Device node to open.
    #[arg(short, long, default_value = "/dev/video0")]
    device: PathBuf,

    /// Requested frame width.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Requested frame height.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Number of mapped buffers to request.
    #[arg(short, long, default_value_t = 4)]
    buffers: u32,

    /// Seconds to wait for each frame.
    #[arg(long, default_value_t = 20)]
    timeout_secs: u64,

    /// Stop after this many frames; runs until interrupted when omitted.
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// Write the last captured frame to this PNG file.
    #[arg(short, long)]
    snapshot: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> CaptureConfig {
        CaptureConfig::default()
            .with_device(&self.device)
            .with_resolution(self.width, self.height)
            .with_buffer_count(self.buffers)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        error!("{err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })?;

    let mut camera = Camera::open_v4l2(&args.config())?;
    camera.set_cancel_flag(Arc::clone(&stop));

    let caps = camera.device().capabilities();
    info!(
        card = %caps.card,
        driver = %caps.driver,
        width = camera.width(),
        height = camera.height(),
        stride = camera.format().stride,
        "streaming"
    );

    let mut captured = 0u64;
    let mut last: Option<Frame> = None;
    while args.frames.is_none_or(|limit| captured < limit) {
        match camera.acquire_frame() {
            Ok(frame) => {
                captured += 1;
                let meta = frame.metadata();
                info!(
                    sequence = meta.sequence,
                    bytes_used = meta.bytes_used,
                    timestamp = ?meta.timestamp,
                    "frame"
                );
                last = Some(frame);
            }
            Err(CameraError::Cancelled) => {
                info!("interrupted");
                break;
            }
            Err(err) if err.is_recoverable() => warn!(%err, "frame skipped"),
            Err(err) => return Err(err.into()),
        }
    }

    camera.close()?;
    info!(frames = captured, "done");

    if let (Some(path), Some(frame)) = (&args.snapshot, last) {
        save_png(path, frame)?;
        info!(path = %path.display(), "snapshot written");
    }
    Ok(())
}

fn save_png(path: &Path, frame: Frame) -> Result<(), Box<dyn Error>> {
    let (width, height) = (frame.width(), frame.height());
    let image = image::RgbImage::from_raw(width, height, frame.into_raw())
        .ok_or("frame does not match its dimensions")?;
    image.save(path)?;
    Ok(())
}
