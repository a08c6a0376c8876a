//! Shutter CLI: run still images or a live capture through a filter chain.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shutter::capture::{Capture, CaptureBackend, CaptureRequest, PatternCapture};
use shutter::config::{FilterConfig, PipelineConfig};
use shutter::filter::CompletionInfo;
use shutter::sink::FrameSink;
use shutter::source::CameraSource;
use shutter::stats::FpsCounter;
use shutter::{GpuContext, ImageSource, Size};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where live frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Synthetic moving gradient
    Pattern,
    /// Webcam (requires the `camera` feature)
    Camera,
}

/// GPU frame graph for camera pipelines.
#[derive(Parser, Debug)]
#[command(name = "shutter")]
#[command(about = "Push images or camera frames through chained GPU compute filters")]
struct Cli {
    /// Use wgpu's no-op backend; nothing touches a GPU and output pixels are undefined
    #[arg(long, global = true)]
    headless: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter still images once and save the result
    Apply {
        /// Input image; repeat for multi-input kernels
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        /// Where to write the filtered image
        #[arg(short, long)]
        output: PathBuf,

        /// Rotate by this many degrees before the configured filters
        #[arg(long)]
        rotate: Option<f32>,

        /// YAML pipeline file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Stream frames from a capture source through the chain
    Live {
        #[arg(long, value_enum, default_value = "pattern")]
        source: SourceKind,

        /// Camera device index
        #[arg(short, long, default_value = "0")]
        device: u32,

        /// Frame width
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Frame height
        #[arg(long, default_value = "720")]
        height: u32,

        /// Target frames per second
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,

        /// Save the last output frame here on exit
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Rotate by this many degrees before the configured filters
        #[arg(long)]
        rotate: Option<f32>,

        /// YAML pipeline file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log the average capture-to-fan-out time
        #[arg(long)]
        benchmark: bool,
    },

    /// List capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Apply {
            input,
            output,
            rotate,
            config,
        } => run_apply(cli.headless, &input, &output, rotate, config.as_deref()),
        Command::Live {
            source,
            device,
            width,
            height,
            fps,
            frames,
            snapshot,
            rotate,
            config,
            benchmark,
        } => {
            let request = CaptureRequest {
                device,
                resolution: Size::new(width, height),
                fps,
            };
            let options = LiveOptions {
                frames,
                snapshot,
                benchmark,
            };
            run_live(cli.headless, source, request, rotate, config.as_deref(), options)
        }
        Command::Devices => list_devices(),
    }
}

fn context(headless: bool) -> Result<Arc<GpuContext>> {
    let ctx = if headless {
        GpuContext::headless()
    } else {
        GpuContext::new().context("failed to initialize the GPU")?
    };
    Ok(Arc::new(ctx))
}

fn pipeline(config: Option<&Path>, rotate: Option<f32>) -> Result<PipelineConfig> {
    let mut pipeline = match config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("failed to load {:?}", path))?,
        None => PipelineConfig::default(),
    };
    if let Some(angle) = rotate {
        pipeline.filters.insert(0, FilterConfig::Rotate { angle, fit_size: true });
    }
    Ok(pipeline)
}

fn run_apply(headless: bool, inputs: &[PathBuf], output: &Path, rotate: Option<f32>, config: Option<&Path>) -> Result<()> {
    let ctx = context(headless)?;
    let chain = pipeline(config, rotate)?.build_chain(&ctx)?;

    let images = inputs
        .iter()
        .map(|path| {
            image::open(path)
                .map(|image| image.to_rgba8())
                .with_context(|| format!("failed to read {:?}", path))
        })
        .collect::<Result<Vec<_>>>()?;

    let started = Instant::now();
    let filtered = chain.process_images(&ctx, &images)?;
    info!(
        "Filtered {} image(s) to {}x{} in {:?}",
        images.len(),
        filtered.width(),
        filtered.height(),
        started.elapsed()
    );
    filtered
        .save(output)
        .with_context(|| format!("failed to write {:?}", output))?;
    info!("Wrote {:?}", output);
    Ok(())
}

struct LiveOptions {
    frames: Option<u64>,
    snapshot: Option<PathBuf>,
    benchmark: bool,
}

#[cfg(feature = "camera")]
fn open_camera(request: &CaptureRequest) -> Result<Box<dyn CaptureBackend>> {
    Ok(Box::new(shutter::capture::NokhwaCapture::open(request)?))
}

#[cfg(not(feature = "camera"))]
fn open_camera(_request: &CaptureRequest) -> Result<Box<dyn CaptureBackend>> {
    anyhow::bail!("camera capture needs the `camera` feature")
}

fn run_live(
    headless: bool,
    source: SourceKind,
    request: CaptureRequest,
    rotate: Option<f32>,
    pipeline_path: Option<&Path>,
    options: LiveOptions,
) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let ctx = context(headless)?;
    let chain = pipeline(pipeline_path, rotate)?.build_chain(&ctx)?;

    let frame_duration = request.frame_interval();
    info!("Opening {:?} source {}...", source, request.device);
    let mut capture: Box<dyn CaptureBackend> = match source {
        SourceKind::Pattern => Box::new(PatternCapture::open(&request)?),
        SourceKind::Camera => open_camera(&request)?,
    };
    info!("Capturing at {}", capture.resolution());

    let camera = CameraSource::new(ctx.clone(), capture.facing());
    camera.set_benchmark(options.benchmark);
    camera.add_consumer(chain.head().clone());
    let sink = chain.tail().add_consumer(FrameSink::new());
    chain.tail().add_completed_handler(|info: &CompletionInfo| {
        if let Err(e) = &info.result {
            warn!("Frame at {:?} failed on the GPU: {}", info.sample_time, e);
        }
    });

    let mut fps = FpsCounter::new();
    let mut pushed = 0u64;
    while running.load(Ordering::SeqCst) && options.frames.map_or(true, |limit| pushed < limit) {
        let frame_start = Instant::now();

        let Capture { frame, sample_time } = capture.next_capture()?;
        if let Err(e) = camera.push_frame(frame, sample_time) {
            warn!("Dropped captured frame: {}", e);
        }
        ctx.poll();
        pushed += 1;

        if let Some(rate) = fps.tick() {
            info!("Live: {:.2} FPS", rate);
            if options.benchmark {
                info!("Average frame time: {:?}", camera.average_frame_duration());
            }
        }

        let elapsed = frame_start.elapsed();
        if elapsed < frame_duration {
            thread::sleep(frame_duration - elapsed);
        }
    }

    if let Err(e) = ctx.wait_idle() {
        warn!("GPU did not go idle: {}", e);
    }
    for filter in chain.filters() {
        debug!("Filter `{}`: {:?}", filter.name(), filter.stats());
    }
    info!("Stopped after {} frames, {} delivered", pushed, sink.frames_received());

    if let Some(path) = options.snapshot {
        sink.snapshot(&ctx)?
            .save(&path)
            .with_context(|| format!("failed to write {:?}", path))?;
        info!("Wrote snapshot {:?}", path);
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    #[cfg(feature = "camera")]
    let devices = shutter::capture::NokhwaCapture::devices()?;
    #[cfg(not(feature = "camera"))]
    let devices = PatternCapture::devices()?;

    println!("Available capture devices:");
    for device in devices {
        println!("  [{}] {}", device.index, device.name);
    }
    Ok(())
}
