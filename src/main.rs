use anyhow::{anyhow, bail, Context, Result};
use callfx::capture::{CaptureSource, StillImageSource};
use callfx::filters::{FilterChain, StyleEffect};
use callfx::output::{FrameConsumer, ImageDirOutput};
use callfx::pipeline::{Pipeline, PipelineConfig};
use callfx::{BackgroundImage, BlendPolicy, Rotation, Segmenter};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Clockwise rotation of captured frames, in degrees
    #[arg(long, default_value_t = 0)]
    rotation: i32,

    /// Target frames per second
    #[arg(long, default_value_t = 24.0)]
    fps: f64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Replay a still image instead of opening the webcam
    #[arg(long)]
    image: Option<PathBuf>,

    /// Stop after this many captured frames (0 runs until interrupted)
    #[arg(long, default_value_t = 0)]
    frames: u64,

    /// Write PNG frames to this directory instead of the loopback device
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// With --output-dir, keep every n-th frame
    #[arg(long, default_value_t = 1)]
    every: u64,

    /// Path to segmentation model (ONNX file)
    /// Backgrounds need a model; without one frames are only filtered
    #[arg(long)]
    model: Option<PathBuf>,

    /// Background image to place behind the person
    #[arg(long)]
    background: Option<PathBuf>,

    /// Mask probability at or above which a pixel counts as the person
    #[arg(long, default_value_t = 0.7)]
    confidence: f64,

    /// Blend by mask probability instead of a hard cut
    #[arg(long)]
    soft_alpha: bool,

    /// Style effect: normal, classic, vintage, cinema, popart, hdr
    #[arg(long)]
    style: Option<String>,

    /// Style strength, 0 to 1
    #[arg(long)]
    style_intensity: Option<f32>,

    #[arg(long)]
    contrast: Option<f32>,

    #[arg(long)]
    brightness: Option<f32>,

    #[arg(long)]
    saturation: Option<f32>,

    /// Gaussian blur radius in pixels
    #[arg(long)]
    blur: Option<f32>,

    #[arg(long)]
    denoise: Option<f32>,

    /// Skin smoothing, 0 to 1
    #[arg(long)]
    smooth: Option<f32>,

    #[arg(long)]
    whiteness: Option<f32>,
}

impl Args {
    /// Filter settings given on the command line, as (stage, parameter, value)
    fn filter_settings(&self) -> Result<Vec<(&'static str, &'static str, f32)>> {
        let mut settings = Vec::new();
        let mut push = |stage: &'static str, key: &'static str, value: Option<f32>| {
            if let Some(value) = value {
                settings.push((stage, key, value));
            }
        };
        push("color", "contrast", self.contrast);
        push("color", "brightness", self.brightness);
        push("color", "saturation", self.saturation);
        push("color", "blur_radius", self.blur);
        push("color", "noise_reduction", self.denoise);
        push("beauty", "smoothing", self.smooth);
        push("beauty", "whiteness", self.whiteness);
        push("style", "intensity", self.style_intensity);

        if let Some(name) = &self.style {
            let effect = StyleEffect::from_name(name).ok_or_else(|| anyhow!("Unknown style '{}'", name))?;
            settings.push(("style", "effect", effect.index()));
        }
        Ok(settings)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("callfx starting");
    tracing::info!("Target FPS: {}", args.fps);

    let rotation =
        Rotation::from_degrees(args.rotation).ok_or_else(|| anyhow!("Rotation must be 0, 90, 180 or 270"))?;

    let mut source = open_source(&args, rotation)?;
    let (width, height) = source.resolution();
    tracing::info!("Capture: {}x{}", width, height);

    let output = open_output(&args)?;

    let mut filters = FilterChain::standard();
    for (stage, key, value) in args.filter_settings()? {
        filters
            .set_parameter(stage, key, value)
            .with_context(|| format!("Invalid --{} value", key))?;
    }

    let config = PipelineConfig {
        frame_rate: args.fps,
        confidence_threshold: args.confidence,
        blend_policy: if args.soft_alpha {
            BlendPolicy::SoftAlpha
        } else {
            BlendPolicy::HardThreshold
        },
        ..PipelineConfig::default()
    };

    let mut builder = Pipeline::builder(output).config(config).filters(filters);
    if let Some(segmenter) = load_segmenter(&args)? {
        builder = builder.segmenter(segmenter);
    }
    if let Some(path) = &args.background {
        let image = image::open(path)
            .with_context(|| format!("Failed to open background {}", path.display()))?
            .to_rgba8();
        tracing::info!("Background {} ({}x{})", path.display(), image.width(), image.height());
        builder = builder.background(BackgroundImage::upright(image));
    }
    let pipeline = builder.build().context("Failed to start pipeline")?;

    run_capture_loop(source.as_mut(), &pipeline, args.fps, args.frames)?;

    if !pipeline.wait_idle(Duration::from_secs(2)) {
        tracing::warn!("Last frame still processing at shutdown");
    }
    pipeline.log_stats();
    pipeline.dispose();
    Ok(())
}

fn open_source(args: &Args, rotation: Rotation) -> Result<Box<dyn CaptureSource>> {
    if let Some(path) = &args.image {
        return Ok(Box::new(StillImageSource::open(path, args.fps, rotation)?));
    }

    #[cfg(feature = "v4l")]
    {
        let capture = callfx::capture::WebcamCapture::new(
            args.input_device,
            args.capture_width,
            args.capture_height,
            rotation,
        )
        .context("Failed to initialize webcam capture")?;
        Ok(Box::new(capture))
    }

    #[cfg(not(feature = "v4l"))]
    {
        bail!(
            "No --image given and webcam {} support is not compiled in (build with --features v4l)",
            args.input_device
        )
    }
}

fn open_output(args: &Args) -> Result<Box<dyn FrameConsumer>> {
    if let Some(dir) = &args.output_dir {
        return Ok(Box::new(ImageDirOutput::new(dir, args.every)?));
    }

    #[cfg(feature = "v4l")]
    {
        let output = callfx::output::V4L2Output::new(&args.output_device, args.output_width, args.output_height)
            .context("Failed to initialize v4l2loopback output")?;
        tracing::info!("Output: {}x{}", args.output_width, args.output_height);
        Ok(Box::new(output))
    }

    #[cfg(not(feature = "v4l"))]
    {
        bail!(
            "No --output-dir given and {} needs v4l support (build with --features v4l)",
            args.output_device
        )
    }
}

fn load_segmenter(args: &Args) -> Result<Option<Box<dyn Segmenter>>> {
    let Some(path) = &args.model else {
        if args.background.is_some() {
            tracing::warn!("--background has no effect without --model");
        }
        return Ok(None);
    };

    #[cfg(feature = "onnx")]
    {
        tracing::info!("Loading segmentation model from {}", path.display());
        let segmenter =
            callfx::segmentation::create_default_segmenter(path).context("Failed to load segmentation model")?;
        Ok(Some(segmenter))
    }

    #[cfg(not(feature = "onnx"))]
    {
        bail!("Cannot load {}: built without the onnx feature", path.display())
    }
}

fn run_capture_loop(source: &mut dyn CaptureSource, pipeline: &Pipeline, fps: f64, limit: u64) -> Result<()> {
    let frame_duration = Duration::from_secs_f64(1.0 / fps);
    let mut frame_count = 0u64;

    tracing::info!("Starting capture loop");
    if limit == 0 {
        tracing::info!("Press Ctrl+C to stop");
    }

    loop {
        let loop_start = Instant::now();

        let frame = source.capture_frame().context("Failed to capture frame")?;
        pipeline.submit(frame)?;
        frame_count += 1;

        if limit > 0 && frame_count >= limit {
            tracing::info!("Captured {} frames, stopping", frame_count);
            return Ok(());
        }

        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}
