use anyhow::{anyhow, Context, Result};
use clap::Parser;
use present_core::backend::gpu::TextureFormat;
use present_core::backend::headless::{
    HeadlessDevice, HeadlessFaults, HeadlessSurface, InitStep, VsyncModel,
};
use present_core::backend::{GpuDevice, SoftwareSurface};
use present_core::config::PresentConfig;
use present_core::framebuffer::rgb565;
use present_core::geometry::ScalingMode;
use present_core::logging::{LogConfig, LogLevel};
use present_core::session::{BackendProvider, DeviceFactory, PresentSession};
use present_core::types::{Rect, Size};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Run a presentation session against the simulated GPU device
#[derive(Parser)]
#[command(name = "present-bench")]
struct Args {
    /// Run time in milliseconds
    #[arg(long, default_value_t = 2000)]
    duration_ms: u64,

    /// Target frame rate
    #[arg(long)]
    fps: Option<f64>,

    /// Simulated display refresh rate; turns on vsync pacing
    #[arg(long)]
    vsync_hz: Option<f64>,

    /// Simulated GPU time per present in milliseconds
    #[arg(long, default_value_t = 0.0)]
    present_cost_ms: f64,

    /// Present with the software backend only
    #[arg(long, default_value_t = false)]
    software: bool,

    /// Number of transfer buffers in the upload ring
    #[arg(long)]
    ring_depth: Option<usize>,

    /// Surface size, e.g. 640x480
    #[arg(long, default_value = "640x480", value_parser = parse_size)]
    surface: Size,

    /// Window size, e.g. 1024x768 (defaults to the surface size)
    #[arg(long, value_parser = parse_size)]
    window: Option<Size>,

    /// Scaling mode: none, aspect or windowbox
    #[arg(long, value_parser = parse_scaling)]
    scaling: Option<ScalingMode>,

    /// Fail GPU setup at: probe, swap-interval, program, quad or texture
    #[arg(long, value_parser = parse_step)]
    fail_init: Option<InitStep>,

    /// Make the conversion shader self-test fail
    #[arg(long, default_value_t = false)]
    fail_shader_test: bool,

    /// Make RGB565 texture uploads fail their self-test
    #[arg(long, default_value_t = false)]
    fail_rgb565: bool,

    /// Raise a GPU error once this many frames were presented
    #[arg(long)]
    error_after: Option<u64>,

    /// Keep the GPU backend on runtime errors
    #[arg(long, default_value_t = false)]
    no_auto_fallback: bool,

    /// Request a switch to software after this many milliseconds
    #[arg(long)]
    switch_after_ms: Option<u64>,

    /// Print the diagnostic line this often (0 = never)
    #[arg(long, default_value_t = 500)]
    report_ms: u64,

    /// Load presentation settings from this file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Core log level: off, error, warn, info, debug, trace
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Append core logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Only print the final JSON report
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn parse_size(s: &str) -> Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let width = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let height = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    if width == 0 || height == 0 {
        return Err(format!("size must not be empty: '{}'", s));
    }
    Ok(Size::new(width, height))
}

fn parse_scaling(s: &str) -> Result<ScalingMode, String> {
    match s.to_lowercase().as_str() {
        "none" => Ok(ScalingMode::None),
        "aspect" | "aspect-preserve" => Ok(ScalingMode::AspectPreserve),
        "windowbox" => Ok(ScalingMode::Windowbox),
        other => Err(format!("unknown scaling mode '{}'", other)),
    }
}

fn parse_step(s: &str) -> Result<InitStep, String> {
    match s.to_lowercase().as_str() {
        "probe" => Ok(InitStep::Probe),
        "swap-interval" => Ok(InitStep::SwapInterval),
        "program" => Ok(InitStep::Program),
        "quad" => Ok(InitStep::Quad),
        "texture" => Ok(InitStep::Texture),
        other => Err(format!("unknown init step '{}'", other)),
    }
}

fn build_config(args: &Args) -> PresentConfig {
    let mut config = match &args.config {
        Some(path) => PresentConfig::load_from(path),
        None => PresentConfig::default(),
    };
    if let Some(fps) = args.fps {
        config.target_fps = fps;
    }
    if let Some(depth) = args.ring_depth {
        config.ring_depth = depth;
    }
    if let Some(mode) = args.scaling {
        config.scaling = mode;
    }
    if args.vsync_hz.is_some() {
        config.swap_interval = config.swap_interval.max(1);
    }
    if args.software {
        config.prefer_gpu = false;
    }
    if args.no_auto_fallback {
        config.auto_fallback = false;
    }
    config
}

fn build_faults(args: &Args) -> HeadlessFaults {
    HeadlessFaults {
        fail_step: args.fail_init,
        fail_shader_test: args.fail_shader_test,
        failing_formats: if args.fail_rgb565 {
            vec![TextureFormat::Rgb565]
        } else {
            Vec::new()
        },
        error_after_frames: args.error_after,
        vsync: args
            .vsync_hz
            .map(|hz| VsyncModel::from_hz(hz).with_present_cost(args.present_cost_ms)),
        ..Default::default()
    }
}

/// Row stride in bytes of a 16-bit surface
fn surface_pitch(size: Size) -> Result<u32> {
    size.width
        .checked_mul(2)
        .ok_or_else(|| anyhow!("surface width {} is too large", size.width))
}

/// Scroll a bar down the surface, one row per call
fn produce(session: &PresentSession, tick: u32) -> Result<()> {
    let size = session.framebuffer().display_size();
    let mut lock = session.lock(None)?;
    lock.fill_rect(Rect::from_size(size), rgb565(0, 0, 64));
    let y = tick % size.height.max(1);
    lock.fill_rect(Rect::new(0, y, size.width, 8), rgb565(255, 255, 255));
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let level = LogLevel::from_str(&args.log_level)
        .ok_or_else(|| anyhow!("invalid log level: {}", args.log_level))?;
    LogConfig::global().set_global_level(level);
    if let Some(path) = &args.log_file {
        LogConfig::global()
            .set_log_file(path.clone())
            .with_context(|| format!("opening log file {}", path.display()))?;
    }

    let config = build_config(&args);
    let device = HeadlessDevice::new(build_faults(&args));
    let surface = HeadlessSurface::new();
    let provider = {
        let device = device.clone();
        let surface = surface.clone();
        let factory: DeviceFactory = Box::new(move || Ok(Box::new(device) as Box<dyn GpuDevice>));
        BackendProvider {
            surface: Box::new(move || Ok(Box::new(surface) as Box<dyn SoftwareSurface>)),
            device: Some(factory),
        }
    };

    let pitch = surface_pitch(args.surface)?;
    let mut session = PresentSession::create_primary_surface(
        args.surface.width,
        args.surface.height,
        pitch,
        config,
        provider,
    )?;
    if let Some(window) = args.window {
        session.set_window_size(window.width, window.height);
    }
    if !args.quiet {
        println!("Backend: {}", session.capabilities().label());
    }
    session.attach();

    let duration = Duration::from_millis(args.duration_ms);
    let report_every = Duration::from_millis(args.report_ms);
    let start = Instant::now();
    let mut last_report = start;
    let mut switch_requested = false;
    let mut tick = 0u32;
    while start.elapsed() < duration {
        produce(&session, tick)?;
        tick = tick.wrapping_add(1);
        thread::sleep(Duration::from_millis(10));

        if let Some(after) = args.switch_after_ms {
            if !switch_requested && start.elapsed() >= Duration::from_millis(after) {
                session.request_backend_switch();
                switch_requested = true;
            }
        }
        for event in session.events().try_iter() {
            if !args.quiet {
                println!("[{:>6} ms] {:?}", start.elapsed().as_millis(), event);
            }
        }
        if !args.quiet && args.report_ms > 0 && last_report.elapsed() >= report_every {
            last_report = Instant::now();
            let status = session.status();
            println!(
                "[{:>6} ms] {} | sleep {:.3} ms",
                start.elapsed().as_millis(),
                status.diagnostics.replace('\n', " | "),
                status.sleep_estimate_ms
            );
        }
    }

    let status = session.status();
    let elapsed = start.elapsed();
    let frames = session.stop()?;
    let report = serde_json::json!({
        "frames": frames,
        "elapsed_ms": elapsed.as_millis() as u64,
        "average_fps": frames as f64 / elapsed.as_secs_f64(),
        "gpu_swaps": device.swap_count(),
        "software_frames": surface.frames(),
        "status": status,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
