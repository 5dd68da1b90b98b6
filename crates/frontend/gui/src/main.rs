use present_core::backend::{BackendError, SoftwareSurface};
use present_core::config::PresentConfig;
use present_core::geometry::ScalingMode;
use present_core::logging::{LogConfig, LogLevel};
use present_core::session::{BackendProvider, PresentSession};
use present_gui::demo::DemoProducer;
use present_gui::settings::GuiSettings;
use present_gui::window_backend::{channel_surface, MinifbBackend, WindowPresenter};
use std::env;
use std::path::PathBuf;

const PRODUCER_FPS: f64 = 60.0;

fn print_usage() {
    println!("Usage: ddpresent [--aspect | --windowbox] [--fps N] [--show-fps]");
    println!("                 [--log-level LEVEL] [--log-file PATH] [--save-config]");
}

fn main() {
    env_logger::init();

    let mut config = PresentConfig::load();
    let settings = GuiSettings::load();
    let mut save_config = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--aspect" => config.scaling = ScalingMode::AspectPreserve,
            "--windowbox" => config.scaling = ScalingMode::Windowbox,
            "--show-fps" => config.show_fps = true,
            "--save-config" => save_config = true,
            "--fps" => match args.next().and_then(|v| v.parse::<f64>().ok()) {
                Some(fps) if fps > 0.0 => config.target_fps = fps,
                _ => {
                    eprintln!("--fps expects a positive number");
                    return;
                }
            },
            "--log-level" => match args.next().as_deref().and_then(LogLevel::from_str) {
                Some(level) => LogConfig::global().set_global_level(level),
                None => {
                    eprintln!("--log-level expects off, error, warn, info, debug or trace");
                    return;
                }
            },
            "--log-file" => match args.next() {
                Some(path) => {
                    if let Err(e) = LogConfig::global().set_log_file(PathBuf::from(path)) {
                        eprintln!("Failed to open log file: {}", e);
                    }
                }
                None => {
                    eprintln!("--log-file expects a path");
                    return;
                }
            },
            "-h" | "--help" => {
                print_usage();
                return;
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                return;
            }
        }
    }

    if save_config {
        if let Err(e) = config.save() {
            log::warn!("Failed to save presentation config: {}", e);
        }
    }

    // The window thread cannot host a GL context here, so the session runs on software
    config.prefer_gpu = false;

    let (surface, frames) = channel_surface(settings.frame_queue);
    let provider = BackendProvider::software_only(Box::new(move || {
        Ok::<_, BackendError>(Box::new(surface) as Box<dyn SoftwareSurface>)
    }));

    let width = settings.surface_width;
    let height = settings.surface_height;
    let Some(pitch) = width.checked_mul(2) else {
        log::error!("Surface width {} is too large", width);
        return;
    };
    let mut session =
        match PresentSession::create_primary_surface(width, height, pitch, config, provider) {
            Ok(session) => session,
            Err(e) => {
                log::error!("Failed to create primary surface: {}", e);
                return;
            }
        };

    let window = match MinifbBackend::new(
        "ddpresent",
        settings.window_width,
        settings.window_height,
    ) {
        Ok(window) => window,
        Err(e) => {
            log::error!("Failed to create window: {}", e);
            return;
        }
    };

    let producer = match DemoProducer::spawn(session.framebuffer(), PRODUCER_FPS) {
        Ok(producer) => producer,
        Err(e) => {
            log::error!("Failed to start demo producer: {}", e);
            return;
        }
    };

    session.attach();
    let mut presenter = WindowPresenter::new(window, settings.hotkeys.resolve());
    while presenter.pump(&session, &frames) {}

    let written = producer.stop();
    match session.stop() {
        Ok(presented) => log::info!(
            "Presented {} frames ({} written, {} shown)",
            presented,
            written,
            presenter.frames_shown()
        ),
        Err(e) => log::error!("{}", e),
    }
}
