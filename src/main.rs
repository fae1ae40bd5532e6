//! CNN Session CLI - submits images and camera streams for processing.
//!
//! This is the main binary entry point. See the `cnn_session` library for
//! the core functionality.

use anyhow::{Context, Result};
use cnn_session::capture::{
    CaptureConfig, CommandSource, FrameSource, ImageLoopSource, TestPatternSource,
};
use cnn_session::env::Environment;
use cnn_session::view::{self, SnapshotFollower};
use cnn_session::{modes, Config, HttpJobSubmitter, SessionCommand, SessionController, SessionState, WsConnector};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Version from Cargo.toml.
const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI
#[derive(Parser)]
#[command(name = "cnn-session")]
#[command(version = VERSION)]
#[command(about = "Submit images and camera streams to a CNN processing service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one still image (PNG, JPEG or GIF)
    Still {
        /// Image file to upload
        #[arg(long)]
        image: PathBuf,
        /// Processing mode (see `modes`)
        #[arg(long)]
        mode: Option<String>,
        /// Write the processed image here
        #[arg(long)]
        output: Option<PathBuf>,
        /// Give up waiting for results after this many seconds
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },
    /// Stream frames from a live source until interrupted
    Video {
        /// Processing mode (see `modes`)
        #[arg(long)]
        mode: Option<String>,
        /// Frame source: test-pattern, images:<dir> or command:<shell command>
        #[arg(long, default_value = "test-pattern")]
        source: SourceSpec,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
    /// List the processing modes
    Modes,
    /// Show or change configuration
    Config {
        key: Option<String>,
        value: Option<String>,
    },
}

/// Where video frames come from.
#[derive(Debug, Clone)]
enum SourceSpec {
    TestPattern,
    Images(PathBuf),
    Command(String),
}

impl std::str::FromStr for SourceSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "test-pattern" {
            Ok(Self::TestPattern)
        } else if let Some(dir) = s.strip_prefix("images:") {
            Ok(Self::Images(PathBuf::from(dir)))
        } else if let Some(command) = s.strip_prefix("command:") {
            Ok(Self::Command(command.to_string()))
        } else {
            Err(format!(
                "unknown source '{s}' (expected test-pattern, images:<dir> or command:<cmd>)"
            ))
        }
    }
}

impl SourceSpec {
    fn open(&self, config: &Config) -> Result<Box<dyn FrameSource>> {
        Ok(match self {
            Self::TestPattern => Box::new(TestPatternSource::new(
                config.frame_width,
                config.frame_height,
            )),
            Self::Images(dir) => Box::new(ImageLoopSource::from_dir(dir)?),
            Self::Command(command) => Box::new(CommandSource::spawn(command)?),
        })
    }
}

fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Still {
            image,
            mode,
            output,
            timeout,
        } => {
            let config = Config::load()?;
            let mode = resolve_mode(mode, &config);
            runtime()?.block_on(run_still(
                &config,
                image,
                &mode,
                output,
                Duration::from_secs(timeout),
            ))?;
        }
        Commands::Video {
            mode,
            source,
            duration,
        } => {
            let config = Config::load()?;
            let mode = resolve_mode(mode, &config);
            let source = source.open(&config)?;
            runtime()?.block_on(run_video(&config, mode, source, duration.map(Duration::from_secs)))?;
        }
        Commands::Modes => {
            for group in modes::CATALOG {
                println!("{}", group.name);
                for mode in group.modes {
                    println!("  {:<24} {}", mode.value, mode.label);
                }
            }
        }
        Commands::Config { key, value } => config_command(key, value)?,
    }

    Ok(())
}

/// Log to stderr, or to `CNN_SESSION_LOG_FILE` when set.
fn init_logging() -> Result<()> {
    let environment = Environment::current();
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(environment.default_log_filter()),
    );
    if let Ok(path) = std::env::var("CNN_SESSION_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_secs().init();
    log::debug!("Running in {environment} mode");
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn resolve_mode(mode: Option<String>, config: &Config) -> String {
    let mode = mode.unwrap_or_else(|| config.default_mode.clone());
    if !modes::is_known(&mode) {
        log::warn!("Mode '{mode}' is not in the catalog; sending it anyway");
    }
    mode
}

fn build_controller(config: &Config) -> Result<SessionController> {
    let submitter = HttpJobSubmitter::new(config)?;
    Ok(SessionController::new(
        Arc::new(submitter),
        Arc::new(WsConnector::new()),
        CaptureConfig::from_config(config),
    ))
}

/// Print what changes in each snapshot until the controller goes away.
fn spawn_printer(mut snapshots: watch::Receiver<Arc<SessionState>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut follower = SnapshotFollower::new();
        loop {
            let state = Arc::clone(&*snapshots.borrow_and_update());
            for line in follower.update(&state) {
                println!("{line}");
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }
    })
}

async fn run_still(
    config: &Config,
    image: PathBuf,
    mode: &str,
    output: Option<PathBuf>,
    timeout: Duration,
) -> Result<()> {
    let mut controller = build_controller(config)?;
    let printer = spawn_printer(controller.subscribe());

    let submitted = controller.submit_still_file(&image, mode).await;
    let outcome = match submitted {
        Ok(_) => {
            tokio::select! {
                () = controller.drive_until(|s| {
                    s.is_settled() || (s.image.is_some() && s.matrices.is_some())
                }) => Ok(()),
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Interrupted");
                    Ok(())
                }
                () = tokio::time::sleep(timeout) => {
                    if controller.snapshot().image.is_some() {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("No result within {}s", timeout.as_secs()))
                    }
                }
            }
        }
        Err(e) => Err(e),
    };

    let snapshot = controller.snapshot();
    if let (Some(path), Some(result)) = (&output, &snapshot.image) {
        std::fs::write(path, &result.binary)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Saved {} ({}) to {}", result.handle, result.mime_type, path.display());
    }
    println!("{}", view::render_status(&snapshot));

    controller.shutdown().await;
    drop(controller);
    let _ = printer.await;
    outcome
}

async fn run_video(
    config: &Config,
    mode: String,
    source: Box<dyn FrameSource>,
    duration: Option<Duration>,
) -> Result<()> {
    let controller = build_controller(config)?;
    let mut snapshots = controller.subscribe();
    let printer = spawn_printer(controller.subscribe());
    let (commands, command_rx) = mpsc::unbounded_channel();
    let event_loop = tokio::spawn(controller.run(command_rx));

    commands
        .send(SessionCommand::ToggleVideo { mode, source })
        .map_err(event_loop_gone)?;

    let limit = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
        () = limit => log::info!("Duration reached"),
        _ = snapshots.wait_for(|s| s.generation > 0 && !s.streaming) => {
            log::info!("Video session ended");
        }
    }

    let _ = commands.send(SessionCommand::Shutdown);
    event_loop.await.context("Session event loop failed")?;
    let _ = printer.await;
    Ok(())
}

fn config_command(key: Option<String>, value: Option<String>) -> Result<()> {
    let config = Config::load()?;
    match (key, value) {
        (None, _) => println!("{}", serde_json::to_string_pretty(&config)?),
        (Some(key), None) => {
            let json = serde_json::to_value(&config)?;
            let current = json
                .get(&key)
                .with_context(|| format!("Unknown config key '{key}'"))?;
            println!("{current}");
        }
        (Some(key), Some(value)) => {
            let mut json = serde_json::to_value(&config)?;
            let slot = json
                .get_mut(&key)
                .with_context(|| format!("Unknown config key '{key}'"))?;
            *slot = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            let updated: Config = serde_json::from_value(json)
                .with_context(|| format!("Invalid value for '{key}'"))?;
            updated.save()?;
            println!("Saved {key}");
        }
    }
    Ok(())
}

/// Error for a command the event loop is no longer there to receive.
///
/// The rejected command is dropped here: it may own a frame source, which is
/// not `Sync`, so the send error itself cannot become an `anyhow::Error`.
fn event_loop_gone<T>(_rejected: mpsc::error::SendError<T>) -> anyhow::Error {
    anyhow::anyhow!("Session event loop is not running")
}
