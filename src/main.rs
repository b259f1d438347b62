//! astro_rig - command-line front end for the capture rig
//!
//! Subcommands:
//! - `astro_rig status` - Print camera, mount and session status as JSON
//! - `astro_rig capture` - Take a single still into the capture directory
//! - `astro_rig session run ...` - Run a capture session to completion
//! - `astro_rig config show` - Print the effective configuration
//!
//! Whatever happens (normal exit, Ctrl-C, SIGTERM, a panic inside the command)
//! the rig's shutdown sequence runs before the process exits, so the camera
//! settings and mount tracking are put back the way they were found.

use anyhow::{anyhow, Context, Result};
use astro_rig::config::RigConfig;
use astro_rig::device::Direction;
use astro_rig::session::{SessionConfig, SessionMode, SessionStatus};
use astro_rig::RigContext;
use clap::{Args, Parser, Subcommand};
use futures::FutureExt;
use humantime_serde::re::humantime::parse_duration;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "astro_rig")]
#[command(about = "Camera and mount control for an astrophotography rig")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to config/rig.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Skip hardware probing and use simulated devices
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print camera, mount and session status
    Status,

    /// Take one still
    Capture,

    /// Capture sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Run a session and wait for it to finish
    Run(SessionArgs),
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration after all layers are merged
    Show,
}

#[derive(Args)]
struct SessionArgs {
    /// Session name, used for the session directory and file names
    #[arg(long, default_value = "session")]
    name: String,

    /// Stop after this many images
    #[arg(long)]
    count: Option<u32>,

    /// Stop after this long (e.g. "45m", "1h 30m")
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,

    /// Pause between captures
    #[arg(long, value_parser = parse_duration, default_value = "0s")]
    interval: Duration,

    /// Run sidereal tracking for the duration of the session
    #[arg(long)]
    track: bool,

    /// Tracking direction (east or west)
    #[arg(long, default_value = "east")]
    direction: Direction,

    /// Tracking speed as a multiple of sidereal rate
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Use the saved session configuration instead of the flags above
    #[arg(long)]
    saved: bool,

    /// Save the configuration before running it
    #[arg(long)]
    save: bool,
}

impl SessionArgs {
    fn to_config(&self) -> SessionConfig {
        let mode = if self.duration.is_some() && self.count.is_none() {
            SessionMode::Time
        } else {
            SessionMode::Count
        };
        SessionConfig {
            name: self.name.clone(),
            mode,
            total_images: self.count,
            total_time: self.duration,
            capture_interval: self.interval,
            enable_tracking: self.track,
            tracking_direction: self.direction,
            tracking_speed: self.speed,
            ..SessionConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RigConfig::load_from(path),
        None => RigConfig::load(),
    }
    .context("failed to load configuration")?;
    if cli.simulate {
        config.devices.force_simulation = true;
    }

    astro_rig::logging::init(&config.logging)?;

    if let Commands::Config {
        action: ConfigAction::Show,
    } = &cli.command
    {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let rig = RigContext::initialize(config)
        .await
        .context("failed to initialise rig")?;

    let logger_cancel = CancellationToken::new();
    let logger = rig.broadcaster().spawn_event_logger(logger_cancel.clone());

    if rig.config().preview.start_on_launch {
        if let Err(e) = rig.start_preview(None) {
            warn!(error = %e, "Preview not started");
        }
    }

    let command = AssertUnwindSafe(run_command(&rig, cli.command)).catch_unwind();
    let result = tokio::select! {
        outcome = command => match outcome {
            Ok(result) => result,
            Err(_) => {
                error!("Command panicked; restoring devices");
                Err(anyhow!("command panicked"))
            }
        },
        signal = shutdown_signal() => {
            info!(signal, "Shutting down");
            Ok(())
        }
    };

    rig.shutdown().await;
    logger_cancel.cancel();
    if let Err(e) = logger.await {
        warn!(error = %e, "Event logger ended abnormally");
    }

    result
}

async fn run_command(rig: &RigContext, command: Commands) -> Result<()> {
    match command {
        Commands::Status => {
            let status = json!({
                "camera": rig.get_camera_status(),
                "mount": rig.get_mount_status(),
                "session": rig.get_session_status(),
                "capture_dir": rig.capture_directory()?,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Capture => {
            let record = rig.trigger_still_capture().await?;
            println!("{}", record.file_path.display());
        }
        Commands::Session {
            action: SessionAction::Run(args),
        } => {
            let config = if args.saved {
                rig.get_session_config().await?
            } else {
                args.to_config()
            };
            if args.save {
                rig.save_session_config(&config).await?;
            }

            rig.start_session(config).await?;
            let state = rig.wait_for_session().await;
            println!("{}", serde_json::to_string_pretty(&state)?);
            if state.status == SessionStatus::Failed {
                return Err(anyhow!(
                    "session failed: {}",
                    state.last_error.unwrap_or_default()
                ));
            }
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            println!("{}", serde_json::to_string_pretty(rig.config())?);
        }
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM with the signal's name.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT",
                    _ = term.recv() => "SIGTERM",
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable; listening for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl-C"
    }
}
