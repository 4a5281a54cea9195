//! srtcast-server: channel orchestration service for SRT video output.
//!
//! Clients connect over WebSocket and drive a fleet of output channels,
//! each backed by a supervised ffmpeg process streaming a media file to an
//! SRT listener port.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc;

mod config;
mod engine;
mod logging;
mod media;
mod registry;
mod supervisor;
mod web;

use config::Settings;
use engine::Engine;
use registry::ChannelRegistry;
use supervisor::TranscodeSupervisor;
use web::state::ClientRegistry;

/// srtcast-server - SRT channel orchestration service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on for WebSocket and HTTP control
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Path to the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<String>,

    /// Directory containing playable media files
    #[arg(short = 'd', long)]
    videos_dir: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Disable automatic restart of crashed transcoders
    #[arg(long)]
    no_auto_restart: bool,

    /// Disable hardware-encoder probing and software fallback
    #[arg(long)]
    no_hardware_fallback: bool,

    /// Directory where log files are stored
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Number of days to keep log files
    #[arg(long, default_value = "7")]
    log_retention_days: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > defaults
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from("srtcast.toml");
        if default_path.exists() {
            Some(default_path)
        } else {
            None
        }
    });
    let file_config = if let Some(config_path) = &config_path {
        match config::load_config(config_path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", config_path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e.into());
            }
        }
    } else {
        config::ConfigFile::default()
    };

    // Merge logging configs (command line takes precedence)
    let log_dir = if args.log_dir.to_string_lossy() != "logs" {
        args.log_dir.clone()
    } else {
        PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or("logs"))
    };
    let log_retention_days = if args.log_retention_days != 7 {
        args.log_retention_days
    } else {
        file_config.logging.retention_days.unwrap_or(7)
    };
    let log_level = file_config.logging.level.clone();
    logging::init_logging(&log_dir, log_retention_days, args.verbose, log_level.as_deref())?;

    // Resolve settings: defaults < config file < command line
    let mut settings = Settings::default();
    settings.apply_file(&file_config)?;
    if let Some(listen) = args.listen {
        settings.server.listen = listen;
    }
    if let Some(ffmpeg) = args.ffmpeg {
        settings.server.ffmpeg_path = ffmpeg;
    }
    if let Some(dir) = args.videos_dir {
        settings.server.videos_dir = dir;
    }
    if args.no_auto_restart {
        settings.server.auto_restart = false;
    }
    if args.no_hardware_fallback {
        settings.server.hardware_fallback = false;
    }

    info!("srtcast-server starting...");
    info!("  Listen address: {}", settings.server.listen);
    info!("  Videos directory: {:?}", settings.server.videos_dir);
    info!("  ffmpeg: {}", settings.server.ffmpeg_path);
    info!("  Auto-restart: {}", settings.server.auto_restart);
    info!("  Hardware fallback: {}", settings.server.hardware_fallback);

    match supervisor::probe::check_ffmpeg(&settings.server.ffmpeg_path).await {
        Some(version) => info!("Found ffmpeg {}", version),
        None => warn!(
            "ffmpeg not found at '{}'; playback will fail until it is installed",
            settings.server.ffmpeg_path
        ),
    }

    let registry = Arc::new(ChannelRegistry::new());
    let clients = Arc::new(ClientRegistry::new());
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let supervisor = Arc::new(TranscodeSupervisor::new(
        settings.server.ffmpeg_path.clone(),
        settings.server.hardware_fallback,
        event_tx,
    ));
    let engine = Arc::new(Engine::new(
        settings.clone(),
        Arc::clone(&registry),
        Arc::clone(&supervisor),
        Arc::clone(&clients),
    ));

    tokio::spawn(Arc::clone(&engine).run_event_loop(event_rx));
    tokio::spawn(Arc::clone(&engine).run_watchdog());

    // Stop all transcoders before exiting on Ctrl-C
    let shutdown_supervisor = Arc::clone(&supervisor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested; stopping all transcode sessions");
            shutdown_supervisor.stop_all().await;
            std::process::exit(0);
        }
    });

    let listen_addr = settings.server.listen;
    if let Err(e) = web::start_web_server(listen_addr, engine, clients).await {
        error!("Control server error: {}", e);
        return Err(e);
    }

    Ok(())
}
