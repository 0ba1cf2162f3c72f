use anyhow::Result;
use clap::Parser;
use clipserve::{
    catalog::{ClipCatalog, EndpointUrls},
    config::ClipserveConfig,
    delivery::DeliveryServerBuilder,
    registry::DeviceRegistry,
    thumbnails::{FfmpegExtractor, ThumbnailCache},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "clipserve")]
#[command(about = "Recording clip catalog and delivery server for network cameras")]
#[command(version)]
#[command(long_about = "Serves the recordings of network cameras and exported recording \
directories over HTTP: per-device clip listings with decoded detection metadata, \
range-aware clip delivery, and on-demand thumbnails.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "clipserve.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the server")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print an example configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return Ok(());
    }

    init_logging(&args);

    info!("Starting clipserve v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match ClipserveConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;

    // Attach devices; one broken device never takes the server down
    let registry = Arc::new(DeviceRegistry::new());
    for device in &config.devices {
        if let Err(e) = registry.attach(device.clone()).await {
            error!("Device '{}' is unavailable: {}", device.id, e);
        }
    }
    let attached = registry.ids().await.len();
    if attached == 0 {
        warn!("No devices attached; every webhook will answer with an error");
    } else {
        info!("{} of {} devices attached", attached, config.devices.len());
    }

    let public_base = config.server.public_base_url.clone().unwrap_or_else(|| {
        format!("http://{}:{}", config.server.ip, config.server.port)
    });
    let catalog = Arc::new(ClipCatalog::new(Arc::new(EndpointUrls::new(public_base))));

    let extractor = Arc::new(FfmpegExtractor {
        ffmpeg_path: config.cache.ffmpeg_path.clone(),
        timeout: Duration::from_secs(config.cache.extraction_timeout_seconds),
    });
    let thumbnails = Arc::new(ThumbnailCache::new(
        config.cache.thumbnail_dir.clone(),
        extractor,
    ));

    let server = DeliveryServerBuilder::new()
        .config(config.server.clone())
        .registry(registry.clone())
        .catalog(catalog)
        .thumbnails(thumbnails)
        .build()?;

    tokio::select! {
        result = server.start() => {
            if let Err(e) = result {
                error!("Delivery server failed: {}", e);
                registry.shutdown().await;
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    registry.shutdown().await;
    info!("clipserve stopped");
    Ok(())
}

fn init_logging(args: &Args) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("clipserve={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}

/// Print an example configuration in TOML format
fn print_default_config() {
    let default_config = r#"[server]
# IP address to bind to
ip = "0.0.0.0"
# Port to listen on
port = 8554
# Base URL clients use to reach this server (defaults to the bind address)
# public_base_url = "http://nvr.example.org:8554"

[cache]
# Directory holding one thumbnail subdirectory per device
thumbnail_dir = "./thumbnails"
# ffmpeg executable used for frame extraction
ffmpeg_path = "ffmpeg"
# Upper bound on one frame-extraction run, in seconds
extraction_timeout_seconds = 30

# A camera queried over its HTTP API
[[devices]]
id = "front-door"
name = "Front Door"
kind = "remote"
host = "http://192.168.1.10"
username = "admin"
password = "secret"
# Channel queried on the device
channel = 0
# Redirect clip requests to the device instead of proxying the bytes
redirect_playback = false
# Period of the forced logout+relogin cycle, in seconds
session_refresh_seconds = 1800

# A directory of exported recordings
[[devices]]
id = "garage"
name = "Garage"
kind = "filesystem"
root = "/srv/recordings/garage"
# Optional filename prefix in front of the embedded timestamp
file_prefix = "Garage_"
# Period between directory scans, in seconds
scan_interval_seconds = 300
"#;

    println!("# Clipserve Configuration File");
    println!("# This is an example configuration with all available options");
    println!();
    println!("{}", default_config);
}
