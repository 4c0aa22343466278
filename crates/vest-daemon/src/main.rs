//! Vest daemon entry point.
//!
//! This binary starts the TCP broker that owns the haptic vest and serves
//! UI clients, game mods and control commands.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vest_core::{DaemonConfig, Directories};

/// Vest daemon - TCP broker for the haptic vest
#[derive(Parser, Debug)]
#[command(name = "vest-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (defaults to `config.json` in the platform config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// TCP port to listen on
    #[arg(long, short)]
    port: Option<u16>,

    /// Number of simulated devices exposed by the mock backend
    #[arg(long, value_name = "COUNT")]
    mock_devices: Option<u8>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

/// Set up logging.
/// In debug builds, defaults to debug level and logs to a timestamped file.
/// In release builds, defaults to info level and logs to stderr, unless
/// `--log-file` asks for a file.
fn setup_logging(log_file: Option<&Path>) {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vest={default_level}")));

    let log_path = match log_file {
        Some(path) => Some(path.to_path_buf()),
        None if cfg!(debug_assertions) => Some(timestamped_log_path()),
        None => None,
    };

    let Some(log_path) = log_path else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
        return;
    };

    let dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(std::env::temp_dir, Path::to_path_buf);
    let file_name = log_path
        .file_name()
        .map_or_else(|| "vest-daemon.log".into(), |n| n.to_os_string());

    let file_appender = tracing_appender::rolling::never(&dir, &file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    std::mem::forget(guard);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(filter)
        .init();

    eprintln!("Logging to: {} (and stderr)", dir.join(&file_name).display());
}

fn timestamped_log_path() -> PathBuf {
    let temp_dir = std::env::temp_dir();
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let log_path = temp_dir.join(format!("vest-daemon-{timestamp}.log"));

    #[cfg(unix)]
    {
        let symlink_path = temp_dir.join("vest-daemon.log");
        let _ = std::fs::remove_file(&symlink_path);
        let _ = std::os::unix::fs::symlink(&log_path, &symlink_path);
    }

    log_path
}

fn load_config(args: &Args) -> anyhow::Result<DaemonConfig> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_required(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match Directories::new() {
            Some(dirs) => DaemonConfig::load(&dirs.config_file).with_context(|| {
                format!("Failed to load config from {}", dirs.config_file.display())
            })?,
            None => DaemonConfig::default(),
        },
    };

    if let Some(host) = &args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(count) = args.mock_devices {
        config.mock_devices = count;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging(args.log_file.as_deref());

    let config = load_config(&args)?;
    info!(
        "Starting vest daemon on {}:{} ({} mock device(s))",
        config.host, config.port, config.mock_devices
    );

    vest_daemon::run(config)
        .await
        .context("Daemon failed")?;

    info!("Vest daemon stopped");
    Ok(())
}
