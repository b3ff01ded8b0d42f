//! camd - Camera resource arbitration daemon
//!
//! This binary owns the camera devices and decides which client may use
//! which one, serving the arbitrator on a Unix socket.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! camd start
//!
//! # Start the daemon (background/daemonized)
//! camd start -d
//!
//! # Start with a specific config file
//! camd start --config /etc/camd/config.toml
//!
//! # Stop the daemon
//! camd stop
//!
//! # Check daemon status
//! camd status
//!
//! # Start with custom socket path
//! CAMD_SOCKET=/run/camd.sock camd start
//!
//! # Enable debug logging
//! RUST_LOG=camd=debug camd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown, disconnecting every client

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use camd::arbiter::Arbitrator;
use camd::config::DaemonConfig;
use camd::hal::SimulatedDriver;
use camd::remote::LocalDeathNotifier;
use camd::server::DaemonServer;
use camd::sound::FileSoundLoader;
use camd_core::{DeathNotifier, HardwareDriver, SoundLoader};

/// camd - camera resource arbitration daemon
#[derive(Parser, Debug)]
#[command(name = "camd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Configuration file (defaults to $CAMD_CONFIG, then the user config dir)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("camd")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("camd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("camd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Returns the PID of a running daemon, clearing a stale PID file.
fn is_daemon_running() -> Option<u32> {
    let pid = read_pid()?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    let pid = i32::try_from(pid).context("PID out of range")?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    });

    match command {
        Command::Start { daemon, config } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'camd stop' to stop it first.");
                process::exit(1);
            }

            // Fail before forking if the config is broken
            let config = DaemonConfig::resolve(config.as_deref())
                .context("Failed to load configuration")?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {pid})...");
            stop_daemon(pid)?;

            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            eprintln!("Daemon did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                process::exit(1);
            };

            println!("Daemon is running (PID {pid})");
            if let Ok(config) = DaemonConfig::resolve(None) {
                if config.socket_path.exists() {
                    println!("Socket: {}", config.socket_path.display());
                }
            }
            Ok(())
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

/// Builds the arbitrator and its collaborators from config.
fn build_arbiter(
    config: &DaemonConfig,
) -> Result<(Arc<Arbitrator>, Arc<SimulatedDriver>, Arc<LocalDeathNotifier>)> {
    let driver = Arc::new(SimulatedDriver::new(config.resource_infos()));
    let notifier = Arc::new(LocalDeathNotifier::new());
    let loader = Arc::new(FileSoundLoader::new(
        &config.sounds.shutter,
        &config.sounds.recording,
    ));

    let arbiter = Arbitrator::new(
        Arc::clone(&driver) as Arc<dyn HardwareDriver>,
        Arc::clone(&notifier) as Arc<dyn DeathNotifier>,
        loader as Arc<dyn SoundLoader>,
        config.access_policy(),
    )
    .context("Failed to initialize arbitrator")?;

    let weak = Arc::downgrade(&arbiter);
    driver
        .attach_event_sink(Arc::new(move |resource, event| {
            if let Some(arbiter) = weak.upgrade() {
                arbiter.dispatch_device_event(resource, &event);
            }
        }))
        .context("Failed to start HAL event thread")?;

    Ok((arbiter, driver, notifier))
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("camd=info".parse()?)
                .add_directive("camd_core=info".parse()?)
                .add_directive("camd_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        devices = config.devices.len(),
        "camd starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let (arbiter, driver, notifier) = build_arbiter(&config)?;
    let socket_path: &Path = &config.socket_path;

    let server = DaemonServer::new(
        socket_path,
        Arc::clone(&arbiter),
        notifier,
        cancel_token,
    );

    info!(socket = %socket_path.display(), "Starting server");
    let served = server.run().await;

    let shutdown_arbiter = Arc::clone(&arbiter);
    match tokio::task::spawn_blocking(move || shutdown_arbiter.shutdown()).await {
        Ok(count) => info!(clients = count, "Clients disconnected"),
        Err(e) => warn!(error = %e, "Arbitrator shutdown task failed"),
    }
    driver.detach_event_sink();

    if let Err(e) = served {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("camd stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
