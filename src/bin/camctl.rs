//! camctl - Command-line control client for camd
//!
//! # Usage
//!
//! ```text
//! camctl list                      # list cameras
//! camctl info 0                    # describe camera 0
//! camctl dump                      # print the daemon's arbitration state
//! camctl open 0 --hold 10          # own camera 0 for ten seconds
//! camctl open 1 --shared --hold 5  # share camera 1 for five seconds
//! camctl snap 0                    # take a picture with camera 0
//! camctl ping
//! ```
//!
//! Logging is off unless `RUST_LOG` is set.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use camctl::{default_socket_path, ControlClient};
use camd_core::{AccessMode, DeviceCommand, DeviceEvent, ResourceId};

/// How long `snap` waits for the shutter callback.
const SHUTTER_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "camctl")]
#[command(about = "Control client for the camd camera arbitration daemon")]
#[command(version)]
struct Args {
    /// Daemon socket (defaults to $CAMD_SOCKET, then /tmp/camd.sock)
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List cameras
    List,
    /// Describe one camera
    Info { id: u32 },
    /// Print the daemon's arbitration state
    Dump,
    /// Open a camera and hold it, printing events
    Open {
        id: u32,

        /// Open a shared connection instead of taking ownership
        #[arg(long)]
        shared: bool,

        /// Seconds to hold the camera before closing
        #[arg(long, default_value_t = 0)]
        hold: u64,
    },
    /// Take a picture
    Snap { id: u32 },
    /// Check the daemon is alive
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("off")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let socket = args.socket.unwrap_or_else(default_socket_path);
    let mut client = ControlClient::connect(&socket, Some(format!("camctl-{}", std::process::id())))
        .await
        .with_context(|| format!("Is camd running? (socket {})", socket.display()))?;

    match args.command {
        Command::List => {
            for info in client.list_resources().await? {
                println!("{info}");
            }
        }
        Command::Info { id } => {
            let info = client.describe_resource(ResourceId::new(id)).await?;
            println!("{info}");
        }
        Command::Dump => {
            print!("{}", client.dump_state().await?);
        }
        Command::Open { id, shared, hold } => {
            let mode = if shared {
                AccessMode::Shared
            } else {
                AccessMode::Exclusive
            };
            let handle = client
                .open(ResourceId::new(id), mode)
                .await
                .with_context(|| format!("Failed to open camera {id}"))?;
            println!("Opened camera {id} ({mode}) as handle {handle}");

            let deadline = Instant::now() + Duration::from_secs(hold);
            while let Some(left) = deadline.checked_duration_since(Instant::now()) {
                if left.is_zero() {
                    break;
                }
                if let Some(event) = client.next_event(left).await? {
                    println!("{} {:?}", event.handle, event.event);
                }
            }
        }
        Command::Snap { id } => {
            let handle = client
                .open(ResourceId::new(id), AccessMode::Exclusive)
                .await
                .with_context(|| format!("Failed to open camera {id}"))?;
            client.control(handle, DeviceCommand::TakePicture).await?;

            let deadline = Instant::now() + SHUTTER_WAIT;
            let mut shutter = false;
            while let Some(left) = deadline.checked_duration_since(Instant::now()) {
                match client.next_event(left).await? {
                    Some(event) if event.event == DeviceEvent::Shutter => {
                        shutter = true;
                        break;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
            if shutter {
                println!("Picture taken with camera {id}");
            } else {
                println!("Picture requested with camera {id}, no shutter callback");
            }
        }
        Command::Ping => {
            let started = Instant::now();
            client.ping(1).await?;
            println!("pong from camd in {:?}", started.elapsed());
        }
    }

    client.disconnect().await?;
    Ok(())
}
