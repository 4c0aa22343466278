//! Vest control CLI
//!
//! Talks to a running vest daemon over TCP. Every subcommand sends one
//! command and prints the response, except `watch` which streams events and
//! `daemon` which runs the daemon in the foreground.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command as Process;
use vest_rpc::{
    CellId, ClientError, Command, DEFAULT_HOST, DEFAULT_PORT, Intensity, PlayEffectParams,
    Response, VestClient,
};

/// Find a binary, preferring one next to this executable
fn find_binary(name: &str) -> PathBuf {
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let sibling = dir.join(name);
        if sibling.exists() {
            return sibling;
        }
    }
    PathBuf::from(name)
}

/// Vest control CLI
#[derive(Parser)]
#[command(name = "vest")]
#[command(about = "Control a haptic vest through the vest daemon")]
#[command(version)]
#[command(after_help = "\
Examples:
  vest daemon                     Run the daemon in foreground
  vest list                       List attached vests
  vest select --bus 1 --address 4 Select a vest by location
  vest select --serial MOCK-0001  Select a vest by serial number
  vest connect                    Open the selected vest
  vest trigger 2 7                Pulse front upper left at speed 7
  vest play machinegun_front      Play a built-in effect
  vest play --cells 2,5 --speed 6 --duration 200
  vest watch                      Print events as they arrive
")]
struct Cli {
    /// Daemon host
    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    host: String,

    /// Daemon port
    #[arg(short, long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in foreground
    Daemon,

    /// Check that the daemon is alive
    Ping,

    /// List attached vests
    List,

    /// Select a vest by bus/address or serial number
    Select {
        #[arg(long, requires = "address")]
        bus: Option<u8>,
        #[arg(long, requires = "bus")]
        address: Option<u8>,
        #[arg(long, conflicts_with_all = ["bus", "address"])]
        serial: Option<String>,
    },

    /// Show the selected vest
    Selected,

    /// Clear the selection (closes the vest if open)
    Clear,

    /// Open the selected vest
    Connect,

    /// Close the open vest
    Disconnect,

    /// Pulse one cell
    Trigger {
        /// Cell index (0-7)
        cell: u8,
        /// Intensity (1-10)
        speed: u8,
    },

    /// Switch every cell off
    Stop,

    /// Show daemon status
    Status,

    /// List the effect library
    Effects,

    /// Play a named effect, or a single step built from --cells/--speed/--duration
    Play {
        /// Effect name
        name: Option<String>,
        #[arg(long, value_delimiter = ',', conflicts_with = "name")]
        cells: Vec<u8>,
        #[arg(long, requires = "cells")]
        speed: Option<u8>,
        #[arg(long = "duration", requires = "cells")]
        duration_ms: Option<u64>,
    },

    /// Cancel the current effect
    #[command(name = "stop-effect")]
    StopEffect,

    /// List connected clients
    Clients,

    /// Print events until interrupted
    Watch,

    /// Shutdown the daemon
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Daemon => return run_daemon(),
        Commands::Watch => return run_watch(&cli.host, cli.port).await,
        Commands::Status => return run_status(&cli.host, cli.port).await,
        Commands::Ping => Command::Ping,
        Commands::List => Command::List,
        Commands::Select {
            bus,
            address,
            serial,
        } => {
            if bus.is_none() && serial.is_none() {
                bail!("Pass --bus and --address, or --serial");
            }
            Command::SelectDevice {
                bus,
                address,
                serial,
            }
        }
        Commands::Selected => Command::GetSelectedDevice,
        Commands::Clear => Command::ClearDevice,
        Commands::Connect => Command::Connect,
        Commands::Disconnect => Command::Disconnect,
        Commands::Trigger { cell, speed } => Command::Trigger {
            cell: parse_cell(cell)?,
            speed: parse_speed(speed)?,
        },
        Commands::Stop => Command::Stop,
        Commands::Effects => Command::ListEffects,
        Commands::Play {
            name,
            cells,
            speed,
            duration_ms,
        } => play_command(name, &cells, speed, duration_ms)?,
        Commands::StopEffect => Command::StopEffect,
        Commands::Clients => Command::ListClients,
        Commands::Shutdown => Command::Shutdown,
    };

    let client = connect(&cli.host, cli.port).await?;
    let response = send(&client, command).await?;
    print_response(&response)
}

fn parse_cell(index: u8) -> Result<CellId> {
    CellId::new(index).with_context(|| format!("Cell {index} is out of range (0-7)"))
}

fn parse_speed(level: u8) -> Result<Intensity> {
    Intensity::new(level).with_context(|| format!("Speed {level} is out of range (1-10)"))
}

fn play_command(
    name: Option<String>,
    cells: &[u8],
    speed: Option<u8>,
    duration_ms: Option<u64>,
) -> Result<Command> {
    if let Some(name) = name {
        return Ok(Command::play_named(name));
    }
    if cells.is_empty() {
        bail!("Pass an effect name, or --cells with --speed and --duration");
    }

    let cells = cells
        .iter()
        .map(|&index| parse_cell(index))
        .collect::<Result<BTreeSet<_>>>()?;
    let speed = speed.context("--speed is required with --cells")?;
    let duration_ms = duration_ms.context("--duration is required with --cells")?;

    Ok(Command::PlayEffect(PlayEffectParams {
        cells: Some(cells),
        speed: Some(parse_speed(speed)?),
        duration_ms: Some(duration_ms),
        ..PlayEffectParams::default()
    }))
}

async fn connect(host: &str, port: u16) -> Result<VestClient> {
    VestClient::connect((host, port))
        .await
        .with_context(|| format!("Failed to connect to daemon at {host}:{port}. Is it running?"))
}

/// Send a command and turn a failed response into an error
async fn send(client: &VestClient, command: Command) -> Result<Response> {
    match client.call(command).await {
        Ok(response) => Ok(response),
        Err(ClientError::Rejected { code, message }) => bail!("{message} ({code})"),
        Err(e) => Err(e).context("Request failed"),
    }
}

fn print_response(response: &Response) -> Result<()> {
    if let Some(message) = &response.message {
        println!("{message}");
    }
    if !response.data.is_empty() {
        let body = serde_json::to_string_pretty(&response.data)
            .context("Failed to format response")?;
        println!("{body}");
    }
    Ok(())
}

/// Run the daemon in foreground
fn run_daemon() -> Result<()> {
    let binary = find_binary("vest-daemon");
    let status = Process::new(&binary)
        .status()
        .with_context(|| format!("Failed to start {}. Is it installed?", binary.display()))?;
    if !status.success() {
        bail!("vest-daemon exited with status: {status}");
    }
    Ok(())
}

async fn run_status(host: &str, port: u16) -> Result<()> {
    let Ok(client) = VestClient::connect((host, port)).await else {
        println!("Status: Not running");
        println!("Address: {host}:{port}");
        return Ok(());
    };

    let status = send(&client, Command::Status).await?;
    println!("Status: Running");
    println!("Address: {}", client.peer_addr());
    println!(
        "Connection: {}",
        status
            .get("state")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown")
    );
    if let Some(device) = status.get("device").filter(|d| !d.is_null()) {
        println!(
            "Device: bus {} address {}",
            device["bus"], device["address"]
        );
    }
    if let Some(playback) = status.get("playback").filter(|p| !p.is_null()) {
        println!(
            "Playing: {} (step {} of {})",
            playback["effect_name"].as_str().unwrap_or("?"),
            playback["step"],
            playback["total_steps"]
        );
    }
    Ok(())
}

async fn run_watch(host: &str, port: u16) -> Result<()> {
    let mut client = connect(host, port).await?;
    send(
        &client,
        Command::Identify {
            name: "vest-cli".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        },
    )
    .await?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = client.next_event() => {
                let Some(event) = event else {
                    println!("Daemon closed the connection");
                    break;
                };
                let line = serde_json::to_string(&event).context("Failed to format event")?;
                println!("{line}");
            }
        }
    }

    client.close().await;
    Ok(())
}
