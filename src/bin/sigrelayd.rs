//! sigrelay daemon - WebSocket rendezvous and relay server
//!
//! Peers connect to `ws://<host>/<namespace>/<path>/<slot>`; the two peers
//! of a path (slots 0 and 1) receive each other's messages.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! sigrelayd start
//!
//! # Start on another address, backgrounded
//! sigrelayd start -d --bind 127.0.0.1:9000
//!
//! # Stop the daemon
//! sigrelayd stop
//!
//! # Check daemon status
//! sigrelayd status
//! ```

use std::fs::{self, File};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sigrelayd::config::{parse_bind, ServerConfig};
use sigrelayd::registry::spawn_registry;
use sigrelayd::server::SignalingServer;

/// How long `stop` waits for the daemon to exit
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// sigrelay daemon - pairs two WebSocket peers per path
#[derive(Parser, Debug)]
#[command(name = "sigrelayd", version, about)]
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

        /// Listen address, overrides the config file and SIGRELAY_BIND
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Config file (defaults to the user config directory)
        #[arg(long, value_name = "FILE")]
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
        .join("sigrelay")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("sigrelayd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("sigrelay.log")
}

/// Contents of the PID file: the daemon's PID and the address it serves.
struct PidRecord {
    pid: u32,
    bind: Option<SocketAddr>,
}

fn read_pid_record() -> Option<PidRecord> {
    let contents = fs::read_to_string(pid_file_path()).ok()?;
    let mut lines = contents.lines();
    let pid = lines.next()?.trim().parse().ok()?;
    let bind = lines.next().and_then(|line| line.trim().parse().ok());
    Some(PidRecord { pid, bind })
}

fn write_pid_record(bind: SocketAddr) -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    fs::write(&path, format!("{}\n{bind}\n", process::id()))
        .with_context(|| format!("Failed to write PID file {}", path.display()))
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Signal 0 checks the PID exists without delivering anything.
#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    false
}

/// Returns the live daemon's record, clearing a PID file left by a crash.
fn running_daemon() -> Option<PidRecord> {
    let record = read_pid_record()?;
    if is_process_running(record.pid) {
        return Some(record);
    }
    remove_pid_file();
    None
}

#[cfg(unix)]
fn stop_daemon(pid: u32) -> Result<()> {
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

#[cfg(not(unix))]
fn stop_daemon(_pid: u32) -> Result<()> {
    bail!("Stop command is only supported on Unix systems")
}

/// Resolves the effective config: file, then environment, then `--bind`.
fn load_config(path: Option<PathBuf>, bind: Option<String>) -> Result<ServerConfig> {
    let mut config = ServerConfig::load_or_default(path.as_deref())?;
    config.apply_env()?;
    if let Some(bind) = bind {
        config.bind = parse_bind(&bind)?;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        bind: None,
        config: None,
    });

    match command {
        Command::Start {
            daemon,
            bind,
            config,
        } => {
            if let Some(running) = running_daemon() {
                bail!(
                    "Daemon is already running (PID {}); use 'sigrelayd stop' first",
                    running.pid
                );
            }

            // Config errors are reported before forking.
            let config = load_config(config, bind).context("Invalid configuration")?;

            if daemon {
                daemonize()?;
            }

            write_pid_record(config.bind)?;
            let result = run_daemon(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            let Some(running) = running_daemon() else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {})...", running.pid);
            stop_daemon(running.pid)?;

            let deadline = Instant::now() + STOP_TIMEOUT;
            while Instant::now() < deadline {
                if !is_process_running(running.pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(STOP_POLL_INTERVAL);
            }
            bail!("Daemon did not stop within {STOP_TIMEOUT:?}")
        }
        Command::Status => match running_daemon() {
            Some(running) => {
                match running.bind {
                    Some(bind) => println!("Daemon is running (PID {}) on {bind}", running.pid),
                    None => println!("Daemon is running (PID {})", running.pid),
                }
                Ok(())
            }
            None => {
                println!("Daemon is not running.");
                process::exit(1);
            }
        },
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

#[tokio::main]
async fn run_daemon(config: ServerConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sigrelayd=info".parse()?)
                .add_directive("sigrelay_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "sigrelay daemon starting"
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

    let registry = spawn_registry();
    info!("Path registry started");

    info!(
        bind = %config.bind,
        ping_interval_secs = config.ping_interval_secs,
        ping_timeout_secs = config.ping_timeout_secs,
        "Starting server"
    );
    let server = SignalingServer::new(config, registry, cancel_token);

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("sigrelay daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
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
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
