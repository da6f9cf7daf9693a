//! Perch daemon entrypoint.
//!
//! Wires the socket listener to the mood tracker: a background thread
//! accepts and decodes lifecycle notifications, while this thread owns
//! all state mutation and timers. The rendering layer reads the
//! tracker's published snapshot; nothing else touches its state.

use clap::{Parser, Subcommand};
use perch_daemon::installer;
use perch_daemon::listener::{Listener, DEFAULT_SOCKET_PATH};
use perch_daemon::tracker::Tracker;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "perch-daemon")]
#[command(about = "Mood-state tracker for Claude Code work sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default when no subcommand is given)
    Run {
        /// Socket path override
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },
    /// Install the Claude Code hook script and settings entries
    Install,
    /// Remove the hook script and settings entries
    Uninstall,
    /// Report hook and socket status
    Status,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run { socket: None }) {
        Commands::Run { socket } => run(socket),
        Commands::Install => match claude_dir() {
            Some(dir) => {
                if let Err(err) = installer::install(&dir) {
                    error!(error = %err, "Hook install failed");
                    std::process::exit(1);
                }
            }
            None => {
                error!("Home directory not found");
                std::process::exit(1);
            }
        },
        Commands::Uninstall => match claude_dir() {
            Some(dir) => {
                if let Err(err) = installer::uninstall(&dir) {
                    error!(error = %err, "Hook uninstall failed");
                    std::process::exit(1);
                }
            }
            None => {
                error!("Home directory not found");
                std::process::exit(1);
            }
        },
        Commands::Status => status(),
    }
}

fn run(socket: Option<PathBuf>) {
    let socket_path = socket
        .or_else(|| env::var_os("PERCH_SOCKET").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));

    match claude_dir() {
        Some(dir) if dir.exists() => {
            if let Err(err) = installer::install(&dir) {
                warn!(error = %err, "Hook install failed; events arrive only if wired manually");
            }
        }
        Some(_) => warn!("Claude Code not installed (~/.claude not found)"),
        None => warn!("Home directory not found; skipping hook install"),
    }

    let (events_tx, events_rx) = mpsc::channel();
    let mut listener = Listener::new(&socket_path);
    listener.start(move |event| {
        if events_tx.send(event).is_err() {
            warn!("Tracker loop stopped; dropping event");
        }
    });

    let mut tracker = Tracker::new();
    tracker.set_observer(|mood| info!(mood = mood.as_str(), "Mood changed"));

    info!(path = %socket_path.display(), "Perch daemon started");
    tracker.run(events_rx);
    listener.stop();
}

fn status() {
    let installed = claude_dir()
        .map(|dir| installer::is_installed(&dir))
        .unwrap_or(false);
    let socket_present = Path::new(DEFAULT_SOCKET_PATH).exists();

    println!("hook installed: {}", if installed { "yes" } else { "no" });
    println!(
        "daemon socket:  {} ({})",
        DEFAULT_SOCKET_PATH,
        if socket_present { "present" } else { "absent" }
    );
}

fn claude_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude"))
}

fn init_logging() {
    let debug_enabled = env::var("PERCH_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
