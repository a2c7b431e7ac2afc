//! Chat Trek Daemon - chat room server with scripted crew bots
//!
//! Runs the TCP chat listener, the admin HTTP surface and the bots in
//! one process.
//!
//! # Usage
//!
//! ```bash
//! # Start in the foreground
//! trekd start
//!
//! # Start in the background
//! trekd start -d
//!
//! # Custom config file and listener
//! trekd --config /etc/trek.toml start --chat-addr 0.0.0.0:9000
//!
//! # Stop the daemon / check whether it runs
//! trekd stop
//! trekd status
//!
//! # Enable debug logging
//! RUST_LOG=trekd=debug trekd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::fs::{self, File};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trekd::admin::serve_admin;
use trekd::config::Config;
use trekd::flavor::{Chance, ScriptedFlavor};
use trekd::naming::NameAllocator;
use trekd::participant::spawn_bots;
use trekd::registry::Registry;
use trekd::router::Router;
use trekd::server::{ChatServer, SessionSettings};

/// Chat Trek daemon
#[derive(Parser, Debug)]
#[command(name = "trekd", version, about)]
struct Args {
    /// TOML config file (falls back to $TREK_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start(StartArgs),
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

#[derive(ClapArgs, Debug, Default)]
struct StartArgs {
    /// Run as a background daemon (fork to background)
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Chat listener address
    #[arg(long)]
    chat_addr: Option<SocketAddr>,

    /// Admin HTTP listener address
    #[arg(long)]
    admin_addr: Option<SocketAddr>,

    /// Do not start any bots
    #[arg(long)]
    no_bots: bool,
}

impl StartArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.chat_addr {
            config.chat_addr = addr;
        }
        if let Some(addr) = self.admin_addr {
            config.admin_addr = addr;
        }
        if self.no_bots {
            config.bots.enabled = false;
        }
    }
}

// ============================================================================
// Process lifecycle
// ============================================================================

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("trek")
}

/// PID file of a running daemon.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn new() -> Self {
        Self {
            path: state_dir().join("trekd.pid"),
        }
    }

    fn read(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        fs::write(&self.path, process::id().to_string()).context("Failed to write PID file")
    }

    fn remove(&self) {
        let _ = fs::remove_file(&self.path);
    }

    /// PID of the running daemon; a stale file is removed.
    fn running(&self) -> Option<u32> {
        let pid = self.read()?;
        if is_process_running(pid) {
            return Some(pid);
        }
        self.remove();
        None
    }
}

fn is_process_running(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

fn send_sigterm(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let pid = i32::try_from(pid).context("PID out of range")?;
        let result = unsafe { libc::kill(pid, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = state_dir().join("trekd.log");
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

fn main() -> Result<()> {
    let args = Args::parse();
    let pid_file = PidFile::new();

    match args.command.unwrap_or(Command::Start(StartArgs::default())) {
        Command::Start(start) => {
            // Load before forking so config errors reach the terminal.
            let mut config = Config::load(args.config.as_deref()).context("Failed to load config")?;
            start.apply(&mut config);
            config.validate().context("Invalid configuration")?;

            if let Some(pid) = pid_file.running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'trekd stop' to stop it first.");
                process::exit(1);
            }

            if start.daemon {
                daemonize()?;
            }

            pid_file.write()?;
            let result = run_daemon(config);
            pid_file.remove();
            result
        }
        Command::Stop => {
            let Some(pid) = pid_file.running() else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {pid})...");
            send_sigterm(pid)?;

            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(100));
            }

            eprintln!("Daemon did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => match pid_file.running() {
            Some(pid) => {
                println!("Daemon is running (PID {pid})");
                if let Ok(config) = Config::load(args.config.as_deref()) {
                    println!("Chat:  {}", config.chat_addr);
                    println!("Admin: http://{}/debug/chat/status", config.admin_addr);
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

// ============================================================================
// Daemon
// ============================================================================

#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("trekd=info".parse()?)
                .add_directive("trek_core=info".parse()?)
                .add_directive("trek_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Chat Trek daemon starting"
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

    let router = Router::new(Registry::new(NameAllocator::from_config(&config.naming)));

    let chat_listener = TcpListener::bind(config.chat_addr)
        .await
        .with_context(|| format!("Failed to bind chat listener on {}", config.chat_addr))?;
    let admin_listener = TcpListener::bind(config.admin_addr)
        .await
        .with_context(|| format!("Failed to bind admin listener on {}", config.admin_addr))?;

    let bots = if config.bots.enabled {
        spawn_bots(&router, &config.bots, cancel_token.clone()).await
    } else {
        info!("Bots disabled");
        Vec::new()
    };

    let admin = tokio::spawn(serve_admin(admin_listener, router.clone(), cancel_token.clone()));

    let settings = SessionSettings {
        write_timeout: config.write_timeout(),
        enhancer: Arc::new(Chance::new(
            ScriptedFlavor::star_trek(),
            config.enhance_probability,
        )),
    };
    let server = ChatServer::new(
        config.chat_addr,
        router,
        settings,
        config.max_connections,
        cancel_token.clone(),
    );

    if let Err(e) = server.serve(chat_listener).await {
        error!(error = %e, "Server error");
        cancel_token.cancel();
        return Err(e.into());
    }

    match admin.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Admin server error"),
        Err(e) => warn!(error = %e, "Admin server task failed"),
    }
    for bot in bots {
        if let Err(e) = bot.await {
            warn!(error = %e, "Bot task failed");
        }
    }

    info!("Chat Trek daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
