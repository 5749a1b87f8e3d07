//! Gorev - daemon and command-line entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use gorev::daemon::{self, lockfile};
use gorev::i18n::Lang;
use gorev::mcp::proxy::{self, ProxyArgs};
use gorev::Config;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gorev")]
#[command(about = "Task-management daemon for AI assistants", version = gorev::VERSION)]
struct Cli {
    /// Shared config file (default: ~/.gorev/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon lock file (default: ~/.gorev-daemon/.lock)
    #[arg(long, env = "GOREV_LOCK_FILE", global = true)]
    lock_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in the foreground
    Daemon {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Default language (tr or en)
        #[arg(long)]
        lang: Option<String>,
    },

    /// Show whether a daemon is running
    DaemonStatus,

    /// Stop the running daemon
    DaemonStop {
        /// Seconds to wait for the daemon to exit
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Serve MCP over stdio, forwarding to the daemon
    McpProxy {
        #[command(flatten)]
        args: ProxyArgs,
    },

    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let stdio = matches!(cli.command, Commands::McpProxy { .. });
    gorev::init_tracing(stdio);

    let mut config = Config::from_env_and_file(cli.config.as_deref())?;
    let lock_path = cli.lock_file.unwrap_or_else(lockfile::default_lock_path);

    match cli.command {
        Commands::Daemon { port, lang } => {
            if let Some(port) = port {
                config.api_port = port;
            }
            if let Some(lang) = lang.as_deref().and_then(Lang::parse) {
                config.lang = lang;
            }
            daemon::run_daemon(config, &lock_path).await
        }
        Commands::DaemonStatus => daemon_status(&lock_path).await,
        Commands::DaemonStop { timeout } => {
            if daemon::stop_daemon(&lock_path, Duration::from_secs(timeout)).await? {
                println!("Daemon stopped");
            } else {
                println!("No daemon running");
            }
            Ok(())
        }
        Commands::McpProxy { args } => proxy::run(args.into_options(lock_path, config.api_port)).await,
        Commands::Version => {
            println!("gorev {}", gorev::VERSION);
            Ok(())
        }
    }
}

async fn daemon_status(lock_path: &std::path::Path) -> Result<()> {
    let Some(lock) = lockfile::read(lock_path)? else {
        println!("Daemon not running (no lock file at {})", lock_path.display());
        return Ok(());
    };
    let alive = lockfile::is_process_running(lock.pid);
    let healthy = alive && daemon::is_daemon_healthy(&lock.daemon_url).await;

    println!("pid:        {}", lock.pid);
    println!("url:        {}", lock.daemon_url);
    println!("version:    {}", lock.version);
    println!("started:    {}", lock.start_time.to_rfc3339());
    println!(
        "state:      {}",
        match (alive, healthy) {
            (true, true) => "running",
            (true, false) => "unhealthy",
            _ => "stale lock (process not running)",
        }
    );
    Ok(())
}
