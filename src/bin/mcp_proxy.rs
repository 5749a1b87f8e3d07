//! Standalone stdio MCP proxy
//!
//! Equivalent to `gorev mcp-proxy`, for client configurations that launch a
//! single command. Logs go to stderr; stdout carries JSON-RPC only.

use anyhow::Result;
use clap::Parser;
use gorev::daemon::lockfile;
use gorev::mcp::proxy::{self, ProxyArgs};
use gorev::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gorev-mcp-proxy")]
#[command(about = "Forward an MCP stdio session to the Gorev daemon", version = gorev::VERSION)]
struct Cli {
    /// Daemon lock file (default: ~/.gorev-daemon/.lock)
    #[arg(long, env = "GOREV_LOCK_FILE")]
    lock_file: Option<PathBuf>,

    #[command(flatten)]
    args: ProxyArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    gorev::init_tracing(true);

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let lock_path = cli.lock_file.unwrap_or_else(lockfile::default_lock_path);

    proxy::run(cli.args.into_options(lock_path, config.api_port)).await
}
