use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ipcbridge::{expand_user, ConnectionGate, Proxy};

#[cfg(windows)]
const DEFAULT_BACKEND_PATH: &str = r"\\.\pipe\geth.ipc";
#[cfg(windows)]
const BACKEND_PATH_HELP: &str = "Named pipe of the backend RPC server";
#[cfg(not(windows))]
const DEFAULT_BACKEND_PATH: &str = "~/.ethereum/geth.ipc";
#[cfg(not(windows))]
const BACKEND_PATH_HELP: &str = "Unix socket of the backend RPC server";

const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:8545";

#[derive(Parser, Debug)]
#[command(
    name = "ipcbridge",
    version,
    about = "HTTP proxy for JSON-RPC servers reachable only over local IPC"
)]
struct Cli {
    #[arg(help = BACKEND_PATH_HELP, default_value = DEFAULT_BACKEND_PATH)]
    backend_path: String,

    /// URL for this proxy server
    #[arg(default_value = DEFAULT_PROXY_URL)]
    proxy_url: String,

    /// Print per-request details
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ipcbridge: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let backend_path = expand_user(&cli.backend_path);
    let proxy = Proxy::new(&cli.proxy_url, backend_path.clone())
        .with_context(|| format!("cannot serve on '{}'", cli.proxy_url))?;

    proxy
        .await_backend(ConnectionGate::default())
        .with_context(|| format!("backend '{}' did not become ready", backend_path.display()))?;

    info!(
        "ipcbridge JSON-RPC HTTP Proxy: {} -> {}",
        backend_path.display(),
        cli.proxy_url
    );

    let (_addr, running, handle) = proxy.start().context("failed to start proxy listener")?;

    let running_cl = running.clone();
    ctrlc::set_handler(move || {
        running_cl.store(false, Ordering::SeqCst);
    })
    .context("failed to install interrupt handler")?;

    if handle.join().is_err() {
        anyhow::bail!("proxy listener thread panicked");
    }
    info!("shutdown complete");
    Ok(())
}
