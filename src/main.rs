use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use procguard_lib::config::AgentConfig;

/// Browsers start native hosts with the calling extension's origin as the first argument.
const EXTENSION_ORIGIN_PREFIX: &str = "chrome-extension://";

#[derive(Parser)]
#[command(name = "procguard", version, about = "Activity monitor and block-list agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor loops and the control channel (default).
    Daemon,
    /// Serve the browser extension over stdin/stdout.
    NativeHost,
    /// Send one request to a running daemon and print the result.
    Ctl {
        method: String,
        /// JSON params, e.g. '{"since": "24 hours ago"}'.
        params: Option<String>,
    },
}

fn main() -> Result<()> {
    let launched_by_browser = std::env::args()
        .nth(1)
        .map_or(false, |arg| arg.starts_with(EXTENSION_ORIGIN_PREFIX));
    let command = if launched_by_browser {
        Command::NativeHost
    } else {
        Cli::parse().command.unwrap_or(Command::Daemon)
    };

    let config = AgentConfig::load()?;
    match &command {
        Command::NativeHost => procguard_lib::init_native_host_logging(&config)?,
        _ => procguard_lib::init_logging(),
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async move {
        match command {
            Command::Daemon => procguard_lib::run_daemon(config).await,
            Command::NativeHost => procguard_lib::run_native_host(config).await,
            Command::Ctl { method, params } => {
                procguard_lib::run_ctl(&config, &method, params.as_deref()).await
            }
        }
    });
    // A pending stdin read would otherwise keep the runtime alive after the host ends.
    runtime.shutdown_timeout(Duration::from_millis(200));
    result
}
