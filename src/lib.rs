pub mod auth;
pub mod config;
pub mod control;
pub mod db;
pub mod monitor;
pub mod native;
pub mod platform;
pub mod policy;
pub mod settings;
pub mod utils;

use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use config::AgentConfig;
use control::{ControlClient, ControlService};
use db::Database;
use monitor::MonitorController;
use native::NativeHost;
use settings::SettingsStore;

/// Console logging for the daemon and `ctl`; `RUST_LOG` overrides the `info` default.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// stdout carries protocol frames in native-host mode, so logs go to a file.
pub fn init_native_host_logging(config: &AgentConfig) -> Result<()> {
    let log_dir = config.log_dir();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create {}", log_dir.display()))?;
    let log_path = log_dir.join("native_host.log");
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

/// Runs the monitor loops and the control channel until Ctrl-C or a `stop` request.
pub async fn run_daemon(config: AgentConfig) -> Result<()> {
    info!("ProcGuard daemon starting up...");
    config.ensure_dirs()?;
    let _ = fs::remove_file(config.shutdown_marker_path());

    let database = Database::new(config.database_path())?;
    let settings = Arc::new(SettingsStore::new(config.settings_path())?);

    let mut monitors = MonitorController::start(
        &database,
        &config,
        platform::current_inspector(),
        platform::new_process_table,
    );

    let stop_token = CancellationToken::new();
    let service = Arc::new(ControlService::new(
        database.clone(),
        settings,
        monitors.resets(),
        &config,
        stop_token.clone(),
    ));
    let server = tokio::spawn(control::serve(
        config.control_endpoint(),
        service,
        stop_token.clone(),
    ));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!("failed to listen for Ctrl-C: {err}");
            }
            info!("interrupt received, shutting down");
        }
        _ = stop_token.cancelled() => info!("stop requested, shutting down"),
    }
    stop_token.cancel();

    monitors.shutdown().await?;
    // Lets the reply to `stop` reach its caller and in-flight writes land.
    tokio::time::sleep(config.intervals.shutdown_grace()).await;
    database.flush().await?;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("control channel failed: {err:?}"),
        Err(err) => error!("control channel task failed to join: {err}"),
    }
    info!("ProcGuard daemon stopped");
    Ok(())
}

/// Serves the browser extension over stdin/stdout until it disconnects.
pub async fn run_native_host(config: AgentConfig) -> Result<()> {
    config.ensure_dirs()?;
    let database = Database::new(config.database_path())?;
    NativeHost::new(database, &config)
        .run(tokio::io::stdin(), tokio::io::stdout())
        .await
}

/// One control request; prints the JSON result.
pub async fn run_ctl(config: &AgentConfig, method: &str, params: Option<&str>) -> Result<()> {
    let params = match params {
        Some(raw) => serde_json::from_str(raw).context("params must be valid JSON")?,
        None => serde_json::Value::Null,
    };

    let mut client = ControlClient::new(config.control_endpoint());
    let result = client.call(method, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
