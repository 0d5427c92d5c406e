use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::native::{read_frame, write_frame};

use super::{protocol::Request, service::ControlService};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Answers requests on one connection, strictly one at a time.
pub async fn handle_connection<S>(stream: S, service: Arc<ControlService>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    loop {
        let body = match read_frame(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(err) => {
                log_warn!("control read failed: {err}");
                break;
            }
        };

        let request: Request = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(err) => {
                // Without an id there is nothing to correlate a reply with.
                log_warn!("dropping control connection after malformed request: {err}");
                break;
            }
        };

        let response = service.dispatch(request).await;
        if let Err(err) = write_frame(&mut writer, &response).await {
            log_warn!("control write failed: {err}");
            break;
        }
    }
}

#[cfg(unix)]
pub async fn serve(
    endpoint: String,
    service: Arc<ControlService>,
    cancel_token: CancellationToken,
) -> Result<()> {
    use std::{fs, os::unix::fs::PermissionsExt, path::Path};
    use tokio::net::UnixListener;

    let path = Path::new(&endpoint);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    if path.exists() {
        let _ = fs::remove_file(path);
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind control socket {endpoint}"))?;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    log_info!("control channel listening on {endpoint}");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    tokio::spawn(handle_connection(stream, service.clone()));
                }
                Err(err) => log_warn!("control accept failed: {err}"),
            },
            _ = cancel_token.cancelled() => break,
        }
    }

    let _ = fs::remove_file(path);
    log_info!("control channel stopped");
    Ok(())
}

#[cfg(windows)]
pub async fn serve(
    endpoint: String,
    service: Arc<ControlService>,
    cancel_token: CancellationToken,
) -> Result<()> {
    use tokio::net::windows::named_pipe::ServerOptions;

    let mut server = ServerOptions::new()
        .first_pipe_instance(true)
        .create(&endpoint)
        .with_context(|| format!("Failed to create control pipe {endpoint}"))?;
    log_info!("control channel listening on {endpoint}");

    loop {
        tokio::select! {
            connected = server.connect() => {
                if let Err(err) = connected {
                    log_warn!("control accept failed: {err}");
                    continue;
                }
                // A fresh instance must exist before the connected one is handed off.
                let next = ServerOptions::new()
                    .create(&endpoint)
                    .with_context(|| format!("Failed to create control pipe {endpoint}"))?;
                let connected = std::mem::replace(&mut server, next);
                tokio::spawn(handle_connection(connected, service.clone()));
            }
            _ = cancel_token.cancelled() => break,
        }
    }

    log_info!("control channel stopped");
    Ok(())
}
