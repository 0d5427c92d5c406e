use std::{
    path::PathBuf,
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::AgentConfig,
    db::{helpers::unix_now, repositories::BlockListKind, Database},
};

use super::{
    codec::{read_frame, write_frame},
    heartbeat::{heartbeat_loop, write_heartbeat},
    messages::{Envelope, LogUrlPayload, WebMetadataPayload},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const OUTBOUND_CAPACITY: usize = 32;

/// The browser-facing bridge. One instance serves one extension connection.
pub struct NativeHost {
    db: Database,
    gui_origin: String,
    blocklist_poll: Duration,
    heartbeat_interval: Duration,
    heartbeat_path: PathBuf,
    shutdown_marker_path: PathBuf,
}

impl NativeHost {
    pub fn new(db: Database, config: &AgentConfig) -> Self {
        Self {
            db,
            gui_origin: config.gui_origin.clone(),
            blocklist_poll: config.intervals.web_blocklist_poll(),
            heartbeat_interval: config.intervals.heartbeat(),
            heartbeat_path: config.heartbeat_path(),
            shutdown_marker_path: config.shutdown_marker_path(),
        }
    }

    /// Serves frames until end of stream, a read error, or a deliberate shutdown.
    pub async fn run<R, W>(self, mut reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let started = SystemTime::now();
        let cancel_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<Envelope>(OUTBOUND_CAPACITY);

        let writer_task = tokio::spawn(writer_loop(writer, rx, cancel_token.clone()));
        let workers: Vec<JoinHandle<()>> = vec![
            tokio::spawn(blocklist_push_loop(
                self.db.clone(),
                tx.clone(),
                self.blocklist_poll,
                cancel_token.clone(),
            )),
            tokio::spawn(heartbeat_loop(
                self.heartbeat_path.clone(),
                self.heartbeat_interval,
                cancel_token.clone(),
            )),
            tokio::spawn(stop_watch_loop(
                self.shutdown_marker_path.clone(),
                started,
                self.blocklist_poll,
                tx.clone(),
                cancel_token.clone(),
            )),
        ];
        log_info!("native host started");

        loop {
            let frame = tokio::select! {
                frame = read_frame(&mut reader) => frame,
                _ = cancel_token.cancelled() => break,
            };

            let body = match frame {
                Ok(Some(body)) => body,
                Ok(None) => {
                    log_info!("extension closed the stream");
                    break;
                }
                Err(err) => {
                    log_error!("native messaging read failed: {err}");
                    break;
                }
            };

            if let Err(err) = write_heartbeat(&self.heartbeat_path) {
                log_warn!("{err:?}");
            }

            let envelope: Envelope = match serde_json::from_slice(&body) {
                Ok(envelope) => envelope,
                Err(err) => {
                    log_warn!("dropping malformed message: {err}");
                    continue;
                }
            };

            match self.handle(envelope).await {
                Ok(Some(reply)) => {
                    if tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => log_warn!("{err:?}"),
            }
        }

        cancel_token.cancel();
        for worker in workers {
            worker.await.context("native host task failed to join")?;
        }
        // Queued replies and a `stopping` push still go out before the writer ends.
        drop(tx);
        writer_task.await.context("native host writer failed to join")?;
        log_info!("native host stopped");
        Ok(())
    }

    async fn handle(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        match envelope.kind.as_str() {
            "ping" => Ok(Some(Envelope::new("pong", envelope.payload))),
            "log_url" => {
                let visit: LogUrlPayload = serde_json::from_value(envelope.payload)
                    .context("invalid log_url payload")?;
                if !self.gui_origin.is_empty() && visit.url.starts_with(&self.gui_origin) {
                    return Ok(None);
                }
                self.db
                    .log_web_visit(&visit.url, &visit.title, visit.visit_timestamp(unix_now()));
                Ok(None)
            }
            "log_web_metadata" => {
                let meta: WebMetadataPayload = serde_json::from_value(envelope.payload)
                    .context("invalid log_web_metadata payload")?;
                let domain = meta.domain.trim();
                if !domain.is_empty() {
                    self.db
                        .upsert_web_metadata(domain, &meta.title, &meta.icon_url, unix_now());
                }
                Ok(None)
            }
            "get_web_blocklist" => {
                // Always answer; the extension waits on this reply.
                let domains = self.db.load_web_blocklist().await.unwrap_or_else(|err| {
                    log_error!("failed to load web block list: {err:#}");
                    Vec::new()
                });
                Ok(Some(Envelope::web_blocklist(&domains)))
            }
            "add_to_web_blocklist" => {
                let Value::String(domain) = envelope.payload else {
                    anyhow::bail!("add_to_web_blocklist expects a domain string");
                };
                let added = self.db.add_to_blocklist(BlockListKind::Web, &[domain]);
                self.db.flush().await?;
                log_info!("extension blocked {added:?}");
                Ok(None)
            }
            other => {
                log_warn!("ignoring unknown message type {other}");
                Ok(None)
            }
        }
    }
}

/// Sole owner of the output stream, so frames never interleave.
async fn writer_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Envelope>, cancel_token: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = rx.recv().await {
        if let Err(err) = write_frame(&mut writer, &envelope).await {
            log_error!("native messaging write failed: {err}");
            cancel_token.cancel();
            break;
        }
    }
}

/// Pushes the web block list whenever it differs from the last pushed one.
async fn blocklist_push_loop(
    db: Database,
    tx: mpsc::Sender<Envelope>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_pushed: Option<Vec<String>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = match db.load_web_blocklist().await {
                    Ok(current) => current,
                    Err(err) => {
                        log_warn!("failed to load web block list: {err:?}");
                        continue;
                    }
                };
                if last_pushed.as_ref() == Some(&current) {
                    continue;
                }
                if tx.send(Envelope::web_blocklist(&current)).await.is_err() {
                    break;
                }
                last_pushed = Some(current);
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

/// Ends the host when the daemon leaves a shutdown marker newer than this host.
async fn stop_watch_loop(
    marker: PathBuf,
    started: SystemTime,
    period: Duration,
    tx: mpsc::Sender<Envelope>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let requested = std::fs::metadata(&marker)
                    .and_then(|meta| meta.modified())
                    .map(|modified| modified > started)
                    .unwrap_or(false);
                if requested {
                    log_info!("shutdown requested, telling the extension to stay disconnected");
                    let _ = tx.send(Envelope::stopping()).await;
                    cancel_token.cancel();
                    break;
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}
