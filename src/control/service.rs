use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::Authenticator,
    config::AgentConfig,
    db::{
        helpers::{local_midnight_unix, unix_now},
        repositories::BlockListKind,
        Database, WebMetadata,
    },
    monitor::ResetSignals,
    native::extension_status,
    settings::SettingsStore,
    utils::parse_bound,
};

use super::protocol::{Request, Response};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RangeParams {
    query: Option<String>,
    since: Option<String>,
    until: Option<String>,
}

impl RangeParams {
    fn bounds(&self) -> Result<(Option<i64>, Option<i64>)> {
        Ok((
            parse_bound(self.since.as_deref())?,
            parse_bound(self.until.as_deref())?,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct NamesParams {
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DomainParams {
    domain: String,
}

#[derive(Debug, Deserialize)]
struct ContentParams {
    content: String,
}

#[derive(Debug, Deserialize)]
struct PasswordParams {
    password: String,
}

#[derive(Debug, Deserialize)]
struct EnabledParams {
    enabled: bool,
}

fn params<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value).with_context(|| format!("invalid params for {method}"))
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// The agent's administrative surface behind the control channel.
pub struct ControlService {
    db: Database,
    auth: Authenticator,
    settings: Arc<SettingsStore>,
    resets: ResetSignals,
    heartbeat_path: PathBuf,
    heartbeat_interval: Duration,
    shutdown_marker_path: PathBuf,
    stop_token: CancellationToken,
}

impl ControlService {
    pub fn new(
        db: Database,
        settings: Arc<SettingsStore>,
        resets: ResetSignals,
        config: &AgentConfig,
        stop_token: CancellationToken,
    ) -> Self {
        Self {
            db,
            auth: Authenticator::new(settings.clone()),
            settings,
            resets,
            heartbeat_path: config.heartbeat_path(),
            heartbeat_interval: config.intervals.heartbeat(),
            shutdown_marker_path: config.shutdown_marker_path(),
            stop_token,
        }
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        match self.call(&request.method, request.params).await {
            Ok(result) => Response::ok(request.id, result),
            Err(err) => {
                log_warn!("control method {} failed: {err:#}", request.method);
                Response::err(request.id, err.to_string())
            }
        }
    }

    async fn call(&self, method: &str, raw: Value) -> Result<Value> {
        match method {
            "get_app_leaderboard" => {
                let (since, until) = params::<RangeParams>(method, raw)?.bounds()?;
                to_json(self.db.app_leaderboard(since, until).await?)
            }
            "get_web_leaderboard" => {
                let (since, until) = params::<RangeParams>(method, raw)?.bounds()?;
                to_json(self.db.web_leaderboard(since, until).await?)
            }
            "search_app_events" => {
                let p: RangeParams = params(method, raw)?;
                let (since, until) = p.bounds()?;
                to_json(self.db.search_app_events(p.query, since, until).await?)
            }
            "get_web_logs" => {
                let p: RangeParams = params(method, raw)?;
                let (since, until) = p.bounds()?;
                to_json(self.db.web_logs(p.query, since, until).await?)
            }
            "get_screen_time" => to_json(self.db.screen_time_since(local_midnight_unix()).await?),
            "get_total_screen_time" => {
                to_json(self.db.total_screen_time_since(local_midnight_unix()).await?)
            }
            "get_web_details" => {
                let p: DomainParams = params(method, raw)?;
                let meta = self.db.get_web_metadata(&p.domain).await?;
                to_json(meta.unwrap_or(WebMetadata {
                    domain: p.domain,
                    ..WebMetadata::default()
                }))
            }

            "get_app_blocklist" => to_json(self.db.load_app_blocklist().await?),
            "block_apps" => {
                let p: NamesParams = params(method, raw)?;
                to_json(
                    self.db
                        .insert_into_blocklist(BlockListKind::Apps, p.names.as_slice())
                        .await?,
                )
            }
            "unblock_apps" => {
                let p: NamesParams = params(method, raw)?;
                self.db.remove_from_blocklist(BlockListKind::Apps, p.names.as_slice());
                self.db.flush().await?;
                Ok(Value::Bool(true))
            }
            "clear_app_blocklist" => self.clear_blocklist(BlockListKind::Apps).await,
            "export_app_blocklist" => to_json(self.db.export_blocklist(BlockListKind::Apps).await?),
            "import_app_blocklist" => {
                let p: ContentParams = params(method, raw)?;
                to_json(self.db.import_blocklist(BlockListKind::Apps, &p.content).await?)
            }

            "get_web_blocklist" => to_json(self.db.load_web_blocklist().await?),
            "add_web_blocklist" => {
                let p: DomainParams = params(method, raw)?;
                to_json(self.db.insert_into_blocklist(BlockListKind::Web, &[p.domain]).await?)
            }
            "remove_web_blocklist" => {
                let p: DomainParams = params(method, raw)?;
                self.db.remove_from_blocklist(BlockListKind::Web, &[p.domain]);
                self.db.flush().await?;
                Ok(Value::Bool(true))
            }
            "clear_web_blocklist" => self.clear_blocklist(BlockListKind::Web).await,
            "export_web_blocklist" => to_json(self.db.export_blocklist(BlockListKind::Web).await?),
            "import_web_blocklist" => {
                let p: ContentParams = params(method, raw)?;
                to_json(self.db.import_blocklist(BlockListKind::Web, &p.content).await?)
            }

            "has_password" => Ok(Value::Bool(self.auth.has_password())),
            "set_password" => {
                let p: PasswordParams = params(method, raw)?;
                self.auth.set_password(&p.password)?;
                Ok(Value::Bool(true))
            }
            "login" => {
                let p: PasswordParams = params(method, raw)?;
                Ok(Value::Bool(self.auth.login(&p.password)))
            }
            "logout" => {
                self.auth.logout();
                Ok(Value::Bool(true))
            }
            "is_authenticated" => Ok(Value::Bool(self.auth.is_authenticated())),

            "clear_app_history" => {
                let p: PasswordParams = params(method, raw)?;
                self.auth.require(&p.password)?;
                self.db.clear_app_history();
                self.db.flush().await?;
                self.resets.fire();
                log_info!("app history cleared");
                Ok(Value::Bool(true))
            }
            "clear_web_history" => {
                let p: PasswordParams = params(method, raw)?;
                self.auth.require(&p.password)?;
                self.db.clear_web_history();
                self.db.flush().await?;
                log_info!("web history cleared");
                Ok(Value::Bool(true))
            }

            "get_autostart_status" => Ok(Value::Bool(self.settings.autostart_enabled())),
            "set_autostart" => {
                let p: EnabledParams = params(method, raw)?;
                self.settings.set_autostart_enabled(p.enabled)?;
                Ok(Value::Bool(p.enabled))
            }

            "get_extension_status" => {
                to_json(extension_status(&self.heartbeat_path, self.heartbeat_interval))
            }

            "stop" => {
                self.request_stop()?;
                Ok(Value::Bool(true))
            }

            other => Err(anyhow!("unknown method: {other}")),
        }
    }

    async fn clear_blocklist(&self, kind: BlockListKind) -> Result<Value> {
        self.db.clear_blocklist(kind);
        self.db.flush().await?;
        Ok(Value::Bool(true))
    }

    /// Leaves the marker native hosts watch for, then signals the daemon.
    fn request_stop(&self) -> Result<()> {
        if let Some(parent) = self.shutdown_marker_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&self.shutdown_marker_path, unix_now().to_string()).with_context(|| {
            format!(
                "Failed to write shutdown marker {}",
                self.shutdown_marker_path.display()
            )
        })?;
        log_info!("stop requested over the control channel");
        self.stop_token.cancel();
        Ok(())
    }
}
