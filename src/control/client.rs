use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::native::{read_frame, write_frame, FrameError};

use super::protocol::{Request, Response};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("connection closed by agent")]
    Closed,
    #[error("response id {got} does not match request id {expected}")]
    IdMismatch { expected: String, got: String },
    #[error("{0}")]
    Remote(String),
}

trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Connects lazily and reconnects after any transport or protocol failure.
/// Taking `&mut self` keeps one exchange in flight per connection.
pub struct ControlClient {
    endpoint: String,
    conn: Option<Box<dyn Transport>>,
}

impl ControlClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            conn: None,
        }
    }

    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value, ControlError> {
        let request = Request {
            id: Uuid::new_v4().to_string(),
            method: method.to_string(),
            params,
        };

        if self.conn.is_none() {
            self.conn = Some(connect(&self.endpoint).await?);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(ControlError::Closed);
        };

        let response = match exchange(conn, &request).await {
            Ok(response) => response,
            Err(err) => {
                self.conn = None;
                return Err(err);
            }
        };

        if response.id != request.id {
            self.conn = None;
            return Err(ControlError::IdMismatch {
                expected: request.id,
                got: response.id,
            });
        }

        match (response.result, response.error) {
            (_, Some(error)) => Err(ControlError::Remote(error)),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

async fn exchange(conn: &mut Box<dyn Transport>, request: &Request) -> Result<Response, ControlError> {
    write_frame(conn, request).await?;
    let body = read_frame(conn).await?.ok_or(ControlError::Closed)?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(unix)]
async fn connect(endpoint: &str) -> Result<Box<dyn Transport>, ControlError> {
    let stream = tokio::net::UnixStream::connect(endpoint)
        .await
        .map_err(|source| ControlError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
async fn connect(endpoint: &str) -> Result<Box<dyn Transport>, ControlError> {
    let pipe = tokio::net::windows::named_pipe::ClientOptions::new()
        .open(endpoint)
        .map_err(|source| ControlError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
    Ok(Box::new(pipe))
}
