use std::path::PathBuf;

use async_trait::async_trait;
use common::ipc::{decode, encode};
use common::{Error, Request, Response, Transport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// One connection per request: write a line, read a line.
pub struct SocketTransport {
    path: PathBuf,
}

impl SocketTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The system socket when a daemon is listening there, else the
    /// per-user one.
    pub fn default_path() -> PathBuf {
        let system = PathBuf::from(common::DEFAULT_SOCKET_PATH);
        if system.exists() {
            system
        } else {
            PathBuf::from(common::USER_SOCKET_PATH)
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn send(&self, request: Request) -> common::Result<Response> {
        let mut stream = UnixStream::connect(&self.path).await.map_err(|e| {
            Error::transport(format!("Could not connect to {}: {}", self.path.display(), e))
        })?;

        stream.write_all(&encode(&request)?).await?;

        let mut line = String::new();
        let mut reader = BufReader::new(stream);
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::transport(format!(
                "Connection closed before a reply to {}",
                request.name()
            )));
        }
        Ok(decode(&line)?)
    }
}
