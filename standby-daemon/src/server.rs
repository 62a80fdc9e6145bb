//! TCP command server polled once per scheduler tick.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{io_err, DaemonError};
use crate::protocol::{CommandRequest, CLIENT_READ_TIMEOUT, MAX_REQUEST_BYTES};

/// The daemon's listening socket.
pub struct CommandServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

/// A connected client whose request line has been read.
pub struct PendingRequest {
    stream: TcpStream,
    peer: SocketAddr,
    request: Result<CommandRequest, String>,
}

impl CommandServer {
    /// Bind the listener. Failure here is fatal for the daemon.
    pub async fn bind(addr: &str) -> Result<Self, DaemonError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| DaemonError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|e| io_err(addr, e))?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait up to `wait` for one client and read its request line.
    ///
    /// `None` on timeout, which is the outcome of most ticks. Accept errors
    /// are logged and also yield `None`.
    pub async fn accept_once(&self, wait: Duration) -> Option<PendingRequest> {
        let (stream, peer) = match tokio::time::timeout(wait, self.listener.accept()).await {
            Err(_elapsed) => return None,
            Ok(Ok(accepted)) => accepted,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "accept failed");
                return None;
            }
        };
        Some(PendingRequest::read(stream, peer).await)
    }
}

impl PendingRequest {
    async fn read(mut stream: TcpStream, peer: SocketAddr) -> Self {
        let request = match tokio::time::timeout(CLIENT_READ_TIMEOUT, read_line(&mut stream)).await
        {
            Err(_elapsed) => Err("timed out waiting for request line".to_string()),
            Ok(Err(reason)) => Err(reason),
            Ok(Ok(line)) => CommandRequest::parse(&line).map_err(|_| "empty command".to_string()),
        };
        Self {
            stream,
            peer,
            request,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The parsed request, or why the line was rejected.
    pub fn request(&self) -> Result<&CommandRequest, &str> {
        self.request.as_ref().map_err(String::as_str)
    }

    /// Write `body` and close the connection.
    pub async fn respond(mut self, body: &str) -> Result<(), DaemonError> {
        let context = format!("client {}", self.peer);
        self.stream
            .write_all(body.as_bytes())
            .await
            .map_err(|e| io_err(&context, e))?;
        if !body.ends_with('\n') {
            self.stream
                .write_all(b"\n")
                .await
                .map_err(|e| io_err(&context, e))?;
        }
        self.stream
            .shutdown()
            .await
            .map_err(|e| io_err(&context, e))?;
        Ok(())
    }
}

async fn read_line(stream: &mut TcpStream) -> Result<String, String> {
    let mut reader = BufReader::new(stream.take(MAX_REQUEST_BYTES as u64 + 1));
    let mut buf = Vec::new();
    reader
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|err| format!("read failed: {err}"))?;
    if buf.len() > MAX_REQUEST_BYTES {
        return Err(format!("request longer than {MAX_REQUEST_BYTES} bytes"));
    }
    String::from_utf8(buf).map_err(|_| "request is not valid UTF-8".to_string())
}
