//! Line protocol: one `<command> [args...]` line per TCP connection, one
//! plain-text reply, then the server closes the connection.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread::sleep;
use std::time::Duration;

use serde_json::Value;

use crate::error::{io_err, DaemonError};

/// Longest request line the server accepts.
pub const MAX_REQUEST_BYTES: usize = 4096;

/// How long the server waits for a connected client to send its line.
pub const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a client waits for the reply. Generous: a restore in progress
/// holds the daemon's only thread.
pub const CLIENT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix of every error reply.
pub const ERROR_PREFIX: &str = "error: ";

/// One parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Lower-cased command name.
    pub command: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    /// Split a request line on whitespace. Blank lines are rejected.
    pub fn parse(line: &str) -> Result<Self, DaemonError> {
        let mut words = line.split_whitespace();
        let command = words
            .next()
            .ok_or_else(|| DaemonError::Protocol("empty command".to_string()))?
            .to_ascii_lowercase();
        Ok(Self {
            command,
            args: words.map(str::to_string).collect(),
        })
    }
}

pub fn error_reply(message: impl std::fmt::Display) -> String {
    format!("{ERROR_PREFIX}{message}")
}

/// Send one request line and return the daemon's reply body.
pub fn send_command(addr: &str, line: &str) -> Result<String, DaemonError> {
    let mut stream = TcpStream::connect(addr).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                addr: addr.to_string(),
            }
        } else {
            io_err(addr, err)
        }
    })?;
    stream
        .set_read_timeout(Some(CLIENT_REPLY_TIMEOUT))
        .map_err(|e| io_err(addr, e))?;

    stream
        .write_all(line.trim_end().as_bytes())
        .map_err(|e| io_err(addr, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(addr, e))?;
    stream.flush().map_err(|e| io_err(addr, e))?;
    let _ = stream.shutdown(Shutdown::Write);

    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .map_err(|e| io_err(addr, e))?;
    if reply.is_empty() {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }
    Ok(reply)
}

pub fn request_status(addr: &str) -> Result<Value, DaemonError> {
    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_command(addr, "status") {
            Ok(reply) => return reply_into_json(&reply),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stats(addr: &str) -> Result<Value, DaemonError> {
    reply_into_json(&send_command(addr, "stats")?)
}

pub fn request_terminate(addr: &str) -> Result<(), DaemonError> {
    let reply = send_command(addr, "terminate")?;
    reply_into_text(reply).map(|_| ())
}

/// Turn an `error: ...` reply into [`DaemonError::Protocol`].
pub fn reply_into_text(reply: String) -> Result<String, DaemonError> {
    match reply.strip_prefix(ERROR_PREFIX) {
        Some(message) => Err(DaemonError::Protocol(message.trim().to_string())),
        None => Ok(reply),
    }
}

fn reply_into_json(reply: &str) -> Result<Value, DaemonError> {
    let text = reply_into_text(reply.to_string())?;
    Ok(serde_json::from_str(&text)?)
}
