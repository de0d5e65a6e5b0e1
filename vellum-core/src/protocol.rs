//! Wire protocol framing for the sync protocol.
//!
//! Transport is a single bidirectional byte stream. Control messages are
//! UTF-8 text terminated by `\n`; binary payloads are preceded by a decimal
//! length line and read as exactly that many raw bytes, never
//! newline-terminated (payload bytes may contain `\n`). The sentinel
//! `origin` stands in for "no commit" wherever a tip hash is exchanged.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::object::ObjectId;

/// Sentinel for "no parent" / "unborn branch" on the wire.
pub const SENTINEL_ORIGIN: &str = "origin";

pub const TOKEN_OK: &str = "OK";
pub const TOKEN_END: &str = "END";
pub const COMMITS_PREFIX: &str = "COMMITS ";
pub const UPDATE_REF_PREFIX: &str = "UPDATE_REF ";

/// Maximum single frame size (256 MB).
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Control lines are short; anything longer is not this protocol.
pub const MAX_LINE_LEN: usize = 4096;

/// Default per-operation socket timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// The three session-opening commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Push,
    Fetch,
    Pull,
}

impl SyncCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncCommand::Push => "PUSH",
            SyncCommand::Fetch => "FETCH",
            SyncCommand::Pull => "PULL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PUSH" => Some(SyncCommand::Push),
            "FETCH" => Some(SyncCommand::Fetch),
            "PULL" => Some(SyncCommand::Pull),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed session opener: `<COMMAND> <repoName> <branch>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub command: SyncCommand,
    pub repo: String,
    pub branch: String,
}

impl SessionRequest {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(cmd), Some(repo), Some(branch), None) => {
                let command = SyncCommand::parse(cmd).ok_or_else(|| {
                    Error::ProtocolViolation(format!("unknown command {cmd:?}"))
                })?;
                Ok(Self {
                    command,
                    repo: repo.to_string(),
                    branch: branch.to_string(),
                })
            }
            _ => Err(Error::ProtocolViolation(format!(
                "malformed session opener {line:?}"
            ))),
        }
    }
}

impl std::fmt::Display for SessionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.command, self.repo, self.branch)
    }
}

/// Parse a decimal length line, enforcing the frame cap.
pub fn parse_length(line: &str) -> Result<usize> {
    let len: usize = line.trim().parse().map_err(|_| {
        Error::ProtocolViolation(format!("expected a length line, got {line:?}"))
    })?;
    if len > MAX_FRAME_SIZE {
        return Err(Error::ProtocolViolation(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_SIZE}-byte cap"
        )));
    }
    Ok(len)
}

/// Render an optional tip for the wire.
pub fn tip_to_line(tip: Option<ObjectId>) -> String {
    match tip {
        Some(id) => id.to_hex(),
        None => SENTINEL_ORIGIN.to_string(),
    }
}

/// Parse a tip line: a 40-hex hash or the `origin` sentinel.
pub fn tip_from_line(line: &str) -> Result<Option<ObjectId>> {
    let line = line.trim();
    if line == SENTINEL_ORIGIN {
        return Ok(None);
    }
    ObjectId::from_hex(line)
        .map(Some)
        .map_err(|_| Error::ProtocolViolation(format!("expected a tip hash, got {line:?}")))
}

/// Framed, timeout-bounded view over one bidirectional stream.
///
/// Every read and write is individually bounded by the configured timeout;
/// a stalled peer surfaces as [`Error::Timeout`] instead of wedging the
/// session forever.
pub struct Wire<S> {
    inner: BufReader<S>,
    io_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Wire<S> {
    pub fn new(stream: S) -> Self {
        Self::with_timeout(stream, DEFAULT_IO_TIMEOUT)
    }

    pub fn with_timeout(stream: S, io_timeout: Duration) -> Self {
        Self {
            inner: BufReader::new(stream),
            io_timeout,
        }
    }

    /// Read one control line, stripped of its terminator.
    pub async fn read_line(&mut self) -> Result<String> {
        let dur = self.io_timeout;
        let mut line = String::new();
        let n = match timeout(dur, self.inner.read_line(&mut line)).await {
            Ok(res) => res?,
            Err(_) => return Err(Error::Timeout(dur)),
        };
        if n == 0 {
            return Err(Error::ConnectionLost);
        }
        if line.len() > MAX_LINE_LEN {
            return Err(Error::ProtocolViolation("control line too long".to_string()));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Write one control line, appending the terminator.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.write_all_timed(&buf).await?;
        self.flush_timed().await
    }

    /// Read a length line followed by exactly that many payload bytes.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let len = parse_length(&self.read_line().await?)?;
        self.read_payload(len).await
    }

    /// Read exactly `len` raw payload bytes.
    pub async fn read_payload(&mut self, len: usize) -> Result<Vec<u8>> {
        let dur = self.io_timeout;
        let mut buf = vec![0u8; len];
        match timeout(dur, self.inner.read_exact(&mut buf)).await {
            Ok(Ok(_)) => Ok(buf),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::ConnectionLost)
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => Err(Error::Timeout(dur)),
        }
    }

    /// Write a length line followed by the raw payload bytes.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(payload.len() + 16);
        buf.extend_from_slice(payload.len().to_string().as_bytes());
        buf.push(b'\n');
        buf.extend_from_slice(payload);
        self.write_all_timed(&buf).await?;
        self.flush_timed().await
    }

    /// Read a line that must be a 40-hex object id.
    pub async fn read_hash(&mut self) -> Result<ObjectId> {
        let line = self.read_line().await?;
        ObjectId::from_hex(line.trim()).map_err(|_| {
            Error::ProtocolViolation(format!("expected an object hash, got {line:?}"))
        })
    }

    /// Read a tip line (hash or `origin`).
    pub async fn read_tip(&mut self) -> Result<Option<ObjectId>> {
        let line = self.read_line().await?;
        tip_from_line(&line)
    }

    /// Send a tip line (hash or `origin`).
    pub async fn send_tip(&mut self, tip: Option<ObjectId>) -> Result<()> {
        self.send_line(&tip_to_line(tip)).await
    }

    async fn write_all_timed(&mut self, bytes: &[u8]) -> Result<()> {
        let dur = self.io_timeout;
        match timeout(dur, self.inner.write_all(bytes)).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(Error::Timeout(dur)),
        }
    }

    async fn flush_timed(&mut self) -> Result<()> {
        let dur = self.io_timeout;
        match timeout(dur, self.inner.flush()).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(Error::Timeout(dur)),
        }
    }
}
