//! Per-plugin endpoints on the panel bus and newline-delimited frame I/O.
//!
//! The bus is a directory of Unix sockets. The panel registers one socket per
//! plugin instance; its name is derived from the plugin's unique id, so a
//! wrapper can find the endpoint from its launch arguments alone.

use crate::protocol::{CodecError, Message};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Well-known bus name of the panel.
pub const BUS_NAME: &str = "org.blade.Bar";

/// Object path prefix of wrapper endpoints.
pub const WRAPPER_PATH_PREFIX: &str = "/org/blade/Bar/Wrapper";

/// Longest frame accepted from a peer, newline excluded.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("bus directory {path} is not available")]
    BusUnavailable { path: PathBuf },
    #[error("no owner for endpoint {endpoint} (socket {path})")]
    OwnerNotFound { endpoint: Endpoint, path: PathBuf },
    #[error("failed to register endpoint {endpoint}: {source}")]
    Register {
        endpoint: Endpoint,
        source: io::Error,
    },
    #[error("bus i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer sent something that is not a valid message; the stream is still usable.
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("frame i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Address of one plugin instance on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    unique_id: u32,
}

impl Endpoint {
    pub fn new(unique_id: u32) -> Self {
        Self { unique_id }
    }

    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    pub fn object_path(&self) -> String {
        format!("{WRAPPER_PATH_PREFIX}/{}", self.unique_id)
    }

    /// Socket backing this endpoint inside `bus_dir`.
    pub fn socket_path(&self, bus_dir: &Path) -> PathBuf {
        bus_dir.join(format!("{BUS_NAME}.Wrapper.{}", self.unique_id))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object_path())
    }
}

/// Bind the endpoint socket. A stale socket left by a crashed panel is replaced.
pub fn register(bus_dir: &Path, endpoint: Endpoint) -> Result<(UnixListener, PathBuf), ConnectionError> {
    let register_err = |source| ConnectionError::Register { endpoint, source };

    std::fs::create_dir_all(bus_dir).map_err(register_err)?;
    let path = endpoint.socket_path(bus_dir);
    match std::fs::remove_file(&path) {
        Ok(()) => tracing::debug!(%endpoint, "removed stale endpoint socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(register_err(err)),
    }

    let listener = UnixListener::bind(&path).map_err(register_err)?;
    tracing::debug!(%endpoint, path = %path.display(), "registered endpoint");
    Ok((listener, path))
}

/// Connect to the endpoint the panel registered for `endpoint`.
pub async fn connect(bus_dir: &Path, endpoint: Endpoint) -> Result<UnixStream, ConnectionError> {
    if !bus_dir.is_dir() {
        return Err(ConnectionError::BusUnavailable {
            path: bus_dir.to_path_buf(),
        });
    }

    let path = endpoint.socket_path(bus_dir);
    match UnixStream::connect(&path).await {
        Ok(stream) => Ok(stream),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
            ) =>
        {
            Err(ConnectionError::OwnerNotFound { endpoint, path })
        }
        Err(err) => Err(ConnectionError::Io(err)),
    }
}

/// Reads one [`Message`] per line.
///
/// Lines are taken as raw bytes, so a frame that is not UTF-8 or is longer
/// than the limit is a decoding error for that frame only.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    frame: Vec<u8>,
    oversized: bool,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_len(reader, MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            frame: Vec::new(),
            oversized: false,
            max_len,
        }
    }

    /// Next message, `Ok(None)` at end of stream.
    ///
    /// Cancel safe: a partly read frame stays buffered for the next call.
    pub async fn read(&mut self) -> Result<Option<Message>, FrameError> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.frame.is_empty() && !self.oversized {
                    return Ok(None);
                }
                match self.take_frame() {
                    Some(message) => return message.map(Some),
                    None => continue,
                }
            }

            let newline = available.iter().position(|byte| *byte == b'\n');
            let chunk = &available[..newline.unwrap_or(available.len())];
            if !self.oversized {
                if self.frame.len() + chunk.len() > self.max_len {
                    self.oversized = true;
                    self.frame.clear();
                } else {
                    self.frame.extend_from_slice(chunk);
                }
            }
            let used = newline.map_or(available.len(), |at| at + 1);
            self.reader.consume(used);

            if newline.is_some() {
                if let Some(message) = self.take_frame() {
                    return message.map(Some);
                }
            }
        }
    }

    /// Decode the buffered frame; `None` for a blank line.
    fn take_frame(&mut self) -> Option<Result<Message, FrameError>> {
        let frame = std::mem::take(&mut self.frame);
        if std::mem::replace(&mut self.oversized, false) {
            return Some(Err(FrameError::Codec(CodecError::Decoding(format!(
                "frame longer than {} bytes",
                self.max_len
            )))));
        }
        if frame.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(Message::decode(&frame).map_err(FrameError::Codec))
    }
}

/// Writes one [`Message`] per line.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), FrameError> {
        let mut frame = message.encode()?;
        frame.push(b'\n');
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
