//! Transport layer for host ↔ worker communication.
//!
//! Newline-delimited JSON in both directions. Inbound bytes are reassembled
//! into lines by [`FrameReader`]; outbound lines go through a single
//! [`OutputSink`] whose writer task owns the output stream, so concurrent
//! responses never interleave mid-line.

pub mod protocol;
pub mod stdio;

pub use protocol::{CallbackResponse, Command, CommandRequest, CommandResponse, Inbound};
pub use stdio::{serve, serve_stdio};

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// A complete inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One line, without its terminator.
    Line(String),
    /// A line longer than the configured limit; its bytes were discarded.
    Oversized(usize),
}

/// Reassembles newline-terminated frames from a byte stream.
///
/// A trailing line without a newline at end of stream is still returned.
pub struct FrameReader<R> {
    reader: R,
    max_line_bytes: usize,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub const fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            max_line_bytes,
            buf: Vec::new(),
        }
    }

    /// Read the next frame, or `None` at end of stream.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        self.buf.clear();
        let mut total = 0usize;
        let mut oversized = false;

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }

            let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (&available[..=pos], true),
                None => (available, false),
            };
            let consumed = chunk.len();
            total += consumed;

            if !oversized {
                if total > self.max_line_bytes + 1 {
                    oversized = true;
                    self.buf.clear();
                } else {
                    self.buf.extend_from_slice(chunk);
                }
            }
            self.reader.consume(consumed);

            if done {
                break;
            }
        }

        if total == 0 {
            return Ok(None);
        }
        if oversized {
            return Ok(Some(Frame::Oversized(total)));
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        Ok(Some(Frame::Line(
            String::from_utf8_lossy(&self.buf).into_owned(),
        )))
    }
}

/// The output stream is gone.
#[derive(Debug, thiserror::Error)]
#[error("Output stream closed")]
pub struct SinkClosed;

/// Cloneable handle that queues whole lines for the writer task.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<String>,
}

impl OutputSink {
    /// Create a sink and the receiving end of its queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue one pre-serialized line. Must not contain a newline.
    pub fn send_line(&self, line: String) -> Result<(), SinkClosed> {
        debug_assert!(!line.contains('\n'));
        self.tx.send(line).map_err(|_| SinkClosed)
    }

    /// Serialize `message` and queue it as one line.
    pub fn send_json<T: Serialize>(&self, message: &T) -> Result<(), serde_json::Error> {
        let line = serde_json::to_string(message)?;
        if self.send_line(line).is_err() {
            warn!("Dropping outbound message: output stream closed");
        }
        Ok(())
    }
}

/// Spawn the task that owns `writer` and drains the sink queue.
///
/// The task ends once every [`OutputSink`] clone has been dropped.
pub fn spawn_writer<W>(
    writer: W,
    mut rx: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<std::io::Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        writer.shutdown().await?;
        Ok(())
    })
}
