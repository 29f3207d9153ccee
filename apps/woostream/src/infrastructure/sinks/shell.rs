//! Shell Sink
//!
//! Writes each rendered event followed by a newline to an async writer,
//! standard output by default.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::application::ports::{Sink, SinkError};

/// Line-oriented sink over any async writer.
pub struct ShellSink<W> {
    writer: Mutex<W>,
}

impl ShellSink<tokio::io::Stdout> {
    /// Sink writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> ShellSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Sink writing to `writer`.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> Sink for ShellSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn deliver(&self, text: &str) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        result.map_err(map_io_error)
    }
}

fn map_io_error(error: io::Error) -> SinkError {
    match error.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero => SinkError::Closed(error.to_string()),
        _ => SinkError::Transient(error.to_string()),
    }
}
