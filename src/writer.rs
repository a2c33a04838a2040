//! Dedicated writer task for outbound actions.
//!
//! Serialized actions are queued on an unbounded mpsc channel and written by
//! a single task that owns the socket's write half. Queuing never waits, so
//! the session loop can dispatch without blocking on I/O.
//!
//! # Architecture
//!
//! ```text
//! Session loop ─► mpsc::UnboundedSender<Bytes> ─► Writer Task ─► Socket
//! ```
//!
//! Actions that are ready together are batched into one vectored write.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AmiError, Result};
use crate::transport::Transport;

/// Maximum actions to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Handle for queuing bytes to the writer task.
///
/// Cheap to clone.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl WriterHandle {
    /// Queue `data` for writing.
    ///
    /// Fails with [`AmiError::ConnectionClosed`] once the writer task has stopped.
    pub fn send(&self, data: Bytes) -> Result<()> {
        self.tx.send(data).map_err(|_| AmiError::ConnectionClosed)
    }
}

impl Transport for WriterHandle {
    fn write(&mut self, data: Bytes) -> Result<()> {
        self.send(data)
    }
}

/// Spawn the writer task and return a handle for queuing bytes.
///
/// The task ends cleanly when every handle is dropped, or with an error
/// when the socket write fails.
pub fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives serialized actions and writes them out.
async fn writer_loop<W>(mut rx: mpsc::UnboundedReceiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(data) => data,
            None => {
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(data) => batch.push(data),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!("Writer error: {}", e);
            return Err(e);
        }
    }
}

/// Write a batch using scatter/gather I/O, finishing partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(AmiError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for data in batch {
        let end = offset + data.len();
        if skip_bytes < end && !data.is_empty() {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&data[start..]));
        }
        offset = end;
    }

    slices
}
