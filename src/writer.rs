//! Dedicated writer task for the connection.
//!
//! Every outbound document goes through one mpsc channel drained by a single
//! task that owns the socket's write half, so concurrent callers never
//! interleave partial frames on the wire.
//!
//! # Architecture
//!
//! ```text
//! Caller 1   ─┐
//! Caller 2   ─┼─► mpsc::Sender<Bytes> ─► Writer Task ─► TCP write half
//! Keep-alive ─┘
//! ```
//!
//! Frames queued at the same time are coalesced into one write.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{QrcError, Result};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to coalesce into a single write.
const MAX_BATCH_SIZE: usize = 64;

/// Handle for queueing encoded frames on the writer task.
///
/// This is cheaply cloneable and can be shared across callers.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue a frame (an encoded envelope including its delimiter).
    ///
    /// Waits while the queue is full. Fails with `Disconnected` once the
    /// writer task has stopped.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx.send(frame).await.map_err(|_| QrcError::Disconnected)
    }

    /// Check whether the writer task is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task stops when every handle is dropped, when `token` is cancelled
/// (even in the middle of a stalled write), or on the first write error,
/// which is returned from the join handle. The write half is dropped when
/// the task ends.
pub fn spawn_writer_task<W>(
    writer: W,
    channel_capacity: usize,
    token: CancellationToken,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer, token));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    token: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            _ = token.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(f) => f,
                None => break,
            },
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = vec![first];
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        // Cancel wins over a write the peer is not draining
        let written = tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(frames = batch.len(), "abandoned write on cancel");
                break;
            }
            written = write_batch(&mut writer, &batch) => written,
        };
        written?;
        tracing::trace!(frames = batch.len(), "flushed frames");
    }

    // Reject anything queued after shutdown
    rx.close();
    let _ = writer.shutdown().await;
    Ok(())
}

async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match batch {
        [] => {}
        [single] => writer.write_all(single).await?,
        many => {
            let total: usize = many.iter().map(Bytes::len).sum();
            let mut joined = BytesMut::with_capacity(total);
            for frame in many {
                joined.extend_from_slice(frame);
            }
            writer.write_all(&joined).await?;
        }
    }
    writer.flush().await?;
    Ok(())
}
