//! Caller-facing output stream.
//!
//! The pipeline writes into a [`DataStreamWriter`]; the transport layer reads
//! the paired [`DataStreamReader`]. Two model phases share one logical
//! stream by merging with [`MergeOptions`] that drop the inner boundaries.
//!
//! The reader reports when it is done: [`Drained`] resolves once the reader
//! has yielded its last event or has been dropped.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{ModelInvocationError, PipelineError};
use crate::normalized::NormalizedEvent;

/// Code attached to error records written into the stream.
pub const STREAM_ERROR_CODE: &str = "STREAM_ERROR";

/// The reading side of the stream has gone away.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("output stream receiver dropped")]
pub struct StreamClosed;

/// Which boundary events a merge forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Forward `stream.start`.
    pub send_start: bool,
    /// Forward `done`.
    pub send_finish: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            send_start: true,
            send_finish: true,
        }
    }
}

/// Writing side of the output stream.
///
/// Writes after the reader disconnects are dropped; merges keep draining
/// their source so upstream work runs to completion.
#[derive(Debug, Clone)]
pub struct DataStreamWriter {
    tx: mpsc::UnboundedSender<NormalizedEvent>,
    disconnected: Arc<AtomicBool>,
    drained: watch::Receiver<()>,
}

/// Reading side of the output stream.
///
/// Ends once every writer has been dropped and all buffered events have been
/// read.
#[derive(Debug)]
pub struct DataStreamReader {
    inner: UnboundedReceiverStream<NormalizedEvent>,
    // Dropped on end-of-stream; the reader's own drop covers disconnects.
    drained: Option<watch::Sender<()>>,
}

impl Stream for DataStreamReader {
    type Item = NormalizedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = polled {
            self.drained.take();
        }
        polled
    }
}

/// Resolves once the paired reader has been fully consumed or dropped.
#[derive(Debug, Clone)]
pub struct Drained {
    rx: watch::Receiver<()>,
}

impl Drained {
    pub async fn wait(mut self) {
        // Nothing is ever sent; `changed` fails once the reader lets go.
        while self.rx.changed().await.is_ok() {}
    }
}

/// A connected writer and reader pair.
#[must_use]
pub fn data_stream() -> (DataStreamWriter, DataStreamReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (drained_tx, drained_rx) = watch::channel(());
    (
        DataStreamWriter {
            tx,
            disconnected: Arc::new(AtomicBool::new(false)),
            drained: drained_rx,
        },
        DataStreamReader {
            inner: UnboundedReceiverStream::new(rx),
            drained: Some(drained_tx),
        },
    )
}

impl DataStreamWriter {
    /// Write one event.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClosed`] if the reader has been dropped.
    pub fn write(&self, event: NormalizedEvent) -> Result<(), StreamClosed> {
        self.tx.send(event).map_err(|_unsent| {
            if !self.disconnected.swap(true, Ordering::SeqCst) {
                tracing::info!("Client disconnected; draining remaining output");
            }
            StreamClosed
        })
    }

    /// Write a structured error record.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClosed`] if the reader has been dropped.
    pub fn write_error(&self, message: impl Into<String>) -> Result<(), StreamClosed> {
        self.write(NormalizedEvent::Error {
            message: message.into(),
            code: Some(STREAM_ERROR_CODE.to_string()),
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Signal for the reader finishing. Only resolves once every writer clone
    /// has been dropped or the reader is gone.
    #[must_use]
    pub fn drained(&self) -> Drained {
        Drained {
            rx: self.drained.clone(),
        }
    }

    /// Forward every event of `source`, honouring `options`.
    ///
    /// The source is always drained to its end, even once the reader is gone.
    ///
    /// # Errors
    ///
    /// Returns the first error the source yields; nothing after it is read.
    pub async fn merge<S>(&self, source: S, options: MergeOptions) -> Result<(), ModelInvocationError>
    where
        S: Stream<Item = Result<NormalizedEvent, ModelInvocationError>> + Send,
    {
        futures::pin_mut!(source);
        while let Some(item) = source.next().await {
            let event = item?;
            let forward = match event {
                NormalizedEvent::StreamStart { .. } => options.send_start,
                NormalizedEvent::Done => options.send_finish,
                _ => true,
            };
            if forward {
                // A closed reader only stops delivery.
                let _ = self.write(event);
            }
        }
        Ok(())
    }
}

/// Handle to a running streamed turn.
///
/// Tool cleanup runs inside the orchestration task once the reader has
/// consumed the combined stream (or been dropped), whether or not this handle
/// is awaited. Awaiting it before reading the stream to its end waits forever.
#[derive(Debug)]
pub struct StreamCompletion {
    handle: JoinHandle<Result<(), PipelineError>>,
}

impl StreamCompletion {
    pub(crate) fn new(handle: JoinHandle<Result<(), PipelineError>>) -> Self {
        Self { handle }
    }

    /// Wait for the turn to finish, cleanup included.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the turn.
    pub async fn wait(self) -> Result<(), PipelineError> {
        self.handle.await?
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
