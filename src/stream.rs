//! Streaming API: progress and the final result as one `Stream` of events.
//!
//! The callback-based [`Compressor::compress`] suits callers that already
//! own a UI loop. [`compress_stream`] instead runs the invocation on a
//! spawned task and yields [`CompressionEvent`]s through a tokio channel, so
//! progress can be consumed with `while let Some(ev) = stream.next().await`.
//!
//! The stream always ends with exactly one [`CompressionEvent::Finished`].
//! Dropping the stream early cancels the compression.

use crate::abort::AbortSignal;
use crate::compress::Compressor;
use crate::config::CompressionLevel;
use crate::error::CompressionError;
use crate::output::CompressionResult;
use crate::pipeline::classify::ExecutionMode;
use crate::pipeline::input::InputFile;
use crate::progress::{CompressionProgressCallback, ProgressCallback, ProgressEvent};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::debug;

/// One item of a compression stream.
#[derive(Debug)]
pub enum CompressionEvent {
    Progress(ProgressEvent),
    /// The first attempt failed and the other mode is being tried.
    Fallback {
        from: ExecutionMode,
        to: ExecutionMode,
        reason: String,
    },
    /// Terminal item.
    Finished(Result<CompressionResult, CompressionError>),
}

/// A boxed stream of compression events.
pub type CompressionEventStream = Pin<Box<dyn Stream<Item = CompressionEvent> + Send>>;

struct ChannelCallback {
    tx: UnboundedSender<CompressionEvent>,
}

impl CompressionProgressCallback for ChannelCallback {
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = self.tx.send(CompressionEvent::Progress(event.clone()));
    }

    fn on_fallback(&self, from: ExecutionMode, to: ExecutionMode, reason: &str) {
        let _ = self.tx.send(CompressionEvent::Fallback {
            from,
            to,
            reason: reason.to_string(),
        });
    }
}

/// Compress `file`, streaming progress.
///
/// Must be called from within a tokio runtime.
pub fn compress_stream(
    compressor: Arc<Compressor>,
    file: InputFile,
    level: CompressionLevel,
) -> CompressionEventStream {
    compress_stream_with_abort(compressor, file, level, AbortSignal::never())
}

/// [`compress_stream`] with an external abort signal.
pub fn compress_stream_with_abort(
    compressor: Arc<Compressor>,
    file: InputFile,
    level: CompressionLevel,
    abort: AbortSignal,
) -> CompressionEventStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ProgressCallback = Arc::new(ChannelCallback { tx: tx.clone() });

    tokio::spawn(async move {
        tokio::select! {
            result = compressor.compress_with_abort(&file, level, Some(callback), abort) => {
                let _ = tx.send(CompressionEvent::Finished(result));
            }
            _ = tx.closed() => {
                debug!("Event stream for {} dropped; cancelling", file.name());
            }
        }
    });

    Box::pin(UnboundedReceiverStream::new(rx))
}
