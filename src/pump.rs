use std::io::ErrorKind;
use std::mem;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::input::{FeedSource, InputFeed};
use crate::process::{ChildInput, ChildOutput};

const CHUNK_SIZE: usize = 64 * 1024;

/// Per-chunk callback for an output stream.
///
/// Called from the pump task, in stream order, once per chunk read from the pipe.
pub type ChunkHandler = Box<dyn FnMut(Bytes) + Send>;

/// Destination of the bytes drained from one output pipe.
pub(crate) enum OutputSink {
    Channel(mpsc::UnboundedSender<Bytes>),
    Handler(ChunkHandler),
}

impl OutputSink {
    fn deliver(&mut self, chunk: Bytes) {
        match self {
            OutputSink::Channel(tx) => {
                // A dropped receiver doesn't stop the pump: the pipe must still be drained
                // or the child could block on a full buffer.
                let _ = tx.send(chunk);
            }
            OutputSink::Handler(handler) => handler(chunk),
        }
    }
}

/// Start draining `pipe` into `sink` until end of stream.
///
/// The sink is dropped when the pump finishes, which ends a channel-backed
/// [`OutputStream`](crate::OutputStream).
pub(crate) fn spawn_reader(
    name: &'static str,
    pipe: ChildOutput,
    sink: OutputSink,
) -> JoinHandle<()> {
    tokio::spawn(read_pump(name, pipe, sink))
}

async fn read_pump(name: &'static str, mut pipe: ChildOutput, mut sink: OutputSink) {
    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    let mut total = 0u64;
    loop {
        buf.reserve(CHUNK_SIZE);
        match pipe.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                trace!(stream = name, len = n, "read chunk");
                sink.deliver(buf.split().freeze());
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(stream = name, error = %e, "read failed, closing stream");
                break;
            }
        }
    }
    debug!(stream = name, bytes = total, "end of stream");
}

/// Start feeding `feed` into the child's stdin, closing it when the feed is exhausted.
///
/// The session aborts this task once the process has exited, so a feed that stalls
/// never holds up completion.
pub(crate) fn spawn_writer(pipe: ChildInput, feed: InputFeed) -> JoinHandle<()> {
    tokio::spawn(write_pump(pipe, feed))
}

async fn write_pump(mut pipe: ChildInput, feed: InputFeed) {
    let origin = feed.origin().clone();
    let result = match feed.source {
        FeedSource::Reader(mut reader) => tokio::io::copy(&mut reader, &mut pipe).await,
        FeedSource::Stream(mut stream) => {
            let mut written = 0u64;
            let mut result = Ok(0);
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        if let Err(e) = pipe.write_all(&chunk).await {
                            result = Err(e);
                            break;
                        }
                        written += chunk.len() as u64;
                        result = Ok(written);
                    }
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            result
        }
    };
    match result {
        Ok(n) => debug!(?origin, bytes = n, "stdin fed"),
        // The child stopped reading; whatever is left is abandoned.
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            debug!(?origin, "child closed stdin early")
        }
        Err(e) => warn!(?origin, error = %e, "feeding stdin failed"),
    }
    close(&mut pipe).await;
}

async fn close<W: AsyncWrite + Unpin + ?Sized>(pipe: &mut W) {
    if let Err(e) = pipe.shutdown().await {
        if e.kind() != ErrorKind::BrokenPipe {
            debug!(error = %e, "closing stdin failed");
        }
    }
}

/// Byte buffer filled by a single output pump and read once the pump has finished.
///
/// Exactly one pump may hold a handler produced by [`handler`](Self::handler);
/// [`take`](Self::take) is only meaningful after that pump has been joined.
#[derive(Clone, Default)]
pub(crate) struct Accumulator(Arc<Mutex<Vec<u8>>>);

impl Accumulator {
    pub fn handler(&self) -> ChunkHandler {
        let buf = Arc::clone(&self.0);
        Box::new(move |chunk: Bytes| {
            buf.lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend_from_slice(&chunk)
        })
    }

    pub fn take(&self) -> Vec<u8> {
        mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }
}
