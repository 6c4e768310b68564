use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;

/// The bytes a child writes to one of its output streams.
///
/// A finite, single-pass sequence of chunks in the order the child wrote them, ending when
/// the child closes the stream. Chunk boundaries carry no meaning.
///
/// The stream must be consumed (or dropped) for the session to make progress: its pump
/// keeps draining the pipe regardless, buffering whatever has not been read yet.
pub struct OutputStream {
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl OutputStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Bytes>) -> OutputStream {
        OutputStream { rx: Some(rx) }
    }

    /// A stream that ends immediately, handed out for streams that were not captured.
    pub fn empty() -> OutputStream {
        OutputStream { rx: None }
    }

    /// Collect the remaining bytes.
    pub async fn bytes(mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    /// Collect the remaining bytes as text, replacing invalid UTF-8.
    pub async fn string(self) -> String {
        match String::from_utf8(self.bytes().await) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }

    /// Split the remaining bytes into lines.
    ///
    /// Lines are split on `\n`; the terminator and a preceding `\r` are removed. A final
    /// line without terminator is still produced. Invalid UTF-8 is replaced.
    pub fn lines(self) -> Lines {
        Lines {
            inner: self,
            buf: Vec::new(),
            done: false,
        }
    }
}

impl Stream for OutputStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        match self.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("captured", &self.rx.is_some())
            .finish()
    }
}

/// Line view of an [`OutputStream`], see [`OutputStream::lines`].
#[derive(Debug)]
pub struct Lines {
    inner: OutputStream,
    buf: Vec<u8>,
    done: bool,
}

fn decode_line(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    match String::from_utf8(line) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

impl Stream for Lines {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let this = &mut *self;
        loop {
            if let Some(pos) = this.buf.iter().position(|&b| b == b'\n') {
                let rest = this.buf.split_off(pos + 1);
                let line = std::mem::replace(&mut this.buf, rest);
                return Poll::Ready(Some(decode_line(line)));
            }
            if this.done {
                if this.buf.is_empty() {
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(decode_line(std::mem::take(&mut this.buf))));
            }
            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(chunk)) => this.buf.extend_from_slice(&chunk),
                Poll::Ready(None) => this.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
