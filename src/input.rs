use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::factory::ProcessFactory;

/// A lazily produced sequence of byte chunks, fed to the child's stdin as it arrives.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Character encoding used to turn [`Input::Text`] into bytes.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    /// 7-bit ASCII; any other character is an encoding error.
    Ascii,
    /// ISO-8859-1; characters above U+00FF are an encoding error.
    Latin1,
}

impl Encoding {
    /// Encode `text`, or return `None` if it contains characters this encoding cannot
    /// represent.
    pub fn encode(self, text: &str) -> Option<Vec<u8>> {
        match self {
            Encoding::Utf8 => Some(text.as_bytes().to_vec()),
            Encoding::Utf16Le => Some(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Encoding::Utf16Be => Some(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            Encoding::Ascii => text.is_ascii().then(|| text.as_bytes().to_vec()),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).ok())
                .collect(),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Utf16Le => "UTF-16LE",
            Encoding::Utf16Be => "UTF-16BE",
            Encoding::Ascii => "ASCII",
            Encoding::Latin1 => "ISO-8859-1",
        })
    }
}

/// Data to write to the standard input of the child process.
///
/// Not supplying an `Input` at all gives the child a stdin that is closed immediately.
pub enum Input {
    /// Raw bytes.
    Bytes(Bytes),
    /// Text, converted to bytes with the given encoding before anything is spawned.
    Text(String, Encoding),
    /// Contents of the file at the given path.
    File(PathBuf),
    /// Chunks pulled from an asynchronous stream and written as they arrive.
    Stream(ByteStream),
}

impl Input {
    pub fn bytes(data: impl Into<Bytes>) -> Input {
        Input::Bytes(data.into())
    }

    /// UTF-8 text.
    pub fn text(text: impl Into<String>) -> Input {
        Input::Text(text.into(), Encoding::Utf8)
    }

    pub fn text_with_encoding(text: impl Into<String>, encoding: Encoding) -> Input {
        Input::Text(text.into(), encoding)
    }

    pub fn file(path: impl AsRef<Path>) -> Input {
        Input::File(path.as_ref().to_owned())
    }

    pub fn stream<S>(stream: S) -> Input
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Input::Stream(stream.boxed())
    }

    /// Convert to a feed for the child's stdin.
    ///
    /// Bytes, text and files go through the factory's input helpers so that a fake
    /// factory can record them instead of touching the filesystem.
    pub(crate) fn into_feed(self, factory: &dyn ProcessFactory) -> Result<InputFeed> {
        match self {
            Input::Bytes(data) => Ok(factory.create_input_pipe(data)),
            Input::Text(text, encoding) => {
                let data = encoding
                    .encode(&text)
                    .ok_or(Error::InputEncoding(encoding))?;
                Ok(factory.create_input_pipe(Bytes::from(data)))
            }
            Input::File(path) => factory
                .create_input_file(&path)
                .map_err(|source| Error::InputFile { path, source }),
            Input::Stream(stream) => Ok(InputFeed::from_stream(stream)),
        }
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Bytes(data) => f.debug_tuple("Bytes").field(data).finish(),
            Input::Text(text, encoding) => {
                f.debug_tuple("Text").field(text).field(encoding).finish()
            }
            Input::File(path) => f.debug_tuple("File").field(path).finish(),
            Input::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Vec<u8>> for Input {
    fn from(data: Vec<u8>) -> Input {
        Input::Bytes(data.into())
    }
}

impl From<&str> for Input {
    fn from(text: &str) -> Input {
        Input::text(text)
    }
}

impl From<String> for Input {
    fn from(text: String) -> Input {
        Input::text(text)
    }
}

/// Where a stdin feed comes from, as seen by the process handle.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum InputOrigin {
    /// In-memory bytes (also text, after encoding).
    Bytes(Bytes),
    /// A file, identified by the path it was opened from.
    File(PathBuf),
    /// An asynchronous byte stream.
    Stream,
}

pub(crate) enum FeedSource {
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    Stream(ByteStream),
}

/// A ready-to-pump source for the child's stdin, produced by a
/// [`ProcessFactory`](crate::ProcessFactory).
pub struct InputFeed {
    origin: InputOrigin,
    pub(crate) source: FeedSource,
}

impl InputFeed {
    /// Feed the given bytes.
    pub fn from_bytes(data: Bytes) -> InputFeed {
        InputFeed {
            origin: InputOrigin::Bytes(data.clone()),
            source: FeedSource::Reader(Box::new(io::Cursor::new(data))),
        }
    }

    /// Feed the contents of an already opened file.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_file(path: impl AsRef<Path>, file: std::fs::File) -> InputFeed {
        InputFeed {
            origin: InputOrigin::File(path.as_ref().to_owned()),
            source: FeedSource::Reader(Box::new(tokio::fs::File::from_std(file))),
        }
    }

    /// Feed whatever `reader` produces, reporting `origin` to the process handle.
    pub fn from_reader(
        origin: InputOrigin,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> InputFeed {
        InputFeed {
            origin,
            source: FeedSource::Reader(Box::new(reader)),
        }
    }

    pub fn from_stream(stream: ByteStream) -> InputFeed {
        InputFeed {
            origin: InputOrigin::Stream,
            source: FeedSource::Stream(stream),
        }
    }

    pub fn origin(&self) -> &InputOrigin {
        &self.origin
    }
}

impl fmt::Debug for InputFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputFeed")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
