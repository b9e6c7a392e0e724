//! Composable message readers.
//!
//! Every stage of the pipeline implements [`MessageReader`] and wraps the
//! stage below it:
//!
//! ```text
//! byte source -> LineReader -> EncodeReader -> StripNewline -> (TimeoutReader -> multiline) -> LimitReader
//! ```
//!
//! Data flows from the byte source upwards, each call to
//! [`MessageReader::next`] pulls exactly as much as it needs from the stage
//! beneath it.
use std::io;

use async_trait::async_trait;
use snafu::Snafu;

use crate::Message;

mod encode;
mod limit;
mod line;
mod strip_newline;
mod timeout;

pub use self::{
    encode::EncodeReader,
    limit::LimitReader,
    line::{BuildError as LineBuildError, LineReader, LineReaderConfig},
    strip_newline::StripNewline,
    timeout::TimeoutReader,
};

/// Errors returned while pulling messages.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReadError {
    /// The source has no more data.
    #[snafu(display("end of stream"))]
    Eof,

    /// No message became available within the configured timeout.
    ///
    /// This is a signal rather than a failure, the reader can be polled again.
    #[snafu(display("no message available before timeout"))]
    Timeout,

    #[snafu(display("failed reading from source: {}", source))]
    Io { source: io::Error },
}

impl ReadError {
    pub const fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<io::Error> for ReadError {
    fn from(source: io::Error) -> Self {
        Self::Io { source }
    }
}

/// A pull-based stream of messages.
#[async_trait]
pub trait MessageReader: Send {
    /// Returns the next message.
    ///
    /// Once the reader is exhausted or closed this keeps returning
    /// [`ReadError::Eof`].
    async fn next(&mut self) -> Result<Message, ReadError>;

    /// Closes this reader and every reader it wraps.
    async fn close(&mut self) -> Result<(), ReadError>;
}

#[async_trait]
impl<R: MessageReader + ?Sized> MessageReader for Box<R> {
    async fn next(&mut self) -> Result<Message, ReadError> {
        (**self).next().await
    }

    async fn close(&mut self) -> Result<(), ReadError> {
        (**self).close().await
    }
}
