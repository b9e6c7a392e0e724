use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::{LineReader, MessageReader, ReadError};
use crate::{encoding_transcode::strip_bom, Message};

/// Turns the lines of a [`LineReader`] into messages.
///
/// Any byte order mark left in a decoded line is removed.
pub struct EncodeReader<R> {
    lines: LineReader<R>,
}

impl<R> EncodeReader<R> {
    pub const fn new(lines: LineReader<R>) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl<R> MessageReader for EncodeReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next(&mut self) -> Result<Message, ReadError> {
        let (line, bytes) = self.lines.next_line().await?;
        Ok(Message::new(strip_bom(line), bytes))
    }

    async fn close(&mut self) -> Result<(), ReadError> {
        self.lines.close();
        Ok(())
    }
}
