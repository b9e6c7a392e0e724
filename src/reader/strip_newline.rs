use async_trait::async_trait;

use super::{MessageReader, ReadError};
use crate::{LineTerminator, Message};

/// Removes the line terminator from the end of each message.
///
/// With [`LineTerminator::Auto`] a carriage return preceding the line feed is
/// removed too. Content not ending with the terminator, such as the last line
/// of a file, is passed through unchanged.
pub struct StripNewline<R> {
    reader: R,
    terminator: &'static [u8],
    auto: bool,
}

impl<R> StripNewline<R> {
    pub const fn new(reader: R, terminator: LineTerminator) -> Self {
        Self {
            reader,
            terminator: terminator.as_str().as_bytes(),
            auto: terminator.is_auto(),
        }
    }

    fn terminator_len(&self, content: &[u8]) -> usize {
        if !content.ends_with(self.terminator) {
            return 0;
        }
        let len = self.terminator.len();
        if self.auto && content[..content.len() - len].ends_with(b"\r") {
            len + 1
        } else {
            len
        }
    }
}

#[async_trait]
impl<R: MessageReader> MessageReader for StripNewline<R> {
    async fn next(&mut self) -> Result<Message, ReadError> {
        let mut message = self.reader.next().await?;
        let len = self.terminator_len(&message.content);
        message.content.truncate(message.content.len() - len);
        Ok(message)
    }

    async fn close(&mut self) -> Result<(), ReadError> {
        self.reader.close().await
    }
}
