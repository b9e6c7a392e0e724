use async_trait::async_trait;
use regex::bytes::Regex;

use super::{message_buffer::MessageBuffer, BufferSettings};
use crate::{internal_events::MultilineFlushedAfterError, Message, MessageReader, ReadError};

/// Combines consecutive lines matching a pattern, like
/// [`WhilePatternReader`](super::WhilePatternReader).
///
/// Rather than switching between states, every call runs a single loop and the
/// line that ended an event is held in the buffer, marked as not matched.
pub struct WildPatternReader<R> {
    reader: R,
    pattern: Regex,
    negate: bool,
    buffer: MessageBuffer,
    pending_error: Option<ReadError>,
    closed: bool,
}

impl<R: MessageReader> WildPatternReader<R> {
    pub(crate) fn new(reader: R, pattern: Regex, negate: bool, settings: &BufferSettings) -> Self {
        Self {
            reader,
            pattern,
            negate,
            buffer: MessageBuffer::new(settings),
            pending_error: None,
            closed: false,
        }
    }
}

#[async_trait]
impl<R: MessageReader> MessageReader for WildPatternReader<R> {
    async fn next(&mut self) -> Result<Message, ReadError> {
        if self.closed {
            return Err(ReadError::Eof);
        }
        if let Some(error) = self.pending_error.take() {
            return Err(error);
        }
        if self.buffer.not_matched() {
            return Ok(self.buffer.finalize("not_matched"));
        }

        loop {
            let message = match self.reader.next().await {
                Ok(message) => message,
                Err(error) if error.is_timeout() => {
                    if self.buffer.is_empty() {
                        continue;
                    }
                    return Ok(self.buffer.finalize("timeout"));
                }
                Err(error) => {
                    if self.buffer.is_empty() {
                        return Err(error);
                    }
                    emit!(MultilineFlushedAfterError {
                        error: &error,
                        lines: self.buffer.processed_lines(),
                    });
                    self.pending_error = Some(error);
                    return Ok(self.buffer.finalize("error"));
                }
            };

            if message.is_empty() {
                continue;
            }

            let matched = self.pattern.is_match(&message.content) != self.negate;
            match (self.buffer.is_empty(), matched) {
                (true, false) => return Ok(message),
                (true, true) => self.buffer.start_new(message),
                (false, true) => self.buffer.add_line(message),
                (false, false) => {
                    let event = self.buffer.finalize("pattern");
                    self.buffer.start_new(message);
                    self.buffer.set_not_matched();
                    return Ok(event);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ReadError> {
        self.closed = true;
        self.buffer.clear();
        self.reader.close().await
    }
}
