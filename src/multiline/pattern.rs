use std::mem;

use async_trait::async_trait;
use regex::bytes::Regex;

use super::{message_buffer::MessageBuffer, BufferSettings, Matcher};
use crate::{internal_events::MultilineFlushedAfterError, Message, MessageReader, ReadError};

enum State {
    /// Waiting for the first line of an event.
    ReadFirst,
    /// Adding lines to the buffered event.
    ReadNext,
    /// The buffered event was returned, the error that ended it is next.
    Failed(ReadError),
    Closed,
}

/// Combines lines based on a pattern tested against the current or the
/// previous line.
///
/// A buffered event is returned as soon as a line does not continue it, when
/// the inner reader times out, or when a line matches the optional flush
/// pattern. Errors of the inner reader are returned after the buffered event.
pub struct PatternReader<R> {
    reader: R,
    matcher: Matcher,
    flush_pattern: Option<Regex>,
    buffer: MessageBuffer,
    state: State,
}

impl<R: MessageReader> PatternReader<R> {
    pub(crate) fn new(
        reader: R,
        matcher: Matcher,
        flush_pattern: Option<Regex>,
        settings: &BufferSettings,
    ) -> Self {
        Self {
            reader,
            matcher,
            flush_pattern,
            buffer: MessageBuffer::new(settings),
            state: State::ReadFirst,
        }
    }

    async fn read_first(&mut self) -> Result<Message, ReadError> {
        loop {
            match self.reader.next().await {
                Err(error) if error.is_timeout() => continue,
                Err(error) => return Err(error),
                Ok(message) if message.is_empty() => continue,
                Ok(message) => {
                    self.buffer.start_new(message);
                    self.state = State::ReadNext;
                    return self.read_next().await;
                }
            }
        }
    }

    async fn read_next(&mut self) -> Result<Message, ReadError> {
        loop {
            let message = match self.reader.next().await {
                Ok(message) => message,
                Err(error) if error.is_timeout() => {
                    if self.buffer.is_empty() {
                        continue;
                    }
                    self.state = State::ReadFirst;
                    return Ok(self.buffer.finalize("timeout"));
                }
                Err(error) => {
                    if self.buffer.is_empty() {
                        self.state = State::ReadFirst;
                        return Err(error);
                    }
                    emit!(MultilineFlushedAfterError {
                        error: &error,
                        lines: self.buffer.processed_lines(),
                    });
                    self.state = State::Failed(error);
                    return Ok(self.buffer.finalize("error"));
                }
            };

            if message.is_empty() {
                continue;
            }

            if self
                .flush_pattern
                .as_ref()
                .is_some_and(|pattern| pattern.is_match(&message.content))
            {
                self.buffer.add_line(message);
                self.state = State::ReadFirst;
                return Ok(self.buffer.finalize("flush_pattern"));
            }

            if self.buffer.is_empty_message()
                || self
                    .matcher
                    .matches(self.buffer.last_line(), &message.content)
            {
                self.buffer.add_line(message);
                continue;
            }

            let event = self.buffer.finalize("pattern");
            self.buffer.load(message);
            return Ok(event);
        }
    }
}

#[async_trait]
impl<R: MessageReader> MessageReader for PatternReader<R> {
    async fn next(&mut self) -> Result<Message, ReadError> {
        match mem::replace(&mut self.state, State::ReadFirst) {
            State::ReadFirst => self.read_first().await,
            State::ReadNext => {
                self.state = State::ReadNext;
                self.read_next().await
            }
            State::Failed(error) => Err(error),
            State::Closed => {
                self.state = State::Closed;
                Err(ReadError::Eof)
            }
        }
    }

    async fn close(&mut self) -> Result<(), ReadError> {
        self.state = State::Closed;
        self.buffer.clear();
        self.reader.close().await
    }
}
