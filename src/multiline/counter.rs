use std::mem;

use async_trait::async_trait;

use super::{message_buffer::MessageBuffer, BufferSettings};
use crate::{internal_events::MultilineFlushedAfterError, Message, MessageReader, ReadError};

enum State {
    ReadFirst,
    ReadNext,
    Failed(ReadError),
    Closed,
}

/// Combines a fixed number of lines into each event.
pub struct CountReader<R> {
    reader: R,
    lines_count: usize,
    buffer: MessageBuffer,
    state: State,
}

impl<R: MessageReader> CountReader<R> {
    pub(crate) fn new(reader: R, lines_count: usize, settings: &BufferSettings) -> Self {
        Self {
            reader,
            lines_count,
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
                    if self.buffer.processed_lines() >= self.lines_count {
                        return Ok(self.buffer.finalize("count"));
                    }
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

            self.buffer.add_line(message);
            if self.buffer.processed_lines() >= self.lines_count {
                self.state = State::ReadFirst;
                return Ok(self.buffer.finalize("count"));
            }
        }
    }
}

#[async_trait]
impl<R: MessageReader> MessageReader for CountReader<R> {
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
