use std::mem;

use async_trait::async_trait;
use regex::bytes::Regex;

use super::{message_buffer::MessageBuffer, BufferSettings};
use crate::{internal_events::MultilineFlushedAfterError, Message, MessageReader, ReadError};

enum State {
    ReadFirst,
    ReadNext,
    /// The buffer holds a single non matching line to be returned as is.
    NotMatchedLoaded,
    Failed(ReadError),
    Closed,
}

/// Combines consecutive lines matching a pattern.
///
/// A line that does not match is never combined with anything: it is returned
/// on its own, after the event it ended if there was one.
pub struct WhilePatternReader<R> {
    reader: R,
    pattern: Regex,
    negate: bool,
    buffer: MessageBuffer,
    state: State,
}

impl<R: MessageReader> WhilePatternReader<R> {
    pub(crate) fn new(reader: R, pattern: Regex, negate: bool, settings: &BufferSettings) -> Self {
        Self {
            reader,
            pattern,
            negate,
            buffer: MessageBuffer::new(settings),
            state: State::ReadFirst,
        }
    }

    fn matches(&self, line: &[u8]) -> bool {
        self.pattern.is_match(line) != self.negate
    }

    async fn read_first(&mut self) -> Result<Message, ReadError> {
        loop {
            match self.reader.next().await {
                Err(error) if error.is_timeout() => continue,
                Err(error) => return Err(error),
                Ok(message) if message.is_empty() => continue,
                Ok(message) if !self.matches(&message.content) => return Ok(message),
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

            if self.matches(&message.content) {
                self.buffer.add_line(message);
                continue;
            }

            let event = self.buffer.finalize("pattern");
            self.buffer.start_new(message);
            self.state = State::NotMatchedLoaded;
            return Ok(event);
        }
    }
}

#[async_trait]
impl<R: MessageReader> MessageReader for WhilePatternReader<R> {
    async fn next(&mut self) -> Result<Message, ReadError> {
        match mem::replace(&mut self.state, State::ReadFirst) {
            State::ReadFirst => self.read_first().await,
            State::ReadNext => {
                self.state = State::ReadNext;
                self.read_next().await
            }
            State::NotMatchedLoaded => Ok(self.buffer.finalize("not_matched")),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::FLAG_MULTILINE,
        test_util::{
            collect, contents, ScriptedReader,
            Step::{self, Fail, Line, Timeout},
        },
    };

    fn reader(steps: impl IntoIterator<Item = Step>, negate: bool) -> WhilePatternReader<ScriptedReader> {
        WhilePatternReader::new(
            ScriptedReader::new(steps),
            Regex::new(r"^\s").unwrap(),
            negate,
            &BufferSettings {
                separator: "\n",
                max_bytes: 0,
                max_lines: 0,
                skip_separator: false,
            },
        )
    }

    #[tokio::test]
    async fn non_matching_lines_pass_through() {
        let mut reader = reader(
            [
                Line("header"),
                Line(" one"),
                Line(" two"),
                Line("footer"),
                Line("other"),
            ],
            false,
        );

        let (messages, error) = collect(&mut reader).await;

        assert!(error.is_eof());
        assert_eq!(contents(&messages), vec!["header", " one\n two", "footer", "other"]);
        assert!(!messages[0].has_flag(FLAG_MULTILINE));
        assert!(messages[1].has_flag(FLAG_MULTILINE));
        assert!(!messages[2].has_flag(FLAG_MULTILINE));
        assert_eq!(messages[1].bytes, 8);
    }

    #[tokio::test]
    async fn joins_without_separator() {
        let mut reader = WhilePatternReader::new(
            ScriptedReader::lines(&["not-matching", "{matching}", "{also}", "not-matching-2"]),
            Regex::new(r"^\{").unwrap(),
            false,
            &BufferSettings {
                separator: "\n",
                max_bytes: 0,
                max_lines: 0,
                skip_separator: true,
            },
        );

        let (messages, _) = collect(&mut reader).await;

        assert_eq!(
            contents(&messages),
            vec!["not-matching", "{matching}{also}", "not-matching-2"]
        );
        assert!(!messages[0].has_flag(FLAG_MULTILINE));
        assert!(messages[1].has_flag(FLAG_MULTILINE));
    }

    #[tokio::test]
    async fn negate_groups_non_matching_lines() {
        let mut reader = reader(
            [Line("a"), Line("b"), Line(" c"), Line("d")],
            true,
        );

        let (messages, _) = collect(&mut reader).await;

        assert_eq!(contents(&messages), vec!["a\nb", " c", "d"]);
    }

    #[tokio::test]
    async fn timeout_flushes_buffered_event() {
        let mut reader = reader([Line(" a"), Timeout, Line(" b")], false);

        let (messages, _) = collect(&mut reader).await;

        assert_eq!(contents(&messages), vec![" a", " b"]);
    }

    #[tokio::test]
    async fn error_is_returned_after_buffered_event() {
        let mut reader = reader([Line(" a"), Line(" b"), Fail("gone"), Line("c")], false);

        assert_eq!(reader.next().await.unwrap().content, " a\n b");
        assert!(matches!(
            reader.next().await.unwrap_err(),
            ReadError::Io { .. }
        ));
        assert_eq!(reader.next().await.unwrap().content, "c");
        assert!(reader.next().await.unwrap_err().is_eof());
    }
}
