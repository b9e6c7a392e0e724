use std::mem;

use bytes::{Bytes, BytesMut};

use super::BufferSettings;
use crate::{
    internal_events::MultilineFlushed,
    message::{FLAG_MULTILINE, FLAG_TRUNCATED},
    Message,
};

/// Accumulates lines into a single message.
pub(crate) struct MessageBuffer {
    settings: BufferSettings,
    /// The message being built, its content is kept in `content` until finalized.
    message: Message,
    content: BytesMut,
    /// Content of the last line added, whether it was kept or not.
    last: Bytes,
    /// Lines whose content was kept.
    num_lines: usize,
    /// Lines added, including the ones whose content was dropped.
    processed_lines: usize,
    /// Content bytes dropped because of `max_bytes` or `max_lines`.
    truncated: usize,
    /// The buffered line did not match and has to be returned on its own.
    not_matched: bool,
}

impl MessageBuffer {
    pub(crate) fn new(settings: &BufferSettings) -> Self {
        Self {
            settings: settings.clone(),
            message: Message::default(),
            content: BytesMut::new(),
            last: Bytes::new(),
            num_lines: 0,
            processed_lines: 0,
            truncated: 0,
            not_matched: false,
        }
    }

    /// Starts a new message from `message`, discarding anything buffered.
    pub(crate) fn start_new(&mut self, message: Message) {
        self.clear();
        self.load(message);
    }

    /// Adds `message` as the first line, taking over its timestamp.
    pub(crate) fn load(&mut self, message: Message) {
        let timestamp = message.timestamp;
        let private = message.private.clone();
        self.add_line(message);
        self.message.timestamp = timestamp;
        if self.message.private.is_none() {
            self.message.private = private;
        }
    }

    /// Appends a line to the message.
    ///
    /// Content beyond `max_bytes` or past `max_lines` is dropped, but the
    /// consumed bytes and fields of the line are always kept.
    pub(crate) fn add_line(&mut self, message: Message) {
        if message.is_empty() {
            return;
        }

        let separator = self.settings.separator.as_bytes();
        let add_separator =
            self.num_lines > 0 && !separator.is_empty() && !self.settings.skip_separator;

        let mut size = self.content.len();
        if add_separator {
            size += separator.len();
        }

        let max_bytes = self.settings.max_bytes;
        let max_lines = self.settings.max_lines;
        let fits_bytes = max_bytes == 0 || size < max_bytes;
        let fits_lines = max_lines == 0 || self.num_lines < max_lines;

        if fits_bytes && fits_lines {
            let kept = if max_bytes == 0 {
                message.content.len()
            } else {
                message.content.len().min(max_bytes - size)
            };
            if add_separator {
                self.content.extend_from_slice(separator);
            }
            self.content.extend_from_slice(&message.content[..kept]);
            self.truncated += message.content.len() - kept;
            self.num_lines += 1;
        } else {
            self.truncated += message.content.len();
        }

        self.last = message.content;
        self.message.bytes += message.bytes;
        self.message.merge_fields(&message.fields);
        self.processed_lines += 1;
    }

    /// Returns the buffered message and resets the buffer.
    pub(crate) fn finalize(&mut self, reason: &'static str) -> Message {
        let mut message = mem::take(&mut self.message);
        message.content = self.content.split().freeze();

        if self.truncated > 0 {
            message.add_flag(FLAG_TRUNCATED);
        }
        if self.num_lines > 1 {
            message.add_flag(FLAG_MULTILINE);
        }

        emit!(MultilineFlushed {
            reason,
            lines: self.processed_lines,
            bytes: message.bytes,
        });

        self.clear();
        message
    }

    pub(crate) fn clear(&mut self) {
        self.message = Message::default();
        self.content.clear();
        self.last = Bytes::new();
        self.num_lines = 0;
        self.processed_lines = 0;
        self.truncated = 0;
        self.not_matched = false;
    }

    /// Returns `true` if no line content is buffered.
    pub(crate) const fn is_empty(&self) -> bool {
        self.num_lines == 0
    }

    /// Returns `true` if the buffered lines consumed no source bytes.
    pub(crate) const fn is_empty_message(&self) -> bool {
        self.message.bytes == 0
    }

    pub(crate) const fn last_line(&self) -> &Bytes {
        &self.last
    }

    pub(crate) const fn processed_lines(&self) -> usize {
        self.processed_lines
    }

    pub(crate) const fn not_matched(&self) -> bool {
        self.not_matched
    }

    pub(crate) fn set_not_matched(&mut self) {
        self.not_matched = true;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn settings(max_bytes: usize, max_lines: usize) -> BufferSettings {
        BufferSettings {
            separator: "\n",
            max_bytes,
            max_lines,
            skip_separator: false,
        }
    }

    fn line(content: &'static str) -> Message {
        Message::new(content, content.len() + 1)
    }

    #[test]
    fn joins_lines_with_separator() {
        let mut buffer = MessageBuffer::new(&settings(0, 0));
        buffer.start_new(line("first"));
        buffer.add_line(line("  second"));

        let message = buffer.finalize("test");
        assert_eq!(message.content, "first\n  second");
        assert_eq!(message.bytes, 15);
        assert_eq!(message.flags(), vec![FLAG_MULTILINE]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn single_line_is_not_flagged() {
        let mut buffer = MessageBuffer::new(&settings(0, 0));
        buffer.start_new(line("alone"));

        let message = buffer.finalize("test");
        assert_eq!(message.content, "alone");
        assert!(message.flags().is_empty());
    }

    #[test]
    fn skip_separator_concatenates() {
        let mut buffer = MessageBuffer::new(&BufferSettings {
            skip_separator: true,
            ..settings(0, 0)
        });
        buffer.start_new(line("a"));
        buffer.add_line(line("b"));

        assert_eq!(buffer.finalize("test").content, "ab");
    }

    #[test]
    fn empty_first_line_keeps_separator() {
        let mut buffer = MessageBuffer::new(&settings(0, 0));
        buffer.start_new(line(""));
        buffer.add_line(line("b"));

        assert_eq!(buffer.finalize("test").content, "\nb");
    }

    #[test]
    fn ignores_lines_without_consumed_bytes() {
        let mut buffer = MessageBuffer::new(&settings(0, 0));
        buffer.start_new(line("a"));
        buffer.add_line(Message::new("ghost", 0));

        assert_eq!(buffer.processed_lines(), 1);
        assert_eq!(buffer.finalize("test").content, "a");
    }

    #[test]
    fn truncates_at_max_bytes() {
        let mut buffer = MessageBuffer::new(&settings(8, 0));
        buffer.start_new(line("12345"));
        buffer.add_line(line("67890"));
        buffer.add_line(line("dropped"));

        assert_eq!(buffer.processed_lines(), 3);
        let message = buffer.finalize("test");
        assert_eq!(message.content, "12345\n67");
        assert_eq!(message.bytes, 6 + 6 + 8);
        assert_eq!(message.flags(), vec![FLAG_TRUNCATED, FLAG_MULTILINE]);
    }

    #[test]
    fn truncates_at_max_lines() {
        let mut buffer = MessageBuffer::new(&settings(0, 2));
        buffer.start_new(line("a"));
        buffer.add_line(line("b"));
        buffer.add_line(line("c"));

        let message = buffer.finalize("test");
        assert_eq!(message.content, "a\nb");
        assert_eq!(message.bytes, 6);
        assert!(message.has_flag(FLAG_TRUNCATED));
    }

    #[test]
    fn keeps_first_timestamp_and_merges_fields() {
        let mut buffer = MessageBuffer::new(&settings(0, 0));
        let mut first = line("a");
        first.fields.insert("source".into(), json!("app.log"));
        let timestamp = first.timestamp;
        let mut second = line("b");
        second.fields.insert("stream".into(), json!("stderr"));

        buffer.start_new(first);
        buffer.add_line(second);
        assert_eq!(buffer.last_line(), &Bytes::from("b"));

        let message = buffer.finalize("test");
        assert_eq!(message.timestamp, timestamp);
        assert_eq!(message.fields.get("source"), Some(&json!("app.log")));
        assert_eq!(message.fields.get("stream"), Some(&Value::from("stderr")));
    }
}
