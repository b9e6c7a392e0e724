use async_trait::async_trait;

use super::{MessageReader, ReadError};
use crate::{internal_events::MessageTruncated, message::FLAG_TRUNCATED, Message};

/// Truncates message content to at most `max_bytes` bytes.
///
/// Truncated messages are flagged but keep their consumed byte count.
pub struct LimitReader<R> {
    reader: R,
    max_bytes: usize,
}

impl<R> LimitReader<R> {
    pub const fn new(reader: R, max_bytes: usize) -> Self {
        Self { reader, max_bytes }
    }
}

#[async_trait]
impl<R: MessageReader> MessageReader for LimitReader<R> {
    async fn next(&mut self) -> Result<Message, ReadError> {
        let mut message = self.reader.next().await?;
        if self.max_bytes > 0 && message.content.len() > self.max_bytes {
            emit!(MessageTruncated {
                max_bytes: self.max_bytes,
                dropped_bytes: message.content.len() - self.max_bytes,
            });
            message.content.truncate(self.max_bytes);
            message.add_flag(FLAG_TRUNCATED);
        }
        Ok(message)
    }

    async fn close(&mut self) -> Result<(), ReadError> {
        self.reader.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{collect, ScriptedReader};

    #[tokio::test]
    async fn truncates_long_messages() {
        let mut reader = LimitReader::new(ScriptedReader::lines(&["short", "much too long"]), 5);

        let (messages, error) = collect(&mut reader).await;
        assert!(error.is_eof());

        assert_eq!(messages[0].content, "short");
        assert!(messages[0].flags().is_empty());

        assert_eq!(messages[1].content, "much ");
        assert_eq!(messages[1].bytes, 13);
        assert_eq!(messages[1].flags(), vec![FLAG_TRUNCATED]);
    }

    #[tokio::test]
    async fn zero_disables_the_limit() {
        let mut reader = LimitReader::new(ScriptedReader::lines(&["unbounded"]), 0);

        let message = reader.next().await.unwrap();
        assert_eq!(message.content, "unbounded");
        assert!(!message.has_flag(FLAG_TRUNCATED));
    }
}
