use std::{any::Any, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Side-channel metadata attached to a [`Message`].
pub type Fields = Map<String, Value>;

/// Opaque value carried along with a message, never inspected by the readers.
pub type Private = Arc<dyn Any + Send + Sync>;

/// Flag added when some content bytes of a message were dropped.
pub const FLAG_TRUNCATED: &str = "truncated";

/// Flag added when a message was assembled from more than one line.
pub const FLAG_MULTILINE: &str = "multiline";

const LOG_KEY: &str = "log";
const FLAGS_KEY: &str = "flags";

/// The unit of data passed between all reader stages.
#[derive(Clone, Debug, Default)]
pub struct Message {
    /// Time the content was read.
    pub timestamp: DateTime<Utc>,
    /// The decoded content.
    pub content: Bytes,
    /// Number of raw source bytes consumed to produce this message.
    pub bytes: usize,
    /// Additional fields, merged when messages are combined.
    pub fields: Fields,
    /// Pass-through value for the consumer of the reader pipeline.
    pub private: Option<Private>,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(content: impl Into<Bytes>, bytes: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            content: content.into(),
            bytes,
            fields: Fields::new(),
            private: None,
        }
    }

    /// Returns `true` if no source bytes contributed to this message.
    pub const fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Merges `fields` into the message's fields.
    ///
    /// Nested objects are merged key by key, any other value replaces the
    /// existing one.
    pub fn merge_fields(&mut self, fields: &Fields) {
        merge_fields(&mut self.fields, fields);
    }

    /// Adds `flag` to the `log.flags` list unless it is already present.
    pub fn add_flag(&mut self, flag: &str) {
        let log = self
            .fields
            .entry(LOG_KEY)
            .or_insert_with(|| Value::Object(Fields::new()));
        if !log.is_object() {
            *log = Value::Object(Fields::new());
        }
        let Value::Object(log) = log else {
            return;
        };

        let flags = log
            .entry(FLAGS_KEY)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !flags.is_array() {
            *flags = Value::Array(Vec::new());
        }
        if let Value::Array(flags) = flags {
            if !flags.iter().any(|existing| existing.as_str() == Some(flag)) {
                flags.push(Value::from(flag));
            }
        }
    }

    /// The flags recorded under `log.flags`.
    pub fn flags(&self) -> Vec<&str> {
        self.fields
            .get(LOG_KEY)
            .and_then(|log| log.get(FLAGS_KEY))
            .and_then(Value::as_array)
            .map(|flags| flags.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags().contains(&flag)
    }
}

fn merge_fields(target: &mut Fields, incoming: &Fields) {
    for (key, value) in incoming {
        if let (Some(Value::Object(existing)), Value::Object(nested)) = (target.get_mut(key), value)
        {
            merge_fields(existing, nested);
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("test fields must be an object"),
        }
    }

    #[test]
    fn merge_keeps_existing_keys() {
        let mut message = Message::new("a", 1);
        message.fields = fields(json!({"stream": "stdout", "log": {"offset": 1}}));

        message.merge_fields(&fields(json!({"log": {"file": "x.log"}, "stream": "stderr"})));

        assert_eq!(
            Value::Object(message.fields),
            json!({"stream": "stderr", "log": {"offset": 1, "file": "x.log"}})
        );
    }

    #[test]
    fn flags_are_deduplicated() {
        let mut message = Message::new("a", 1);
        assert!(message.flags().is_empty());

        message.add_flag(FLAG_TRUNCATED);
        message.add_flag(FLAG_MULTILINE);
        message.add_flag(FLAG_TRUNCATED);

        assert_eq!(message.flags(), vec![FLAG_TRUNCATED, FLAG_MULTILINE]);
        assert!(message.has_flag(FLAG_MULTILINE));
    }

    #[test]
    fn flags_survive_field_merge() {
        let mut first = Message::new("a", 1);
        first.add_flag(FLAG_TRUNCATED);
        let mut second = Message::new("b", 1);
        second.merge_fields(&first.fields);

        assert!(second.has_flag(FLAG_TRUNCATED));
    }
}
