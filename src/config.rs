//! User facing settings of the reader pipeline.
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tokio::io::AsyncRead;

use crate::{
    multiline::{self, MultilineConfig},
    reader::{
        EncodeReader, LimitReader, LineBuildError, LineReader, LineReaderConfig, MessageReader,
        StripNewline,
    },
};

/// Separator inserted between the lines of a multiline event.
const MULTILINE_SEPARATOR: &str = "\n";

/// The line reader accepts lines this many times longer than `max_bytes` so
/// that oversized lines can still be truncated instead of silently dropped.
const LINE_READER_HEADROOM: usize = 4;

/// Errors raised while building a reader pipeline.
#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("invalid line reader settings: {}", source))]
    LineReader { source: LineBuildError },

    #[snafu(display("invalid multiline settings: {}", source))]
    Multiline { source: multiline::BuildError },
}

/// Character set encoding.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct EncodingConfig {
    /// Encoding of the source.
    ///
    /// This is a label as defined by the [WHATWG Encoding
    /// Standard](https://encoding.spec.whatwg.org/#names-and-labels), e.g.
    /// `utf-16le` or `shift_jis`.
    pub charset: &'static Encoding,
}

impl EncodingConfig {
    /// Looks up an encoding by its label, ignoring case and surrounding whitespace.
    pub fn for_label(label: &str) -> Option<Self> {
        Encoding::for_label(label.as_bytes()).map(|charset| Self { charset })
    }
}

/// The sequence of characters that ends a line.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineTerminator {
    /// Line feed, with a preceding carriage return removed as well.
    #[default]
    Auto,
    /// `\n`
    LineFeed,
    /// `\x0B`
    VerticalTab,
    /// `\x0C`
    FormFeed,
    /// `\r`
    CarriageReturn,
    /// `\r\n`
    CarriageReturnLineFeed,
    /// `U+0085`
    NextLine,
    /// `U+2028`
    LineSeparator,
    /// `U+2029`
    ParagraphSeparator,
    /// `\0`
    NullTerminator,
}

impl LineTerminator {
    /// The terminator as a utf8 string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto | Self::LineFeed => "\n",
            Self::VerticalTab => "\x0B",
            Self::FormFeed => "\x0C",
            Self::CarriageReturn => "\r",
            Self::CarriageReturnLineFeed => "\r\n",
            Self::NextLine => "\u{85}",
            Self::LineSeparator => "\u{2028}",
            Self::ParagraphSeparator => "\u{2029}",
            Self::NullTerminator => "\0",
        }
    }

    pub const fn is_auto(self) -> bool {
        matches!(self, Self::Auto)
    }
}

/// Configuration of the reader pipeline for a single source.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReaderConfig {
    /// Charset of the source. Bytes are passed through untouched if unset.
    #[serde(default)]
    pub encoding: Option<EncodingConfig>,

    #[serde(default)]
    pub line_terminator: LineTerminator,

    /// Size of a single read from the source.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// The maximum size of a message. Longer messages are truncated.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Returns the undelimited bytes left at the end of the source as a final
    /// line.
    ///
    /// Only suitable for sources that are complete once read, such as a
    /// downloaded object. When unset an incomplete line is held back until its
    /// terminator is written.
    #[serde(default)]
    pub collect_on_eof: bool,

    /// Multiline aggregation configuration.
    ///
    /// If not specified, multiline aggregation is disabled.
    #[serde(default)]
    pub multiline: Option<MultilineConfig>,
}

const fn default_buffer_size() -> usize {
    16 * 1024
}

const fn default_max_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            encoding: None,
            line_terminator: LineTerminator::default(),
            buffer_size: default_buffer_size(),
            max_bytes: default_max_bytes(),
            collect_on_eof: false,
            multiline: None,
        }
    }
}

impl ReaderConfig {
    /// Builds the reader pipeline on top of `source`.
    pub fn build<R>(&self, source: R) -> Result<Box<dyn MessageReader>, BuildError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let lines = LineReader::new(
            source,
            LineReaderConfig {
                encoding: self.encoding.as_ref().map(|encoding| encoding.charset),
                terminator: self.line_terminator,
                buffer_size: self.buffer_size,
                max_bytes: self.max_bytes.saturating_mul(LINE_READER_HEADROOM),
                collect_on_eof: self.collect_on_eof,
            },
        )
        .context(LineReaderSnafu)?;

        let reader: Box<dyn MessageReader> = Box::new(StripNewline::new(
            EncodeReader::new(lines),
            self.line_terminator,
        ));

        let reader = match &self.multiline {
            Some(multiline) => multiline
                .build(reader, MULTILINE_SEPARATOR, self.max_bytes)
                .context(MultilineSnafu)?,
            None => reader,
        };

        Ok(Box::new(LimitReader::new(reader, self.max_bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config: ReaderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ReaderConfig::default());
        assert_eq!(config.buffer_size, 16384);
        assert_eq!(config.max_bytes, 10485760);
        assert!(config.line_terminator.is_auto());
        assert!(!config.collect_on_eof);
    }

    #[test]
    fn parses_full_config() {
        let config: ReaderConfig = serde_json::from_str(
            r#"{
                "encoding": {"charset": "utf-16le"},
                "line_terminator": "carriage_return_line_feed",
                "buffer_size": 1024,
                "max_bytes": 2048,
                "multiline": {"type": "count", "count_lines": 3}
            }"#,
        )
        .unwrap();

        assert_eq!(config.encoding.unwrap().charset, encoding_rs::UTF_16LE);
        assert_eq!(config.line_terminator.as_str(), "\r\n");
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.multiline.unwrap().count_lines, Some(3));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(serde_json::from_str::<ReaderConfig>(r#"{"line_delimiter": "\n"}"#).is_err());
    }

    #[test]
    fn rejects_unknown_terminator() {
        assert!(
            serde_json::from_str::<ReaderConfig>(r#"{"line_terminator": "semicolon"}"#).is_err()
        );
    }

    #[test]
    fn encoding_lookup_by_label() {
        assert_eq!(
            EncodingConfig::for_label(" UTF-16BE ").map(|e| e.charset),
            Some(encoding_rs::UTF_16BE)
        );
        assert_eq!(
            EncodingConfig::for_label("latin1").map(|e| e.charset),
            Some(encoding_rs::WINDOWS_1252)
        );
        assert!(EncodingConfig::for_label("klingon").is_none());
    }

    #[tokio::test]
    async fn build_rejects_invalid_multiline_settings() {
        let config: ReaderConfig =
            serde_json::from_str(r#"{"multiline": {"type": "pattern", "match": "after"}}"#)
                .unwrap();

        let error = config.build(&b""[..]).err().unwrap();
        assert!(matches!(error, BuildError::Multiline { .. }), "{error}");
    }

    #[tokio::test]
    async fn build_rejects_zero_buffer_size() {
        let config = ReaderConfig {
            buffer_size: 0,
            ..Default::default()
        };

        let error = config.build(&b""[..]).err().unwrap();
        assert!(matches!(error, BuildError::LineReader { .. }), "{error}");
    }

    #[tokio::test]
    async fn builds_plain_pipeline() {
        let mut reader = ReaderConfig::default()
            .build(&b"one\r\ntwo\n"[..])
            .unwrap();

        let first = reader.next().await.unwrap();
        assert_eq!(first.content, "one");
        assert_eq!(first.bytes, 5);
        let second = reader.next().await.unwrap();
        assert_eq!(second.content, "two");
        assert_eq!(second.bytes, 4);
        assert!(reader.next().await.unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn holds_back_unterminated_line_unless_collecting() {
        let mut reader = ReaderConfig::default().build(&b"one
tw"[..]).unwrap();
        assert_eq!(reader.next().await.unwrap().content, "one");
        assert!(reader.next().await.unwrap_err().is_eof());

        let config: ReaderConfig = serde_json::from_str(r#"{"collect_on_eof": true}"#).unwrap();
        let mut reader = config.build(&b"one\ntw"[..]).unwrap();
        assert_eq!(reader.next().await.unwrap().content, "one");
        let last = reader.next().await.unwrap();
        assert_eq!(last.content, "tw");
        assert_eq!(last.bytes, 2);
        assert!(reader.next().await.unwrap_err().is_eof());
    }
}
