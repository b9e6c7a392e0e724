//! Multiline aggregation.
//!
//! Consecutive lines belonging to a single logical event, such as the frames of
//! a stack trace, are combined into one [`Message`](crate::Message). Lines are
//! joined with a separator and the consumed byte counts of all lines are added
//! up so that the combined message still advances the source offset exactly.

#![deny(missing_docs)]

use std::time::Duration;

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use snafu::{ensure, OptionExt, ResultExt, Snafu};

use crate::reader::{MessageReader, TimeoutReader};

mod counter;
mod matcher;
mod message_buffer;
mod pattern;
mod while_pattern;
mod wild_pattern;

pub use self::{
    counter::CountReader, matcher::Matcher, pattern::PatternReader,
    while_pattern::WhilePatternReader, wild_pattern::WildPatternReader,
};

/// Errors raised by invalid multiline settings.
#[derive(Debug, Snafu)]
pub enum BuildError {
    /// A pattern based mode was configured without a pattern.
    #[snafu(display("multiline.pattern cannot be empty when pattern based matching is enabled"))]
    MissingPattern,

    /// `pattern` mode was configured without `match`.
    #[snafu(display("multiline.match must be set to `after` or `before` in pattern mode"))]
    MissingMatch,

    /// `count` mode was configured without a positive line count.
    #[snafu(display("multiline.count_lines cannot be zero when count based is selected"))]
    ZeroCountLines,

    /// The pattern failed to compile.
    #[snafu(display("invalid multiline.pattern {:?}: {}", pattern, source))]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// The compilation error.
        source: regex::Error,
    },

    /// The flush pattern failed to compile.
    #[snafu(display("invalid multiline.flush_pattern {:?}: {}", pattern, source))]
    InvalidFlushPattern {
        /// The offending pattern.
        pattern: String,
        /// The compilation error.
        source: regex::Error,
    },
}

/// How lines are grouped into events.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Lines are grouped depending on whether they match `pattern`, in the
    /// direction given by `match`.
    #[default]
    Pattern,

    /// Every `count_lines` lines form one event.
    Count,

    /// Consecutive lines matching `pattern` form one event. A non matching
    /// line is passed through on its own.
    WhilePattern,

    /// Same grouping as `while_pattern`.
    WildPattern,
}

/// Which line `pattern` is tested against when deciding whether a line
/// continues the current event.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchDirection {
    /// The current line continues the event if it matches.
    After,
    /// The current line continues the event if the previous line matched.
    Before,
}

/// Configuration of multiline aggregation.
#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MultilineConfig {
    /// Aggregation mode.
    #[serde(rename = "type", default)]
    pub mode: Mode,

    /// Regular expression lines are tested against.
    ///
    /// Required by the `pattern`, `while_pattern` and `wild_pattern` modes.
    #[serde(default)]
    pub pattern: Option<String>,

    /// Inverts the result of `pattern`.
    #[serde(default)]
    pub negate: bool,

    /// Direction of the match, required by the `pattern` mode.
    #[serde(rename = "match", default)]
    pub match_direction: Option<MatchDirection>,

    /// A line matching this pattern ends the current event, `pattern` mode only.
    #[serde(default)]
    pub flush_pattern: Option<String>,

    /// Number of lines per event, required by the `count` mode.
    #[serde(default)]
    pub count_lines: Option<usize>,

    /// The maximum number of lines combined into one event. Further lines are
    /// dropped and the event is flagged as truncated. `0` means unlimited.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    /// The maximum size of a combined event. Defaults to the reader's `max_bytes`.
    #[serde(default)]
    pub max_bytes: Option<usize>,

    /// The maximum amount of time to wait for the next line, in milliseconds.
    ///
    /// Once this timeout is reached the buffered event is flushed, even if
    /// incomplete. Defaults to 5 seconds, `count` mode has no timeout unless
    /// set explicitly.
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
    pub timeout_ms: Option<Duration>,

    /// Joins lines without a separator.
    #[serde(default)]
    pub skip_newline: bool,
}

const fn default_max_lines() -> usize {
    500
}

const fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for MultilineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            pattern: None,
            negate: false,
            match_direction: None,
            flush_pattern: None,
            count_lines: None,
            max_lines: default_max_lines(),
            max_bytes: None,
            timeout_ms: None,
            skip_newline: false,
        }
    }
}

/// Settings shared by every aggregation mode.
#[derive(Clone, Debug)]
pub(crate) struct BufferSettings {
    pub(crate) separator: &'static str,
    pub(crate) max_bytes: usize,
    pub(crate) max_lines: usize,
    pub(crate) skip_separator: bool,
}

impl MultilineConfig {
    /// Checks the settings required by the configured mode are present.
    pub fn validate(&self) -> Result<(), BuildError> {
        match self.mode {
            Mode::Pattern => {
                ensure!(self.match_direction.is_some(), MissingMatchSnafu);
                ensure!(self.pattern.is_some(), MissingPatternSnafu);
            }
            Mode::Count => {
                ensure!(self.count_lines.unwrap_or(0) > 0, ZeroCountLinesSnafu);
            }
            Mode::WhilePattern | Mode::WildPattern => {
                ensure!(self.pattern.is_some(), MissingPatternSnafu);
            }
        }
        Ok(())
    }

    /// Wraps `reader` with the aggregator for the configured mode.
    ///
    /// `separator` joins the lines of an event, `max_bytes` bounds an event's
    /// size unless overridden by the configuration.
    pub fn build(
        &self,
        reader: Box<dyn MessageReader>,
        separator: &'static str,
        max_bytes: usize,
    ) -> Result<Box<dyn MessageReader>, BuildError> {
        self.validate()?;

        let settings = BufferSettings {
            separator,
            max_bytes: self.max_bytes.unwrap_or(max_bytes),
            max_lines: self.max_lines,
            skip_separator: self.skip_newline,
        };

        let timeout = match self.mode {
            Mode::Count => self.timeout_ms,
            _ => Some(self.timeout_ms.unwrap_or_else(default_timeout)),
        };
        let reader: Box<dyn MessageReader> = match timeout {
            Some(timeout) if !timeout.is_zero() => Box::new(TimeoutReader::new(reader, timeout)),
            _ => reader,
        };

        let reader: Box<dyn MessageReader> = match self.mode {
            Mode::Pattern => {
                let direction = self.match_direction.context(MissingMatchSnafu)?;
                let matcher = Matcher::new(self.compile_pattern()?, direction, self.negate);
                let flush = self
                    .flush_pattern
                    .as_deref()
                    .map(|pattern| {
                        Regex::new(pattern).context(InvalidFlushPatternSnafu { pattern })
                    })
                    .transpose()?;
                Box::new(PatternReader::new(reader, matcher, flush, &settings))
            }
            Mode::Count => {
                let count = self.count_lines.unwrap_or(0);
                Box::new(CountReader::new(reader, count, &settings))
            }
            Mode::WhilePattern => {
                let pattern = self.compile_pattern()?;
                Box::new(WhilePatternReader::new(reader, pattern, self.negate, &settings))
            }
            Mode::WildPattern => {
                let pattern = self.compile_pattern()?;
                Box::new(WildPatternReader::new(reader, pattern, self.negate, &settings))
            }
        };
        Ok(reader)
    }

    fn compile_pattern(&self) -> Result<Regex, BuildError> {
        let pattern = self.pattern.as_deref().context(MissingPatternSnafu)?;
        Regex::new(pattern).context(InvalidPatternSnafu { pattern })
    }
}
