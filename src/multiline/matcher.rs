use regex::bytes::Regex;

use super::MatchDirection;

/// Decides whether a line continues the event started by the previous lines.
#[derive(Clone, Debug)]
pub struct Matcher {
    pattern: Regex,
    direction: MatchDirection,
    negate: bool,
}

impl Matcher {
    /// Creates a matcher testing `pattern` against the line selected by `direction`.
    pub const fn new(pattern: Regex, direction: MatchDirection, negate: bool) -> Self {
        Self {
            pattern,
            direction,
            negate,
        }
    }

    /// Returns `true` if `current` belongs to the same event as `previous`.
    pub fn matches(&self, previous: &[u8], current: &[u8]) -> bool {
        let line = match self.direction {
            MatchDirection::After => current,
            MatchDirection::Before => previous,
        };
        self.pattern.is_match(line) != self.negate
    }
}
