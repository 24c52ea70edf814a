//! Group display names derived from group ids.

use regex::Regex;
use tracing::warn;

/// A provider's group-name pattern.
///
/// The display name of a group is the pattern's first capture group, or
/// the whole match when the pattern has no groups, or the gid itself when
/// the pattern does not match.
#[derive(Debug, Clone)]
pub struct DisplayNamePattern {
    regex: Option<Regex>,
}

impl DisplayNamePattern {
    /// Compiles a pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Some(Regex::new(pattern)?),
        })
    }

    /// Compiles a pattern, falling back to verbatim gids if it is invalid.
    #[must_use]
    pub fn lenient(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(regex) => Self { regex: Some(regex) },
            Err(e) => {
                warn!(pattern, error = %e, "invalid groups regex, using gids verbatim");
                Self { regex: None }
            }
        }
    }

    /// Derives the display name of `gid`.
    #[must_use]
    pub fn display_name(&self, gid: &str) -> String {
        self.regex
            .as_ref()
            .and_then(|regex| regex.captures(gid))
            .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map_or_else(|| gid.to_string(), |m| m.as_str().to_string())
    }
}
