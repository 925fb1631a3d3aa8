//! Glob-like matchers over tool names.
//!
//! A matcher is one or more glob patterns joined by `|`; the matcher
//! matches when any alternative does. `*` and `?` carry their usual glob
//! meaning. Matchers apply only to tool events.

use glob::Pattern;

use crate::error::{Error, Result};

/// A compiled tool-name matcher.
#[derive(Debug, Clone)]
pub struct Matcher {
    raw: String,
    alternatives: Vec<Pattern>,
}

impl Matcher {
    /// Compile a matcher from a `|`-joined list of glob patterns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty or malformed pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(Error::validation("empty hook matcher"));
        }
        let alternatives = pattern
            .split('|')
            .map(str::trim)
            .map(|alt| {
                Pattern::new(alt)
                    .map_err(|e| Error::validation(format!("bad matcher '{alt}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            raw: pattern.to_owned(),
            alternatives,
        })
    }

    /// Whether `name` matches any alternative.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.alternatives.iter().any(|p| p.matches(name))
    }

    /// The original pattern text.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.raw
    }
}
