//! Canonical keywords.
//!
//! A raw keyword from a subscriber is trimmed and lowercased exactly once,
//! when it is turned into a [`Keyword`]. Everything past that point compares
//! canonical strings only.

use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;

/// A trimmed, lowercased, non-empty filter term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Keyword(String);

impl Keyword {
    /// Canonicalize a raw keyword. Returns None if nothing is left after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let canonical = raw.trim().to_lowercase();
        if canonical.is_empty() {
            None
        } else {
            Some(Self(canonical))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Plain substring test against text that is already lowercased.
    /// Not word-boundary aware: "art" occurs in "smart".
    #[inline]
    pub fn occurs_in(&self, lowercased_text: &str) -> bool {
        lowercased_text.contains(self.0.as_str())
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Keyword {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Keyword {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<Keyword> for String {
    fn from(keyword: Keyword) -> Self {
        keyword.0
    }
}
