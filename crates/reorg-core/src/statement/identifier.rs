//! Validated SQL identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Empty identifier.
    #[error("identifier is empty")]
    Empty,

    /// Identifier exceeds the maximum length.
    #[error("identifier '{name}' is {len} characters, maximum is {max}")]
    TooLong {
        /// The offending identifier.
        name: String,
        /// Its length.
        len: usize,
        /// The limit.
        max: usize,
    },

    /// Identifier does not start with a letter.
    #[error("identifier '{name}' must start with a letter")]
    InvalidStart {
        /// The offending identifier.
        name: String,
    },

    /// Identifier contains a character outside `[A-Za-z0-9_$#]`.
    #[error("identifier '{name}' contains invalid character {ch:?}")]
    InvalidChar {
        /// The offending identifier.
        name: String,
        /// First invalid character.
        ch: char,
    },
}

/// An unquoted SQL identifier, normalized to upper case.
///
/// Only `[A-Z][A-Z0-9_$#]*` is accepted, so an `Identifier` can be rendered
/// into statement text without quoting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Maximum identifier length in characters.
    pub const MAX_LEN: usize = 128;

    /// Validate and normalize an identifier.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, IdentifierError> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(IdentifierError::Empty);
        }
        let len = raw.chars().count();
        if len > Self::MAX_LEN {
            return Err(IdentifierError::TooLong {
                name: raw.to_string(),
                len,
                max: Self::MAX_LEN,
            });
        }

        let mut chars = raw.chars();
        if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(IdentifierError::InvalidStart {
                name: raw.to_string(),
            });
        }
        if let Some(ch) = chars.find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'))) {
            return Err(IdentifierError::InvalidChar {
                name: raw.to_string(),
                ch,
            });
        }

        Ok(Self(raw.to_ascii_uppercase()))
    }

    /// Derive a new identifier by appending a suffix, truncating the base so
    /// the result stays within [`Identifier::MAX_LEN`].
    pub fn with_suffix(&self, suffix: &str) -> Result<Self, IdentifierError> {
        let keep = Self::MAX_LEN.saturating_sub(suffix.chars().count());
        let base: String = self.0.chars().take(keep).collect();
        Self::new(format!("{base}{suffix}"))
    }

    /// The normalized identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against raw text.
    pub fn matches(&self, raw: &str) -> bool {
        self.0.eq_ignore_ascii_case(raw.trim())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
