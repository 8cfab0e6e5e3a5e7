/// TN VED code normalization.
///
/// This is the one place that decides what a classification code looks like. The
/// document extractor validates with it, the rate fetcher keys its table with it and
/// the matcher looks codes up with it, so all three always agree.
///
/// Rule: drop whitespace (including NBSP) and the separators `.`, `-`, `_`, `/`, then
/// drop a trailing footnote mark (`*` or letters, as in `8703 21 10*`) that follows at
/// least one digit; what remains must be 2 to 10 ASCII digits. Leading zeros are
/// significant (chapters 01-09).
use std::fmt;

use serde::{Deserialize, Serialize};

pub const MIN_DIGITS: usize = 2;
pub const MAX_DIGITS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("code is empty")]
    Empty,

    #[error("code contains non-digit character {0:?}")]
    InvalidCharacter(char),

    #[error("code has {0} digits, expected {MIN_DIGITS} to {MAX_DIGITS}")]
    Length(usize),
}

/// A normalized classification code, usable as a match key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CodeKey(String);

impl CodeKey {
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let compact: String = raw.chars().filter(|c| !is_separator(*c)).collect();
        let digits = without_footnote(&compact);
        if digits.is_empty() {
            return Err(CodeError::Empty);
        }
        if let Some(bad) = digits.chars().find(|c| !c.is_ascii_digit()) {
            return Err(CodeError::InvalidCharacter(bad));
        }
        let len = digits.len();
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&len) {
            return Err(CodeError::Length(len));
        }
        Ok(Self(digits.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Proper prefixes of this key that are still valid keys, longest first.
    ///
    /// `"12345600"` yields `"1234560"`, `"123456"`, ... down to `"12"`.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> + '_ {
        (MIN_DIGITS..self.0.len()).rev().map(move |n| &self.0[..n])
    }
}

impl fmt::Display for CodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for CodeKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CodeKey {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CodeKey::parse(&value)
    }
}

impl From<CodeKey> for String {
    fn from(key: CodeKey) -> Self {
        key.0
    }
}

/// Display form of a code as written in a document: whitespace and NBSP removed,
/// dots and other punctuation kept.
pub fn clean_display(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '.' | '-' | '_' | '/')
}

fn without_footnote(compact: &str) -> &str {
    let trimmed = compact.trim_end_matches(|c: char| c == '*' || c.is_alphabetic());
    if trimmed.ends_with(|c: char| c.is_ascii_digit()) {
        trimmed
    } else {
        compact
    }
}
