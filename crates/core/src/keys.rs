use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum allowed length for a [`TypeTag`].
const TYPE_TAG_MAX_LEN: usize = 64;

/// Errors from constructing a [`TypeTag`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeTagError {
    /// The input was empty or contained only whitespace.
    #[error("type tag cannot be empty or whitespace")]
    Empty,
    /// The normalized tag contains characters outside `a-z`, `0-9`, `_` and `.`.
    #[error("type tag contains invalid characters (only a-z, 0-9, _ and . allowed)")]
    InvalidCharacters,
    /// A `.`-separated segment is empty, as in `csv..read`.
    #[error("type tag contains an empty segment")]
    EmptySegment,
    /// The normalized tag exceeds [`TYPE_TAG_MAX_LEN`] characters.
    #[error("type tag exceeds maximum length of {TYPE_TAG_MAX_LEN} characters")]
    TooLong,
}

/// A normalized key naming the plugin a node runs.
///
/// Normalization rules:
/// - Leading/trailing whitespace is trimmed.
/// - The string is lowercased.
/// - Whitespace and hyphens are replaced with underscores.
/// - Consecutive underscores are collapsed to one.
/// - Underscores next to a `.` separator or at either end are stripped.
///
/// After normalization the tag must be non-empty, contain only `a-z`, `0-9`,
/// `_` and `.`, have no empty `.` segment, and be at most 64 characters long.
///
/// # Examples
///
/// ```
/// use strata_core::TypeTag;
///
/// let tag: TypeTag = "CSV Read".parse().unwrap();
/// assert_eq!(tag.as_str(), "csv_read");
///
/// let tag: TypeTag = " Table.Filter--Rows ".parse().unwrap();
/// assert_eq!(tag.as_str(), "table.filter_rows");
/// ```
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeTag(String);

impl TypeTag {
    /// Create a new `TypeTag`, normalizing and validating the input.
    pub fn new(raw: &str) -> Result<Self, TypeTagError> {
        let normalized: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_whitespace() || c == '-' {
                    '_'
                } else {
                    c
                }
            })
            .collect();

        if normalized.trim_matches('_').is_empty() {
            return Err(TypeTagError::Empty);
        }

        let mut segments = Vec::new();
        for segment in normalized.split('.') {
            let collapsed = collapse_underscores(segment);
            if collapsed.is_empty() {
                return Err(TypeTagError::EmptySegment);
            }
            if !collapsed
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
            {
                return Err(TypeTagError::InvalidCharacters);
            }
            segments.push(collapsed);
        }

        let tag = segments.join(".");
        if tag.len() > TYPE_TAG_MAX_LEN {
            return Err(TypeTagError::TooLong);
        }
        Ok(Self(tag))
    }

    /// Return the inner string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Collapse runs of underscores and trim leading/trailing underscores.
fn collapse_underscores(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_underscore = true;
    for c in s.chars() {
        if c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }
    if out.ends_with('_') {
        out.pop();
    }
    out
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TypeTag {
    type Err = TypeTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for TypeTag {
    type Error = TypeTagError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for TypeTag {
    type Error = TypeTagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        tag.0
    }
}

impl AsRef<str> for TypeTag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("passthrough", "passthrough")]
    #[case("  CSV Read ", "csv_read")]
    #[case("table.filter-rows", "table.filter_rows")]
    #[case("a__b", "a_b")]
    #[case("_lead.trail_", "lead.trail")]
    #[case("v2.join", "v2.join")]
    fn normalizes(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(TypeTag::new(raw).unwrap().as_str(), expected);
    }

    #[rstest]
    #[case("", TypeTagError::Empty)]
    #[case("   ", TypeTagError::Empty)]
    #[case("---", TypeTagError::Empty)]
    #[case("csv..read", TypeTagError::EmptySegment)]
    #[case(".csv", TypeTagError::EmptySegment)]
    #[case("csv/read", TypeTagError::InvalidCharacters)]
    fn rejects(#[case] raw: &str, #[case] expected: TypeTagError) {
        assert_eq!(TypeTag::new(raw).unwrap_err(), expected);
    }

    #[test]
    fn rejects_too_long() {
        let raw = "a".repeat(TYPE_TAG_MAX_LEN + 1);
        assert_eq!(TypeTag::new(&raw).unwrap_err(), TypeTagError::TooLong);
    }

    #[test]
    fn serde_normalizes_on_deserialize() {
        let tag: TypeTag = serde_json::from_str("\"Const Value\"").unwrap();
        assert_eq!(tag.as_str(), "const_value");
        assert_eq!(serde_json::to_string(&tag).unwrap(), "\"const_value\"");
    }

    #[test]
    fn serde_rejects_invalid() {
        assert!(serde_json::from_str::<TypeTag>("\"bad/tag\"").is_err());
    }
}
