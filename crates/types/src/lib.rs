//! Shared primitive types for the clinical document renderer.
//!
//! These types are used by both the `cda` boundary crate and `cdr-core`, so they live in a
//! crate with no knowledge of XML or rule sets.

use std::fmt;
use std::str::FromStr;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("text cannot be empty")]
    Empty,
}

/// A string type that guarantees non-empty content.
///
/// Used for label overrides, where a whitespace-only value must be treated the same as a
/// missing one. The input is trimmed during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Arguments
    ///
    /// * `input` - Any type that can be converted to a string reference
    ///
    /// # Errors
    ///
    /// Returns `TextError::Empty` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper and returns the owned string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for NonEmptyText {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Which artifact a parsed tree came from.
///
/// The pipeline parses exactly two documents per invocation; diagnostics carry the origin so a
/// caller can tell a defective clinical payload apart from a defective rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOrigin {
    /// The clinical document supplied by the caller.
    SourceDocument,
    /// The rule set assembled from the metadata descriptor.
    RuleSet,
}

impl DocumentOrigin {
    /// Human-readable name used in error messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentOrigin::SourceDocument => "source document",
            DocumentOrigin::RuleSet => "rule set",
        }
    }
}

impl fmt::Display for DocumentOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_text_trims_input() {
        let text = NonEmptyText::new("  Paciente  ").unwrap();
        assert_eq!(text.as_str(), "Paciente");
    }

    #[test]
    fn test_non_empty_text_rejects_whitespace() {
        assert_eq!(NonEmptyText::new(" \n\t ").unwrap_err(), TextError::Empty);
        assert!("".parse::<NonEmptyText>().is_err());
    }

    #[test]
    fn test_document_origin_display() {
        assert_eq!(DocumentOrigin::SourceDocument.to_string(), "source document");
        assert_eq!(DocumentOrigin::RuleSet.to_string(), "rule set");
        assert_eq!(
            serde_json::to_string(&DocumentOrigin::RuleSet).unwrap(),
            "\"rule_set\""
        );
    }
}
