//! Error taxonomy for the rendering pipeline.
//!
//! Every stage fails fast with its own error type; [`PipelineError`] wraps them so callers
//! can handle failures uniformly and still tell input defects from internal defects.

use crate::rules::FragmentCategory;
use cda::{ParseError, SerializeError};
use cdr_types::DocumentOrigin;
use std::fmt;

/// Startup configuration that cannot be used.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },
    #[error("{name} is not a valid number: {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Metadata or payload defects found before any rule is built.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("render request is missing")]
    MissingRequest,
    #[error("source document payload is missing or empty")]
    EmptyDocument,
    #[error("metadata descriptor is missing")]
    MissingMetadata,
    #[error("metadata descriptor must be an object, found {0}")]
    MetadataNotObject(&'static str),
    #[error("metadata is missing `namespaces`")]
    MissingNamespaces,
    #[error("metadata is missing `templateIdentifiers`")]
    MissingTemplateIdentifiers,
    #[error("metadata is missing `codeSystems`")]
    MissingCodeSystems,

    #[error("invalid metadata at `{path}`: {message}")]
    InvalidMetadata { path: String, message: String },
    #[error("namespace prefix `{0}` is not usable in a rule set")]
    InvalidNamespacePrefix(String),
    #[error("namespace `{0}` has an empty URI")]
    EmptyNamespace(String),
    #[error("metadata does not bind the required namespace prefix `{0}`")]
    MissingNamespace(String),
    #[error("metadata is missing `templateIdentifiers.documentTemplate`")]
    MissingDocumentTemplate,
    #[error("metadata declares {found} code systems, at least {required} are required")]
    InsufficientCodeSystems { found: usize, required: usize },
}

pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Metadata text that could not be read into a JSON value.
#[derive(Debug, thiserror::Error)]
pub enum MetadataLoadError {
    #[error("failed to read metadata as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read metadata as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Rule-set composition defects. These are bugs in the builders, never caller input defects.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("rule set has unresolved placeholders: {}", .0.join(", "))]
    UnresolvedPlaceholders(Vec<String>),
    #[error("`{slot}` slot was given a `{found}` fragment")]
    CategoryMismatch {
        slot: FragmentCategory,
        found: FragmentCategory,
    },
}

pub type AssemblyResult<T> = std::result::Result<T, AssemblyError>;

/// Failures while importing or executing the rule set.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("failed to import rule set: {0}")]
    StylesheetImportFailed(String),
    #[error("transformation failed: {cause}")]
    TransformFailed { cause: String },
    #[error("transformation produced an empty result")]
    EmptyResult,
    #[error("transformation result is not rooted at a single element")]
    NoRootElement,
}

impl TransformError {
    pub(crate) fn import(message: impl Into<String>) -> Self {
        TransformError::StylesheetImportFailed(message.into())
    }

    pub(crate) fn failed(cause: impl Into<String>) -> Self {
        TransformError::TransformFailed {
            cause: cause.into(),
        }
    }
}

pub type TransformResult<T> = std::result::Result<T, TransformError>;

/// The pipeline stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validate,
    Assemble,
    ParseRuleSet,
    ParseDocument,
    Transform,
    Serialize,
    Cancelled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Assemble => "assemble",
            Stage::ParseRuleSet => "parse-rule-set",
            Stage::ParseDocument => "parse-document",
            Stage::Transform => "transform",
            Stage::Serialize => "serialize",
            Stage::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advice shown to end users when their input is at fault.
pub const INPUT_DEFECT_MESSAGE: &str =
    "No se pudo mostrar este documento. Revise el documento y la especialidad seleccionados.";

/// Advice shown to end users when the renderer itself failed.
pub const INTERNAL_FAILURE_MESSAGE: &str =
    "No se pudo mostrar este documento. Inténtelo de nuevo o contacte con soporte.";

/// Any failure of one rendering invocation, tagged by stage.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("rule set assembly failed: {0}")]
    Assembly(#[from] AssemblyError),
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Transform(#[from] TransformError),
    #[error("serialisation failed: {0}")]
    Serialize(#[from] SerializeError),
    #[error("rendering was cancelled before completion")]
    Cancelled,
}

impl PipelineError {
    /// The stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Validation(_) => Stage::Validate,
            PipelineError::Assembly(_) => Stage::Assemble,
            PipelineError::Parse(e) => match e.origin {
                DocumentOrigin::SourceDocument => Stage::ParseDocument,
                DocumentOrigin::RuleSet => Stage::ParseRuleSet,
            },
            PipelineError::Transform(_) => Stage::Transform,
            PipelineError::Serialize(_) => Stage::Serialize,
            PipelineError::Cancelled => Stage::Cancelled,
        }
    }

    /// Returns `true` when the caller's input caused the failure.
    ///
    /// Validation failures and unparseable source documents are input defects; everything
    /// else (rule-set defects, engine failures, cancellation) is internal.
    pub fn is_input_defect(&self) -> bool {
        matches!(self.stage(), Stage::Validate | Stage::ParseDocument)
    }

    /// The message to show an end user for this failure.
    pub fn user_message(&self) -> &'static str {
        if self.is_input_defect() {
            INPUT_DEFECT_MESSAGE
        } else {
            INTERNAL_FAILURE_MESSAGE
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_for_parse_errors_follows_origin() {
        let source = PipelineError::Parse(ParseError {
            origin: DocumentOrigin::SourceDocument,
            message: "unexpected end of stream".into(),
            position: None,
        });
        let rules = PipelineError::Parse(ParseError {
            origin: DocumentOrigin::RuleSet,
            message: "unexpected end of stream".into(),
            position: None,
        });
        assert_eq!(source.stage(), Stage::ParseDocument);
        assert_eq!(rules.stage(), Stage::ParseRuleSet);
        assert!(source.is_input_defect());
        assert!(!rules.is_input_defect());
    }

    #[test]
    fn test_user_message_distinguishes_input_and_internal_failures() {
        let input = PipelineError::from(ValidationError::MissingNamespaces);
        let internal = PipelineError::from(AssemblyError::UnresolvedPlaceholders(vec![
            "{{styles}}".into(),
        ]));
        assert_eq!(input.user_message(), INPUT_DEFECT_MESSAGE);
        assert_eq!(internal.user_message(), INTERNAL_FAILURE_MESSAGE);
        assert_eq!(PipelineError::Cancelled.stage(), Stage::Cancelled);
        assert!(!PipelineError::Cancelled.is_input_defect());
    }

    #[test]
    fn test_unresolved_placeholders_message_lists_tokens() {
        let err = AssemblyError::UnresolvedPlaceholders(vec!["{{a}}".into(), "{{b}}".into()]);
        assert_eq!(
            err.to_string(),
            "rule set has unresolved placeholders: {{a}}, {{b}}"
        );
    }
}
