//! # CDR Core
//!
//! Core rendering logic for clinical document reports.
//!
//! This crate turns a clinical document plus a metadata descriptor into HTML:
//! - validation of the render request and its metadata descriptor
//! - rule fragment builders (styles, helpers, headers, sections) and rule-set assembly
//! - a rule engine that applies the assembled rule set to the parsed document
//! - the pipeline that runs those stages in order and tags failures by stage
//!
//! **No I/O concerns**: reading files, environment variables and deadlines belong in the
//! `cdr` CLI and the batch runner. Markup parsing and serialisation live in `cda`.

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod rules;
pub mod validation;

pub use config::{
    max_template_depth_from_env_value, render_timeout_from_env_value, RenderConfig,
};
pub use error::{
    AssemblyError, AssemblyResult, ConfigError, ConfigResult, MetadataLoadError, PipelineError,
    PipelineResult, Stage, TransformError, TransformResult, ValidationError, ValidationResult,
    INPUT_DEFECT_MESSAGE, INTERNAL_FAILURE_MESSAGE,
};
pub use metadata::{
    metadata_value_from_str, Label, MetadataDescriptor, MetadataFormat, ObservationKind,
    RenderRequest, SectionKind,
};
pub use pipeline::{RenderPipeline, TransformationResult};
pub use rules::{assemble, FragmentCategory, RuleFragment, RuleSet};
pub use validation::{validate, validated_descriptor};
