//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the pipeline.
//! Library code never reads process-wide environment variables; binaries read them and hand
//! the raw values to the `*_from_env_value` parsers below.

use crate::constants::{DEFAULT_MAX_TEMPLATE_DEPTH, DEFAULT_RENDER_TIMEOUT_MS};
use crate::{ConfigError, ConfigResult};
use std::time::Duration;

/// Rendering configuration resolved at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderConfig {
    max_template_depth: usize,
    strip_processing_instructions: bool,
}

impl RenderConfig {
    /// Create a new `RenderConfig`.
    ///
    /// # Arguments
    ///
    /// * `max_template_depth` - Deepest allowed nesting of template application. Guards
    ///   recursive section rendering against runaway input.
    /// * `strip_processing_instructions` - Whether stray processing instructions are removed
    ///   from source payloads before parsing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotPositive`] if `max_template_depth` is zero.
    pub fn new(
        max_template_depth: usize,
        strip_processing_instructions: bool,
    ) -> ConfigResult<Self> {
        if max_template_depth == 0 {
            return Err(ConfigError::NotPositive {
                name: "max_template_depth",
            });
        }

        Ok(Self {
            max_template_depth,
            strip_processing_instructions,
        })
    }

    pub fn max_template_depth(&self) -> usize {
        self.max_template_depth
    }

    pub fn strip_processing_instructions(&self) -> bool {
        self.strip_processing_instructions
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_template_depth: DEFAULT_MAX_TEMPLATE_DEPTH,
            strip_processing_instructions: true,
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn positive_number(name: &'static str, value: &str) -> ConfigResult<u64> {
    let parsed = value
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidNumber {
            name,
            value: value.to_string(),
        })?;
    if parsed == 0 {
        return Err(ConfigError::NotPositive { name });
    }
    Ok(parsed)
}

/// Parse the template depth guard from an optional environment value.
///
/// Missing or blank values fall back to [`DEFAULT_MAX_TEMPLATE_DEPTH`].
///
/// # Errors
///
/// Returns [`ConfigError`] if the value is not a positive integer.
pub fn max_template_depth_from_env_value(value: Option<String>) -> ConfigResult<usize> {
    match trimmed(value) {
        Some(v) => {
            let depth = positive_number("max_template_depth", &v)?;
            usize::try_from(depth).map_err(|_| ConfigError::InvalidNumber {
                name: "max_template_depth",
                value: v,
            })
        }
        None => Ok(DEFAULT_MAX_TEMPLATE_DEPTH),
    }
}

/// Parse the per-document render deadline (milliseconds) from an optional environment value.
///
/// Missing or blank values fall back to [`DEFAULT_RENDER_TIMEOUT_MS`].
///
/// # Errors
///
/// Returns [`ConfigError`] if the value is not a positive integer.
pub fn render_timeout_from_env_value(value: Option<String>) -> ConfigResult<Duration> {
    let millis = match trimmed(value) {
        Some(v) => positive_number("render_timeout_ms", &v)?,
        None => DEFAULT_RENDER_TIMEOUT_MS,
    };
    Ok(Duration::from_millis(millis))
}
