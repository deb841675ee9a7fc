//! Rule fragment builders and rule-set assembly.
//!
//! Each builder is a pure function that returns one typed [`RuleFragment`]. The assembler
//! slots the fragments into a fixed skeleton and refuses to hand over a rule set that still
//! carries placeholder tokens.
//!
//! Any metadata value that ends up inside rule markup goes through [`escape_markup`] (and,
//! inside expressions, [`xpath_literal`]) so descriptor content can never open new markup or
//! new placeholders.

pub mod assembler;
pub mod headers;
pub mod helpers;
pub mod sections;
pub mod styles;

pub use assembler::{assemble, compose, namespace_declarations, RuleSet};

use std::borrow::Cow;
use std::fmt;

/// The rule-set slot a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentCategory {
    Styles,
    Helpers,
    Headers,
    Sections,
}

impl FragmentCategory {
    /// Builder order; later fragments may reference templates defined by earlier ones.
    pub const ORDER: [FragmentCategory; 4] = [
        FragmentCategory::Styles,
        FragmentCategory::Helpers,
        FragmentCategory::Headers,
        FragmentCategory::Sections,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentCategory::Styles => "styles",
            FragmentCategory::Helpers => "helpers",
            FragmentCategory::Headers => "headers",
            FragmentCategory::Sections => "sections",
        }
    }
}

impl fmt::Display for FragmentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable piece of rule markup, tagged with its category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFragment {
    category: FragmentCategory,
    markup: String,
}

impl RuleFragment {
    pub fn new(category: FragmentCategory, markup: impl Into<String>) -> Self {
        Self {
            category,
            markup: markup.into(),
        }
    }

    pub fn category(&self) -> FragmentCategory {
        self.category
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }
}

/// Escapes text for use in rule markup, both as element content and attribute value.
///
/// Braces are written as character references so escaped text can never form a placeholder
/// token in the assembled rule set.
pub fn escape_markup(text: &str) -> String {
    let escaped = quick_xml::escape::escape(text);
    if !escaped.contains(['{', '}']) {
        return escaped.into_owned();
    }
    escaped.replace('{', "&#123;").replace('}', "&#125;")
}

/// Quotes a value as a rule-expression string literal.
///
/// Expression literals cannot escape quotes, so a value holding both quote kinds is split
/// into a `concat(...)` call.
pub fn xpath_literal(value: &str) -> Cow<'static, str> {
    if !value.contains('\'') {
        return Cow::Owned(format!("'{value}'"));
    }
    if !value.contains('"') {
        return Cow::Owned(format!("\"{value}\""));
    }

    let parts: Vec<String> = value
        .split('\'')
        .map(|part| format!("'{part}'"))
        .collect();
    Cow::Owned(format!("concat({})", parts.join(", \"'\", ")))
}

/// Writes `<xsl:call-template>` markup with `select`-valued parameters.
pub(crate) fn call_template(name: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return format!("<xsl:call-template name=\"{name}\"/>");
    }
    let mut out = format!("<xsl:call-template name=\"{name}\">");
    for (param, select) in params {
        out.push_str(&format!(
            "<xsl:with-param name=\"{param}\" select=\"{}\"/>",
            escape_markup(select)
        ));
    }
    out.push_str("</xsl:call-template>");
    out
}
