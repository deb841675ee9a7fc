//! Rule-set assembly.
//!
//! The skeleton holds five placeholder tokens. The namespace slot is filled with declarations
//! taken straight from the descriptor; the other four each take exactly one fragment of the
//! matching category. The composed text is scanned for leftover tokens before it is handed
//! on.

use super::{escape_markup, headers, helpers, sections, styles, FragmentCategory, RuleFragment};
use crate::constants::{
    PLACEHOLDER_HEADERS, PLACEHOLDER_HELPERS, PLACEHOLDER_NAMESPACES, PLACEHOLDER_SECTIONS,
    PLACEHOLDER_STYLES,
};
use crate::metadata::MetadataDescriptor;
use crate::{AssemblyError, AssemblyResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// Any placeholder token, with optional inner whitespace.
static PLACEHOLDER_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*[A-Za-z_][A-Za-z0-9_]*\s*\}\}")
        .unwrap_or_else(|e| panic!("placeholder pattern is invalid: {e}"))
});

/// Base rule document. The root rule renders the document wrapper; the clinical document
/// rule renders the title, the four header blocks and the body.
pub const SKELETON: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform" {{namespaces}}>
<xsl:output method="html" encoding="UTF-8" indent="no"/>
<xsl:variable name="lc" select="'abcdefghijklmnopqrstuvwxyz'"/>
<xsl:variable name="uc" select="'ABCDEFGHIJKLMNOPQRSTUVWXYZ'"/>
<xsl:template match="/">
<div class="cda-document">
<xsl:call-template name="document-styles"/>
<xsl:apply-templates select="n1:ClinicalDocument"/>
</div>
</xsl:template>
<xsl:template match="n1:ClinicalDocument">
<h1 class="document-title">
<xsl:choose>
<xsl:when test="normalize-space(n1:title) != ''"><xsl:value-of select="normalize-space(n1:title)"/></xsl:when>
<xsl:otherwise><xsl:value-of select="n1:code/@displayName"/></xsl:otherwise>
</xsl:choose>
</h1>
<xsl:call-template name="patient-header"/>
<xsl:call-template name="encounter-header"/>
<xsl:call-template name="author-header"/>
<xsl:call-template name="document-header"/>
<xsl:apply-templates select="n1:component/n1:structuredBody | n1:component/n1:nonXMLBody"/>
</xsl:template>
<xsl:template match="n1:structuredBody">
<div class="document-body">
<xsl:apply-templates select="n1:component/n1:section"><xsl:with-param name="level" select="2"/></xsl:apply-templates>
</div>
</xsl:template>
{{styles}}
{{helpers}}
{{headers}}
{{sections}}
</xsl:stylesheet>
"#;

/// Slots filled by fragments, in builder order.
const FRAGMENT_SLOTS: [(&str, FragmentCategory); 4] = [
    (PLACEHOLDER_STYLES, FragmentCategory::Styles),
    (PLACEHOLDER_HELPERS, FragmentCategory::Helpers),
    (PLACEHOLDER_HEADERS, FragmentCategory::Headers),
    (PLACEHOLDER_SECTIONS, FragmentCategory::Sections),
];

/// A fully assembled rule document with no placeholder tokens left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet(String);

impl RuleSet {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Namespace declarations for the rule-set root, one per descriptor entry.
pub fn namespace_declarations(descriptor: &MetadataDescriptor) -> String {
    descriptor
        .namespaces
        .iter()
        .map(|(prefix, uri)| format!("xmlns:{prefix}=\"{}\"", escape_markup(uri.trim())))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fills `skeleton` with namespace declarations and the four fragments.
///
/// # Arguments
///
/// * `skeleton` - Rule document text carrying the five placeholder tokens.
/// * `namespaces` - Declarations for the namespace slot.
/// * `fragments` - Styles, helpers, headers and sections fragments, in that order.
///
/// # Errors
///
/// - [`AssemblyError::CategoryMismatch`] if a fragment is offered to the wrong slot.
/// - [`AssemblyError::UnresolvedPlaceholders`] if any placeholder token is left afterwards.
pub fn compose(
    skeleton: &str,
    namespaces: &str,
    fragments: [&RuleFragment; 4],
) -> AssemblyResult<RuleSet> {
    for ((_, slot), fragment) in FRAGMENT_SLOTS.iter().zip(fragments.iter()) {
        if fragment.category() != *slot {
            return Err(AssemblyError::CategoryMismatch {
                slot: *slot,
                found: fragment.category(),
            });
        }
    }

    // Fragment markup is never scanned for tokens to substitute, so one slot's content cannot
    // fill another slot.
    let mut text = String::with_capacity(
        skeleton.len() + fragments.iter().map(|f| f.markup().len()).sum::<usize>(),
    );
    let mut rest = skeleton;
    while let Some(found) = PLACEHOLDER_TOKEN.find(rest) {
        text.push_str(&rest[..found.start()]);
        let name = found.as_str()[2..found.as_str().len() - 2].trim();
        if name == PLACEHOLDER_NAMESPACES {
            text.push_str(namespaces);
        } else if let Some(index) = FRAGMENT_SLOTS.iter().position(|(slot, _)| *slot == name) {
            text.push_str(fragments[index].markup());
        } else {
            text.push_str(found.as_str());
        }
        rest = &rest[found.end()..];
    }
    text.push_str(rest);

    let unresolved: Vec<String> = PLACEHOLDER_TOKEN
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect();
    if !unresolved.is_empty() {
        return Err(AssemblyError::UnresolvedPlaceholders(unresolved));
    }

    Ok(RuleSet(text))
}

/// Builds every fragment from `descriptor` and composes the complete rule set.
///
/// # Errors
///
/// Returns [`AssemblyError`] if composition leaves the rule set incomplete. With the built-in
/// skeleton and builders this indicates a defect in the builders, not in the descriptor.
pub fn assemble(descriptor: &MetadataDescriptor) -> AssemblyResult<RuleSet> {
    let styles = styles::build();
    let helpers = helpers::build();
    let headers = headers::build(descriptor);
    let sections = sections::build(descriptor);

    compose(
        SKELETON,
        &namespace_declarations(descriptor),
        [&styles, &helpers, &headers, &sections],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> MetadataDescriptor {
        serde_json::from_value(json!({
            "namespaces": {
                "n1": "urn:hl7-org:v3",
                "xsi": "http://www.w3.org/2001/XMLSchema-instance"
            },
            "templateIdentifiers": {"documentTemplate": "2.16.840.1.113883.10.20.22.1.1"},
            "sectionCodes": {"followUp": "18776-5", "reasons": "10154-3", "diagnoses": "11450-4"},
            "codeSystems": {"loinc": "2.16.840.1.113883.6.1", "snomed": "2.16.840.1.113883.6.96"},
            "labels": {"patientName": "{{sections}}"}
        }))
        .unwrap()
    }

    fn fragments() -> [RuleFragment; 4] {
        [
            RuleFragment::new(FragmentCategory::Styles, "<!-- styles -->"),
            RuleFragment::new(FragmentCategory::Helpers, "<!-- helpers -->"),
            RuleFragment::new(FragmentCategory::Headers, "<!-- headers -->"),
            RuleFragment::new(FragmentCategory::Sections, "<!-- sections -->"),
        ]
    }

    #[test]
    fn test_assemble_leaves_no_placeholders() {
        let rule_set = assemble(&descriptor()).unwrap();
        assert!(!PLACEHOLDER_TOKEN.is_match(rule_set.as_str()));
        assert!(rule_set
            .as_str()
            .contains("xmlns:n1=\"urn:hl7-org:v3\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\""));
    }

    #[test]
    fn test_assemble_keeps_builder_order() {
        let rule_set = assemble(&descriptor()).unwrap();
        let text = rule_set.as_str();
        let styles = text.find("name=\"document-styles\"").unwrap();
        let helpers = text.find("name=\"format-name\"").unwrap();
        let headers = text.find("name=\"patient-header\"").unwrap();
        let sections = text.find("section-reasons").unwrap();
        assert!(styles < helpers && helpers < headers && headers < sections);
        assert!(text.find("section-reasons") < text.find("section-diagnoses"));
        assert!(text.find("section-diagnoses") < text.find("section-follow-up"));
    }

    #[test]
    fn test_compose_reports_unknown_placeholders() {
        let [a, b, c, d] = fragments();
        let skeleton = "<r {{namespaces}}>{{styles}}{{helpers}}{{headers}}{{sections}}{{ footer }}</r>";
        let err = compose(skeleton, "", [&a, &b, &c, &d]).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::UnresolvedPlaceholders(vec!["{{ footer }}".into()])
        );
    }

    #[test]
    fn test_compose_rejects_fragment_in_wrong_slot() {
        let [a, b, c, d] = fragments();
        let err = compose(SKELETON, "", [&b, &a, &c, &d]).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::CategoryMismatch {
                slot: FragmentCategory::Styles,
                found: FragmentCategory::Helpers
            }
        );
    }

    #[test]
    fn test_compose_does_not_substitute_inside_fragments() {
        let [a, _, c, d] = fragments();
        let sneaky = RuleFragment::new(FragmentCategory::Helpers, "{{sections}}");
        let err = compose(SKELETON, "", [&a, &sneaky, &c, &d]).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::UnresolvedPlaceholders(vec!["{{sections}}".into()])
        );
    }

    #[test]
    fn test_label_text_cannot_inject_placeholders() {
        let rule_set = assemble(&descriptor()).unwrap();
        assert!(rule_set.as_str().contains("&#123;&#123;sections&#125;&#125;"));
    }
}
