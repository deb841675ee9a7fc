//! Section rules.
//!
//! Always emits the generic section fallback, the narrative block rules, the non-structured
//! body rule and a code-system lookup. Then one specialised rule per configured section in
//! the fixed order reasons, diagnoses, follow-up. Observation rows are emitted only for
//! observation codes present in the descriptor.

use super::{call_template, escape_markup, xpath_literal, FragmentCategory, RuleFragment};
use crate::metadata::{Label, MetadataDescriptor, ObservationKind, SectionKind};

const GENERIC_SECTION: &str = r#"<xsl:template match="n1:section">
<xsl:param name="level" select="2"/>
<section class="cda-section">
<xsl:call-template name="section-title"><xsl:with-param name="level" select="$level"/></xsl:call-template>
<xsl:apply-templates select="n1:text"/>
<xsl:apply-templates select="n1:component/n1:section"><xsl:with-param name="level" select="$level + 1"/></xsl:apply-templates>
</section>
</xsl:template>
"#;

const SECTION_TITLE: &str = r#"<xsl:template name="section-title">
<xsl:param name="level" select="2"/>
<xsl:param name="fallback" select="''"/>
<xsl:variable name="title">
<xsl:choose>
<xsl:when test="normalize-space(n1:title) != ''"><xsl:value-of select="normalize-space(n1:title)"/></xsl:when>
<xsl:when test="normalize-space(n1:code/@displayName) != ''"><xsl:value-of select="n1:code/@displayName"/></xsl:when>
<xsl:otherwise><xsl:value-of select="$fallback"/></xsl:otherwise>
</xsl:choose>
</xsl:variable>
<xsl:if test="$title != ''">
<xsl:choose>
<xsl:when test="$level &lt;= 2"><h2><xsl:value-of select="$title"/></h2></xsl:when>
<xsl:when test="$level = 3"><h3><xsl:value-of select="$title"/></h3></xsl:when>
<xsl:when test="$level = 4"><h4><xsl:value-of select="$title"/></h4></xsl:when>
<xsl:when test="$level = 5"><h5><xsl:value-of select="$title"/></h5></xsl:when>
<xsl:otherwise><h6><xsl:value-of select="$title"/></h6></xsl:otherwise>
</xsl:choose>
</xsl:if>
</xsl:template>
"#;

const NARRATIVE: &str = r#"<xsl:template match="n1:section/n1:text">
<div class="narrative"><xsl:apply-templates/></div>
</xsl:template>
<xsl:template match="n1:paragraph"><p><xsl:apply-templates/></p></xsl:template>
<xsl:template match="n1:list">
<xsl:choose>
<xsl:when test="@listType = 'ordered'"><ol><xsl:apply-templates select="n1:item"/></ol></xsl:when>
<xsl:otherwise><ul><xsl:apply-templates select="n1:item"/></ul></xsl:otherwise>
</xsl:choose>
</xsl:template>
<xsl:template match="n1:item"><li><xsl:apply-templates/></li></xsl:template>
<xsl:template match="n1:table"><table class="narrative-table"><xsl:apply-templates/></table></xsl:template>
<xsl:template match="n1:thead"><thead><xsl:apply-templates/></thead></xsl:template>
<xsl:template match="n1:tbody"><tbody><xsl:apply-templates/></tbody></xsl:template>
<xsl:template match="n1:tr"><tr><xsl:apply-templates/></tr></xsl:template>
<xsl:template match="n1:th"><th><xsl:apply-templates/></th></xsl:template>
<xsl:template match="n1:td"><td><xsl:apply-templates/></td></xsl:template>
<xsl:template match="n1:content"><span><xsl:apply-templates/></span></xsl:template>
<xsl:template match="n1:br"><br/></xsl:template>
<xsl:template match="n1:caption"><b><xsl:apply-templates/></b></xsl:template>
<xsl:template match="n1:sub"><sub><xsl:apply-templates/></sub></xsl:template>
<xsl:template match="n1:sup"><sup><xsl:apply-templates/></sup></xsl:template>
"#;

const NON_XML_BODY: &str = r#"<xsl:template match="n1:nonXMLBody">
<div class="document-body non-structured">
<xsl:choose>
<xsl:when test="n1:text/n1:reference/@value"><xsl:call-template name="render-external-reference"><xsl:with-param name="reference" select="n1:text/n1:reference/@value"/></xsl:call-template></xsl:when>
<xsl:otherwise><pre><xsl:value-of select="n1:text"/></pre></xsl:otherwise>
</xsl:choose>
</div>
</xsl:template>
"#;

/// `code-system-name`: the descriptor's name for a code system OID, else the OID itself.
fn code_system_name(descriptor: &MetadataDescriptor) -> String {
    let mut out =
        String::from("<xsl:template name=\"code-system-name\">\n<xsl:param name=\"oid\"/>\n<xsl:choose>\n");
    for (name, oid) in &descriptor.code_systems {
        if oid.trim().is_empty() {
            continue;
        }
        out.push_str(&format!(
            "<xsl:when test=\"{}\">{}</xsl:when>\n",
            escape_markup(&format!("$oid = {}", xpath_literal(oid.trim()))),
            escape_markup(&name.to_uppercase())
        ));
    }
    out.push_str(
        "<xsl:otherwise><xsl:value-of select=\"$oid\"/></xsl:otherwise>\n</xsl:choose>\n</xsl:template>\n",
    );
    out
}

/// Predicate matching a node whose `code/@code` equals `code`.
fn has_code(code: &str) -> String {
    format!("n1:code/@code = {}", xpath_literal(code))
}

/// Match pattern for a specialised section: by section code, or by section template.
fn section_pattern(descriptor: &MetadataDescriptor, kind: SectionKind, code: &str) -> String {
    match descriptor.section_template(kind) {
        Some(template) => format!(
            "n1:section[{} or n1:templateId/@root = {}]",
            has_code(code),
            xpath_literal(template)
        ),
        None => format!("n1:section[{}]", has_code(code)),
    }
}

fn row(descriptor: &MetadataDescriptor, label: Label, value: &str) -> String {
    format!(
        "<tr><th>{}</th><td>{value}</td></tr>\n",
        escape_markup(&descriptor.label(label))
    )
}

fn coded_value(select: &str) -> String {
    format!(
        "{}<xsl:if test=\"{select}/@code and {select}/@codeSystem\"><span class=\"code-ref\"><xsl:text> (</xsl:text>{}<xsl:text>: </xsl:text><xsl:value-of select=\"{select}/@code\"/><xsl:text>)</xsl:text></span></xsl:if>",
        call_template("format-code", &[("code", select)]),
        call_template("code-system-name", &[("oid", &format!("{select}/@codeSystem"))]),
    )
}

/// Wraps section-specific content in the shared section frame.
fn section_rule(
    descriptor: &MetadataDescriptor,
    kind: SectionKind,
    code: &str,
    content: &str,
) -> String {
    format!(
        "<xsl:template match=\"{pattern}\">\n\
         <xsl:param name=\"level\" select=\"2\"/>\n\
         <section class=\"cda-section {class}\">\n\
         <xsl:call-template name=\"section-title\"><xsl:with-param name=\"level\" select=\"$level\"/><xsl:with-param name=\"fallback\" select=\"{fallback}\"/></xsl:call-template>\n\
         <xsl:apply-templates select=\"n1:text\"/>\n\
         {content}\
         <xsl:apply-templates select=\"n1:component/n1:section\"><xsl:with-param name=\"level\" select=\"$level + 1\"/></xsl:apply-templates>\n\
         </section>\n\
         </xsl:template>\n",
        pattern = escape_markup(&section_pattern(descriptor, kind, code)),
        class = kind.css_class(),
        fallback = escape_markup(&xpath_literal(kind.default_title())),
    )
}

fn reasons_content(descriptor: &MetadataDescriptor) -> String {
    let Some(code) = descriptor.observation_code(ObservationKind::Reason) else {
        return String::new();
    };
    let select = escape_markup(&format!("n1:entry/n1:observation[{}]", has_code(code)));
    format!(
        "<xsl:if test=\"{select}\"><table class=\"observation-table\">\n\
         <xsl:for-each select=\"{select}\">\n{}</xsl:for-each>\n</table></xsl:if>\n",
        row(descriptor, Label::Reason, &coded_value("n1:value"))
    )
}

fn diagnoses_content(descriptor: &MetadataDescriptor) -> String {
    let select = match descriptor.observation_code(ObservationKind::Diagnosis) {
        Some(code) => format!("n1:entry//n1:observation[{}]", has_code(code)),
        None => "n1:entry/n1:observation | n1:entry/n1:act/n1:entryRelationship/n1:observation"
            .to_string(),
    };

    let description = format!(
        "<xsl:choose><xsl:when test=\"n1:value\">{}</xsl:when><xsl:otherwise><xsl:value-of select=\"normalize-space(n1:text)\"/></xsl:otherwise></xsl:choose>",
        coded_value("n1:value")
    );
    let mut rows = row(descriptor, Label::Diagnosis, &description);
    rows.push_str(&format!(
        "<xsl:if test=\"n1:effectiveTime/n1:low/@value\">{}</xsl:if>\n",
        row(
            descriptor,
            Label::OnsetDate,
            &call_template("format-date-time", &[("value", "n1:effectiveTime/n1:low/@value")]),
        )
    ));

    for (kind, label) in [
        (ObservationKind::ProblemStatus, Label::ProblemStatus),
        (ObservationKind::CertaintyLevel, Label::CertaintyLevel),
    ] {
        let Some(code) = descriptor.observation_code(kind) else {
            continue;
        };
        let related = format!("n1:entryRelationship/n1:observation[{}]", has_code(code));
        rows.push_str(&format!(
            "<xsl:if test=\"{}\">{}</xsl:if>\n",
            escape_markup(&related),
            row(
                descriptor,
                label,
                &call_template("format-code", &[("code", &format!("{related}[1]/n1:value"))]),
            )
        ));
    }

    format!(
        "<xsl:for-each select=\"{}\">\n<table class=\"diagnosis-grid\">\n{rows}</table>\n</xsl:for-each>\n",
        escape_markup(&select)
    )
}

fn follow_up_content(descriptor: &MetadataDescriptor) -> String {
    let Some(code) = descriptor.observation_code(ObservationKind::NextConsultation) else {
        return String::new();
    };
    let select = escape_markup(&format!("n1:entry//n1:*[{}]", has_code(code)));
    let date = "<xsl:choose><xsl:when test=\"n1:effectiveTime/@value\">\
                <xsl:call-template name=\"format-date-time\"><xsl:with-param name=\"value\" select=\"n1:effectiveTime/@value\"/></xsl:call-template></xsl:when>\
                <xsl:otherwise><xsl:call-template name=\"format-date-time\"><xsl:with-param name=\"value\" select=\"n1:effectiveTime/n1:low/@value\"/></xsl:call-template></xsl:otherwise></xsl:choose>";
    format!(
        "<xsl:if test=\"{select}\"><table class=\"observation-table\">\n\
         <xsl:for-each select=\"{select}\">\n{}</xsl:for-each>\n</table></xsl:if>\n",
        row(descriptor, Label::NextConsultation, date)
    )
}

/// Builds the sections fragment.
pub fn build(descriptor: &MetadataDescriptor) -> RuleFragment {
    let mut markup = String::new();
    markup.push_str(GENERIC_SECTION);
    markup.push_str(SECTION_TITLE);
    markup.push_str(NARRATIVE);
    markup.push_str(NON_XML_BODY);
    markup.push_str(&code_system_name(descriptor));

    for kind in descriptor.configured_sections() {
        let Some(code) = descriptor.section_code(kind) else {
            continue;
        };
        let content = match kind {
            SectionKind::Reasons => reasons_content(descriptor),
            SectionKind::Diagnoses => diagnoses_content(descriptor),
            SectionKind::FollowUp => follow_up_content(descriptor),
        };
        tracing::trace!(section = kind.key(), "emitting specialised section rule");
        markup.push_str(&section_rule(descriptor, kind, code, &content));
    }

    RuleFragment::new(FragmentCategory::Sections, markup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(section_codes: serde_json::Value, observation_codes: serde_json::Value) -> MetadataDescriptor {
        serde_json::from_value(json!({
            "namespaces": {"n1": "urn:hl7-org:v3"},
            "templateIdentifiers": {
                "documentTemplate": "2.16.840.1.113883.10.20.22.1.1",
                "sections": {"diagnoses": "2.16.840.1.113883.10.20.22.2.5.1"}
            },
            "sectionCodes": section_codes,
            "observationCodes": observation_codes,
            "codeSystems": {"loinc": "2.16.840.1.113883.6.1", "snomed": "2.16.840.1.113883.6.96"}
        }))
        .unwrap()
    }

    #[test]
    fn test_sections_emitted_in_fixed_order() {
        let metadata = descriptor(
            json!({"followUp": "18776-5", "diagnoses": "11450-4", "reasons": "10154-3"}),
            json!({}),
        );
        let fragment = build(&metadata);
        let markup = fragment.markup();
        let reasons = markup.find("section-reasons").unwrap();
        let diagnoses = markup.find("section-diagnoses").unwrap();
        let follow_up = markup.find("section-follow-up").unwrap();
        assert!(reasons < diagnoses && diagnoses < follow_up);
    }

    #[test]
    fn test_no_section_codes_keeps_generic_rules_only() {
        let fragment = build(&descriptor(json!({}), json!({})));
        let markup = fragment.markup();
        assert!(markup.contains("<xsl:template match=\"n1:section\">"));
        assert!(!markup.contains("section-diagnoses"));
        assert!(!markup.contains("section-reasons"));
    }

    #[test]
    fn test_section_pattern_accepts_code_or_template() {
        let metadata = descriptor(json!({"diagnoses": "11450-4"}), json!({}));
        assert_eq!(
            section_pattern(&metadata, SectionKind::Diagnoses, "11450-4"),
            "n1:section[n1:code/@code = '11450-4' or n1:templateId/@root = '2.16.840.1.113883.10.20.22.2.5.1']"
        );
        assert_eq!(
            section_pattern(&metadata, SectionKind::Reasons, "10154-3"),
            "n1:section[n1:code/@code = '10154-3']"
        );
    }

    #[test]
    fn test_missing_certainty_code_omits_only_that_row() {
        let metadata = descriptor(
            json!({"diagnoses": "11450-4"}),
            json!({"diagnoses": {"problemStatus": "33999-4"}}),
        );
        let markup = build(&metadata).markup().to_string();
        assert!(markup.contains("<th>Diagnóstico</th>"));
        assert!(markup.contains("<th>Fecha de inicio</th>"));
        assert!(markup.contains("<th>Estado del problema</th>"));
        assert!(!markup.contains("<th>Grado de certeza</th>"));
    }

    #[test]
    fn test_code_system_names_are_listed() {
        let metadata = descriptor(json!({}), json!({}));
        let markup = code_system_name(&metadata);
        assert!(markup.contains("$oid = &apos;2.16.840.1.113883.6.96&apos;\">SNOMED<"));
        assert!(markup.contains("$oid = &apos;2.16.840.1.113883.6.1&apos;\">LOINC<"));
    }
}
