//! Header block rules.
//!
//! Four named templates render the fixed header blocks of a clinical document: patient,
//! encounter, author and document provenance. Labels come from the descriptor (or their
//! defaults); data paths are fixed by the standard document shape. Optional rows are wrapped
//! in an existence test on their backing data, mandatory rows are always emitted.

use super::{call_template, escape_markup, xpath_literal, FragmentCategory, RuleFragment};
use crate::constants::TEMPLATE_MISMATCH_NOTICE;
use crate::metadata::{Label, MetadataDescriptor};

/// A label/value row; `value` is rule markup.
fn row(descriptor: &MetadataDescriptor, label: Label, value: &str) -> String {
    format!(
        "<tr><th>{}</th><td>{value}</td></tr>\n",
        escape_markup(&descriptor.label(label))
    )
}

/// A row rendered only when `test` holds.
fn optional_row(descriptor: &MetadataDescriptor, test: &str, label: Label, value: &str) -> String {
    format!(
        "<xsl:if test=\"{}\">{}</xsl:if>\n",
        escape_markup(test),
        row(descriptor, label, value)
    )
}

fn block(descriptor: &MetadataDescriptor, class: &str, title: Label, rows: &str) -> String {
    format!(
        "<div class=\"header-block {class}\">\n<h2>{}</h2>\n<table class=\"header-table\">\n{rows}</table>\n</div>\n",
        escape_markup(&descriptor.label(title))
    )
}

fn patient_header(descriptor: &MetadataDescriptor) -> String {
    let mut rows = row(
        descriptor,
        Label::PatientName,
        &call_template("format-name", &[("name", "$role/n1:patient/n1:name[1]")]),
    );
    rows.push_str(&optional_row(
        descriptor,
        "$role/n1:id",
        Label::PatientIdentifier,
        &format!(
            "<xsl:for-each select=\"$role/n1:id\"><xsl:if test=\"position() &gt; 1\"><xsl:text>; </xsl:text></xsl:if>{}</xsl:for-each>",
            call_template("format-identifier", &[("id", ".")])
        ),
    ));
    rows.push_str(&optional_row(
        descriptor,
        "$role/n1:patient/n1:birthTime/@value",
        Label::BirthDate,
        &call_template(
            "format-date-time",
            &[("value", "$role/n1:patient/n1:birthTime/@value")],
        ),
    ));
    rows.push_str(&optional_row(
        descriptor,
        "$role/n1:patient/n1:administrativeGenderCode/@code",
        Label::Gender,
        &call_template(
            "format-gender",
            &[(
                "code",
                "string($role/n1:patient/n1:administrativeGenderCode/@code)",
            )],
        ),
    ));
    rows.push_str(&optional_row(
        descriptor,
        "$role/n1:addr",
        Label::Address,
        &call_template("format-address", &[("addr", "$role/n1:addr[1]")]),
    ));
    rows.push_str(&optional_row(
        descriptor,
        "$role/n1:telecom[@value]",
        Label::Contact,
        &call_template("format-contact", &[("contact", "$role")]),
    ));

    format!(
        "<xsl:template name=\"patient-header\">\n<xsl:variable name=\"role\" select=\"n1:recordTarget[1]/n1:patientRole\"/>\n{}</xsl:template>\n",
        block(descriptor, "patient", Label::PatientBlock, &rows)
    )
}

fn encounter_header(descriptor: &MetadataDescriptor) -> String {
    let mut rows = row(
        descriptor,
        Label::EncounterDate,
        "<xsl:choose><xsl:when test=\"$encounter/n1:effectiveTime/n1:low/@value\">\
         <xsl:call-template name=\"format-date-time\"><xsl:with-param name=\"value\" select=\"$encounter/n1:effectiveTime/n1:low/@value\"/></xsl:call-template></xsl:when>\
         <xsl:otherwise><xsl:call-template name=\"format-date-time\"><xsl:with-param name=\"value\" select=\"$encounter/n1:effectiveTime/@value\"/></xsl:call-template></xsl:otherwise></xsl:choose>",
    );
    rows.push_str(&optional_row(
        descriptor,
        "$facility/n1:serviceProviderOrganization/n1:name | $facility/n1:location/n1:name",
        Label::EncounterLocation,
        "<xsl:choose><xsl:when test=\"$facility/n1:serviceProviderOrganization/n1:name\">\
         <xsl:value-of select=\"normalize-space($facility/n1:serviceProviderOrganization/n1:name)\"/></xsl:when>\
         <xsl:otherwise><xsl:value-of select=\"normalize-space($facility/n1:location/n1:name)\"/></xsl:otherwise></xsl:choose>",
    ));
    rows.push_str(&optional_row(
        descriptor,
        "$encounter/n1:responsibleParty/n1:assignedEntity/n1:assignedPerson/n1:name",
        Label::Responsible,
        &call_template(
            "format-name",
            &[(
                "name",
                "$encounter/n1:responsibleParty/n1:assignedEntity/n1:assignedPerson/n1:name[1]",
            )],
        ),
    ));

    format!(
        "<xsl:template name=\"encounter-header\">\n\
         <xsl:variable name=\"encounter\" select=\"n1:componentOf/n1:encompassingEncounter\"/>\n\
         <xsl:variable name=\"facility\" select=\"$encounter/n1:location/n1:healthCareFacility\"/>\n\
         {}</xsl:template>\n",
        block(descriptor, "encounter", Label::EncounterBlock, &rows)
    )
}

fn author_header(descriptor: &MetadataDescriptor) -> String {
    let mut rows = row(
        descriptor,
        Label::AuthorName,
        &call_template(
            "format-name",
            &[("name", "$author/n1:assignedAuthor/n1:assignedPerson/n1:name[1]")],
        ),
    );
    rows.push_str(&optional_row(
        descriptor,
        "$author/n1:time/@value",
        Label::AuthorTime,
        &call_template("format-date-time", &[("value", "$author/n1:time/@value")]),
    ));
    rows.push_str(&optional_row(
        descriptor,
        "$author/n1:assignedAuthor/n1:representedOrganization/n1:name",
        Label::AuthorOrganization,
        "<xsl:value-of select=\"normalize-space($author/n1:assignedAuthor/n1:representedOrganization/n1:name)\"/>",
    ));
    rows.push_str(&optional_row(
        descriptor,
        "$author/n1:assignedAuthor/n1:telecom[@value]",
        Label::Contact,
        &call_template("format-contact", &[("contact", "$author/n1:assignedAuthor")]),
    ));

    format!(
        "<xsl:template name=\"author-header\">\n<xsl:variable name=\"author\" select=\"n1:author[1]\"/>\n{}</xsl:template>\n",
        block(descriptor, "author", Label::AuthorBlock, &rows)
    )
}

fn document_header(descriptor: &MetadataDescriptor) -> String {
    let mut rows = row(
        descriptor,
        Label::DocumentIdentifier,
        &call_template("format-identifier", &[("id", "n1:id")]),
    );
    rows.push_str(&row(
        descriptor,
        Label::DocumentDate,
        &call_template("format-date-time", &[("value", "n1:effectiveTime/@value")]),
    ));
    rows.push_str(&optional_row(
        descriptor,
        "n1:custodian/n1:assignedCustodian/n1:representedCustodianOrganization/n1:name",
        Label::Custodian,
        "<xsl:value-of select=\"normalize-space(n1:custodian/n1:assignedCustodian/n1:representedCustodianOrganization/n1:name)\"/>",
    ));

    // The validator guarantees a document template; an absent one only skips the notice.
    let notice = match descriptor.document_template() {
        Some(template) => format!(
            "<xsl:if test=\"{}\"><p class=\"notice\">{}</p></xsl:if>\n",
            escape_markup(&format!(
                "not(n1:templateId[@root = {}])",
                xpath_literal(template)
            )),
            escape_markup(TEMPLATE_MISMATCH_NOTICE)
        ),
        None => String::new(),
    };

    format!(
        "<xsl:template name=\"document-header\">\n{notice}{}</xsl:template>\n",
        block(descriptor, "document", Label::DocumentBlock, &rows)
    )
}

/// Builds the headers fragment: `patient-header`, `encounter-header`, `author-header` and
/// `document-header`, each called with the clinical document element as context.
pub fn build(descriptor: &MetadataDescriptor) -> RuleFragment {
    let mut markup = patient_header(descriptor);
    markup.push_str(&encounter_header(descriptor));
    markup.push_str(&author_header(descriptor));
    markup.push_str(&document_header(descriptor));
    RuleFragment::new(FragmentCategory::Headers, markup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(labels: serde_json::Value) -> MetadataDescriptor {
        serde_json::from_value(json!({
            "namespaces": {"n1": "urn:hl7-org:v3"},
            "templateIdentifiers": {"documentTemplate": "2.16.840.1.113883.10.20.22.1.1"},
            "codeSystems": {"loinc": "2.16.840.1.113883.6.1", "snomed": "2.16.840.1.113883.6.96"},
            "labels": labels
        }))
        .unwrap()
    }

    #[test]
    fn test_headers_use_label_overrides_and_defaults() {
        let fragment = build(&descriptor(json!({"patientName": "Paciente"})));
        let markup = fragment.markup();
        assert_eq!(fragment.category(), FragmentCategory::Headers);
        assert!(markup.contains("<th>Paciente</th>"));
        assert!(markup.contains("<th>Fecha de nacimiento</th>"));
        assert!(!markup.contains("<th>Nombre</th>"));
    }

    #[test]
    fn test_headers_escape_label_markup() {
        let fragment = build(&descriptor(json!({"gender": "<b>{{styles}}</b>"})));
        let markup = fragment.markup();
        assert!(markup.contains("<th>&lt;b&gt;&#123;&#123;styles&#125;&#125;&lt;/b&gt;</th>"));
    }

    #[test]
    fn test_headers_define_four_blocks() {
        let fragment = build(&descriptor(json!({})));
        for name in [
            "patient-header",
            "encounter-header",
            "author-header",
            "document-header",
        ] {
            assert!(fragment
                .markup()
                .contains(&format!("<xsl:template name=\"{name}\">")));
        }
        assert!(fragment
            .markup()
            .contains("not(n1:templateId[@root = &apos;2.16.840.1.113883.10.20.22.1.1&apos;])"));
    }
}
