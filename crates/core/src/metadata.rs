//! Metadata descriptor model.
//!
//! A descriptor configures one rendering pass: which namespaces the document uses, which
//! coded identifiers mark each section and observation, and which labels to show. Callers
//! supply it as a JSON value; [`crate::validation`] turns a valid value into a typed
//! [`MetadataDescriptor`].

use crate::error::MetadataLoadError;
use cdr_types::NonEmptyText;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One rendering request as received from the surrounding application.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderRequest<'a> {
    /// Raw clinical document markup.
    pub document: Option<&'a str>,
    /// Metadata descriptor, still untyped.
    pub metadata: Option<&'a serde_json::Value>,
}

impl<'a> RenderRequest<'a> {
    pub fn new(document: &'a str, metadata: &'a serde_json::Value) -> Self {
        Self {
            document: Some(document),
            metadata: Some(metadata),
        }
    }
}

/// Validated, immutable configuration for one rendering pass.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDescriptor {
    pub namespaces: BTreeMap<String, String>,
    pub template_identifiers: TemplateIdentifiers,
    #[serde(default)]
    pub section_codes: BTreeMap<String, String>,
    #[serde(default)]
    pub observation_codes: BTreeMap<String, BTreeMap<String, String>>,
    pub code_systems: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateIdentifiers {
    #[serde(default)]
    pub document_template: Option<String>,
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl MetadataDescriptor {
    /// The document-level template identifier, if one is configured.
    pub fn document_template(&self) -> Option<&str> {
        non_blank(self.template_identifiers.document_template.as_ref())
    }

    /// The coded identifier for a section, ignoring blank entries.
    pub fn section_code(&self, kind: SectionKind) -> Option<&str> {
        non_blank(self.section_codes.get(kind.key()))
    }

    /// The structural template identifier for a section, ignoring blank entries.
    pub fn section_template(&self, kind: SectionKind) -> Option<&str> {
        non_blank(self.template_identifiers.sections.get(kind.key()))
    }

    /// The coded identifier of an observation within its section, ignoring blank entries.
    pub fn observation_code(&self, kind: ObservationKind) -> Option<&str> {
        non_blank(
            self.observation_codes
                .get(kind.section().key())
                .and_then(|codes| codes.get(kind.key())),
        )
    }

    /// Sections that get a specialised rule, in their fixed emission order.
    ///
    /// A section is configured when it has a section code; sections named in the metadata
    /// that have no specialised rule are ignored.
    pub fn configured_sections(&self) -> Vec<SectionKind> {
        SectionKind::ALL
            .into_iter()
            .filter(|kind| self.section_code(*kind).is_some())
            .collect()
    }

    /// The label to show for a field: the override when it holds text, else the default.
    pub fn label(&self, label: Label) -> String {
        self.labels
            .get(label.key())
            .and_then(|text| text.parse::<NonEmptyText>().ok())
            .map(NonEmptyText::into_inner)
            .unwrap_or_else(|| label.default_text().to_string())
    }
}

/// Sections with a specialised rendering rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKind {
    Reasons,
    Diagnoses,
    FollowUp,
}

impl SectionKind {
    /// Emission order of specialised section rules.
    pub const ALL: [SectionKind; 3] = [
        SectionKind::Reasons,
        SectionKind::Diagnoses,
        SectionKind::FollowUp,
    ];

    /// Key used in `sectionCodes`, `observationCodes` and `templateIdentifiers.sections`.
    pub fn key(&self) -> &'static str {
        match self {
            SectionKind::Reasons => "reasons",
            SectionKind::Diagnoses => "diagnoses",
            SectionKind::FollowUp => "followUp",
        }
    }

    /// Heading used when the section carries no title of its own.
    pub fn default_title(&self) -> &'static str {
        match self {
            SectionKind::Reasons => "Motivo de consulta",
            SectionKind::Diagnoses => "Diagnósticos",
            SectionKind::FollowUp => "Seguimiento",
        }
    }

    /// CSS class of the rendered section.
    pub fn css_class(&self) -> &'static str {
        match self {
            SectionKind::Reasons => "section-reasons",
            SectionKind::Diagnoses => "section-diagnoses",
            SectionKind::FollowUp => "section-follow-up",
        }
    }
}

/// Observations rendered as structured rows inside a specialised section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationKind {
    Reason,
    Diagnosis,
    ProblemStatus,
    CertaintyLevel,
    NextConsultation,
}

impl ObservationKind {
    pub fn section(&self) -> SectionKind {
        match self {
            ObservationKind::Reason => SectionKind::Reasons,
            ObservationKind::Diagnosis
            | ObservationKind::ProblemStatus
            | ObservationKind::CertaintyLevel => SectionKind::Diagnoses,
            ObservationKind::NextConsultation => SectionKind::FollowUp,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            ObservationKind::Reason => "reason",
            ObservationKind::Diagnosis => "diagnosis",
            ObservationKind::ProblemStatus => "problemStatus",
            ObservationKind::CertaintyLevel => "certaintyLevel",
            ObservationKind::NextConsultation => "nextConsultation",
        }
    }
}

/// Visible labels, each overridable through `labels` in the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    PatientBlock,
    PatientName,
    PatientIdentifier,
    BirthDate,
    Gender,
    Address,
    Contact,
    EncounterBlock,
    EncounterDate,
    EncounterLocation,
    Responsible,
    AuthorBlock,
    AuthorName,
    AuthorTime,
    AuthorOrganization,
    DocumentBlock,
    DocumentIdentifier,
    DocumentDate,
    Custodian,
    Reason,
    Diagnosis,
    OnsetDate,
    ProblemStatus,
    CertaintyLevel,
    NextConsultation,
}

impl Label {
    pub const ALL: [Label; 25] = [
        Label::PatientBlock,
        Label::PatientName,
        Label::PatientIdentifier,
        Label::BirthDate,
        Label::Gender,
        Label::Address,
        Label::Contact,
        Label::EncounterBlock,
        Label::EncounterDate,
        Label::EncounterLocation,
        Label::Responsible,
        Label::AuthorBlock,
        Label::AuthorName,
        Label::AuthorTime,
        Label::AuthorOrganization,
        Label::DocumentBlock,
        Label::DocumentIdentifier,
        Label::DocumentDate,
        Label::Custodian,
        Label::Reason,
        Label::Diagnosis,
        Label::OnsetDate,
        Label::ProblemStatus,
        Label::CertaintyLevel,
        Label::NextConsultation,
    ];

    /// Key of the override in the descriptor's `labels` mapping.
    pub fn key(&self) -> &'static str {
        match self {
            Label::PatientBlock => "patientBlock",
            Label::PatientName => "patientName",
            Label::PatientIdentifier => "patientIdentifier",
            Label::BirthDate => "birthDate",
            Label::Gender => "gender",
            Label::Address => "address",
            Label::Contact => "contact",
            Label::EncounterBlock => "encounterBlock",
            Label::EncounterDate => "encounterDate",
            Label::EncounterLocation => "encounterLocation",
            Label::Responsible => "responsible",
            Label::AuthorBlock => "authorBlock",
            Label::AuthorName => "authorName",
            Label::AuthorTime => "authorTime",
            Label::AuthorOrganization => "authorOrganization",
            Label::DocumentBlock => "documentBlock",
            Label::DocumentIdentifier => "documentIdentifier",
            Label::DocumentDate => "documentDate",
            Label::Custodian => "custodian",
            Label::Reason => "reason",
            Label::Diagnosis => "diagnosis",
            Label::OnsetDate => "onsetDate",
            Label::ProblemStatus => "problemStatus",
            Label::CertaintyLevel => "certaintyLevel",
            Label::NextConsultation => "nextConsultation",
        }
    }

    pub fn default_text(&self) -> &'static str {
        match self {
            Label::PatientBlock => "Datos del paciente",
            Label::PatientName => "Nombre",
            Label::PatientIdentifier => "Identificador",
            Label::BirthDate => "Fecha de nacimiento",
            Label::Gender => "Sexo",
            Label::Address => "Dirección",
            Label::Contact => "Contacto",
            Label::EncounterBlock => "Datos de la atención",
            Label::EncounterDate => "Fecha de atención",
            Label::EncounterLocation => "Centro",
            Label::Responsible => "Responsable",
            Label::AuthorBlock => "Autor",
            Label::AuthorName => "Profesional",
            Label::AuthorTime => "Fecha de firma",
            Label::AuthorOrganization => "Organización",
            Label::DocumentBlock => "Datos del documento",
            Label::DocumentIdentifier => "Identificador del documento",
            Label::DocumentDate => "Fecha de creación",
            Label::Custodian => "Custodio",
            Label::Reason => "Motivo",
            Label::Diagnosis => "Diagnóstico",
            Label::OnsetDate => "Fecha de inicio",
            Label::ProblemStatus => "Estado del problema",
            Label::CertaintyLevel => "Grado de certeza",
            Label::NextConsultation => "Próxima consulta",
        }
    }
}

/// Serialisation formats accepted for metadata files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataFormat {
    Json,
    Yaml,
}

impl MetadataFormat {
    /// Picks the format from a file extension; anything but `.yaml`/`.yml` is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml") | Some("yml") => MetadataFormat::Yaml,
            _ => MetadataFormat::Json,
        }
    }
}

/// Reads metadata text into an untyped value ready for validation.
///
/// # Errors
///
/// Returns [`MetadataLoadError`] if the text is not valid for `format`.
pub fn metadata_value_from_str(
    text: &str,
    format: MetadataFormat,
) -> Result<serde_json::Value, MetadataLoadError> {
    Ok(match format {
        MetadataFormat::Json => serde_json::from_str(text)?,
        MetadataFormat::Yaml => serde_yaml::from_str(text)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(value: serde_json::Value) -> MetadataDescriptor {
        serde_json::from_value(value).unwrap()
    }

    fn minimal() -> serde_json::Value {
        json!({
            "namespaces": {"n1": "urn:hl7-org:v3"},
            "templateIdentifiers": {"documentTemplate": "2.16.840.1.113883.10.20.22.1.1"},
            "codeSystems": {"loinc": "2.16.840.1.113883.6.1", "snomed": "2.16.840.1.113883.6.96"}
        })
    }

    #[test]
    fn test_configured_sections_follow_fixed_order() {
        let mut value = minimal();
        value["sectionCodes"] = json!({
            "followUp": "18776-5",
            "diagnoses": "11450-4",
            "unknown": "1-1",
            "reasons": "10154-3"
        });
        let metadata = descriptor(value);
        assert_eq!(
            metadata.configured_sections(),
            vec![
                SectionKind::Reasons,
                SectionKind::Diagnoses,
                SectionKind::FollowUp
            ]
        );
    }

    #[test]
    fn test_blank_section_code_is_not_configured() {
        let mut value = minimal();
        value["sectionCodes"] = json!({"reasons": "  ", "diagnoses": "11450-4"});
        let metadata = descriptor(value);
        assert_eq!(metadata.configured_sections(), vec![SectionKind::Diagnoses]);
        assert_eq!(metadata.section_code(SectionKind::Reasons), None);
    }

    #[test]
    fn test_observation_code_is_scoped_by_section() {
        let mut value = minimal();
        value["observationCodes"] = json!({
            "diagnoses": {"problemStatus": "33999-4"},
            "followUp": {"certaintyLevel": "misplaced"}
        });
        let metadata = descriptor(value);
        assert_eq!(
            metadata.observation_code(ObservationKind::ProblemStatus),
            Some("33999-4")
        );
        assert_eq!(metadata.observation_code(ObservationKind::CertaintyLevel), None);
    }

    #[test]
    fn test_label_falls_back_to_default_when_override_blank() {
        let mut value = minimal();
        value["labels"] = json!({"patientName": "Paciente", "gender": "   "});
        let metadata = descriptor(value);
        assert_eq!(metadata.label(Label::PatientName), "Paciente");
        assert_eq!(metadata.label(Label::Gender), "Sexo");
        assert_eq!(metadata.label(Label::BirthDate), "Fecha de nacimiento");
    }

    #[test]
    fn test_label_keys_are_unique() {
        let mut keys: Vec<_> = Label::ALL.iter().map(Label::key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), Label::ALL.len());
    }

    #[test]
    fn test_metadata_value_from_yaml_and_json() {
        let yaml = "namespaces:\n  n1: urn:hl7-org:v3\ncodeSystems:\n  loinc: 2.16.840.1.113883.6.1\n";
        let value = metadata_value_from_str(yaml, MetadataFormat::Yaml).unwrap();
        assert_eq!(value["namespaces"]["n1"], "urn:hl7-org:v3");

        let value = metadata_value_from_str("{\"a\": 1}", MetadataFormat::Json).unwrap();
        assert_eq!(value["a"], 1);
        assert!(metadata_value_from_str("{", MetadataFormat::Json).is_err());
    }

    #[test]
    fn test_metadata_format_from_path() {
        assert_eq!(
            MetadataFormat::from_path(Path::new("meta.YML")),
            MetadataFormat::Yaml
        );
        assert_eq!(
            MetadataFormat::from_path(Path::new("meta.json")),
            MetadataFormat::Json
        );
        assert_eq!(
            MetadataFormat::from_path(Path::new("meta")),
            MetadataFormat::Json
        );
    }
}
