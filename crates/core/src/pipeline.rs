//! Rendering pipeline.
//!
//! One invocation runs every stage in order: validate the request, clean the payload,
//! assemble the rule set, parse the rule set, parse the payload, transform and serialise.
//! The first failing stage ends the run; nothing is retried. A pipeline holds only its
//! configuration, so one instance can serve concurrent callers.

use crate::config::RenderConfig;
use crate::engine::{transform, Stylesheet};
use crate::metadata::RenderRequest;
use crate::rules::{assemble, RuleSet};
use crate::validation::validated_descriptor;
use crate::{PipelineError, PipelineResult};
use cda::{clean_payload, parse, serialize, DocumentOrigin, XmlTree};
use std::borrow::Cow;

/// The output of one rendering invocation.
#[derive(Debug, Clone)]
pub struct TransformationResult {
    tree: XmlTree,
    html: String,
}

impl TransformationResult {
    /// The result tree the HTML was serialised from.
    pub fn tree(&self) -> &XmlTree {
        &self.tree
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn into_html(self) -> String {
        self.html
    }
}

/// Renders clinical documents to HTML under a fixed configuration.
#[derive(Clone, Debug, Default)]
pub struct RenderPipeline {
    config: RenderConfig,
}

impl RenderPipeline {
    /// Creates a pipeline.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration resolved at startup.
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Renders `document` under `metadata` and returns the HTML.
    ///
    /// # Arguments
    ///
    /// * `document` - Raw clinical document markup.
    /// * `metadata` - Untyped metadata descriptor.
    ///
    /// # Errors
    ///
    /// Returns the [`PipelineError`] of the first stage that failed.
    pub fn render(&self, document: &str, metadata: &serde_json::Value) -> PipelineResult<String> {
        let request = RenderRequest::new(document, metadata);
        self.render_request(Some(&request))
            .map(TransformationResult::into_html)
    }

    /// Runs every stage for `request`.
    ///
    /// # Arguments
    ///
    /// * `request` - The request to render; `None` is rejected by validation.
    ///
    /// # Returns
    ///
    /// The result tree together with its serialised HTML.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Validation`] if the request or its metadata is incomplete.
    /// - [`PipelineError::Assembly`] if the rule set could not be fully assembled.
    /// - [`PipelineError::Parse`] if the rule set or the document is not well-formed; the
    ///   error names which one.
    /// - [`PipelineError::Transform`] if the rule set could not be applied.
    /// - [`PipelineError::Serialize`] if the result could not be written out.
    pub fn render_request(
        &self,
        request: Option<&RenderRequest<'_>>,
    ) -> PipelineResult<TransformationResult> {
        let span = tracing::debug_span!("render");
        let _enter = span.enter();

        let descriptor = validated_descriptor(request).map_err(|e| {
            tracing::warn!("Render request rejected: {}", e);
            PipelineError::from(e)
        })?;
        // Validation guarantees a non-empty document.
        let document = request.and_then(|r| r.document).unwrap_or_default();

        let payload = if self.config.strip_processing_instructions() {
            clean_payload(document)
        } else {
            Cow::Borrowed(document)
        };
        tracing::debug!(bytes = payload.len(), "payload prepared");

        let rule_set = assemble(&descriptor).map_err(|e| {
            tracing::error!("Rule set assembly error: {}", e);
            PipelineError::from(e)
        })?;
        tracing::debug!(bytes = rule_set.as_str().len(), "rule set assembled");

        let stylesheet = self.compile(&rule_set)?;

        let source = parse(&payload, DocumentOrigin::SourceDocument).map_err(|e| {
            tracing::warn!("Source document rejected: {}", e);
            PipelineError::from(e)
        })?;
        tracing::debug!(nodes = source.tree().len(), "source document parsed");

        let tree = transform(&stylesheet, source.tree(), self.config.max_template_depth())
            .map_err(|e| {
                tracing::error!("Transform error: {}", e);
                PipelineError::from(e)
            })?;

        let html = serialize(&tree).map_err(|e| {
            tracing::error!("Serialise error: {}", e);
            PipelineError::from(e)
        })?;
        tracing::debug!(bytes = html.len(), "result serialised");

        Ok(TransformationResult { tree, html })
    }

    fn compile(&self, rule_set: &RuleSet) -> PipelineResult<Stylesheet> {
        let parsed = parse(rule_set.as_str(), DocumentOrigin::RuleSet).map_err(|e| {
            tracing::error!("Rule set parse error: {}", e);
            PipelineError::from(e)
        })?;
        let stylesheet = Stylesheet::compile(&parsed).map_err(|e| {
            tracing::error!("Rule set import error: {}", e);
            PipelineError::from(e)
        })?;
        tracing::debug!(templates = stylesheet.template_count(), "rule set compiled");
        Ok(stylesheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Stage, TransformError, ValidationError};
    use serde_json::json;

    const SAMPLE_DOCUMENT: &str = include_str!("../fixtures/sample_document.xml");
    const SAMPLE_METADATA: &str = include_str!("../fixtures/sample_metadata.json");

    fn metadata() -> serde_json::Value {
        serde_json::from_str(SAMPLE_METADATA).unwrap()
    }

    fn render(document: &str) -> PipelineResult<String> {
        RenderPipeline::default().render(document, &metadata())
    }

    fn with_body(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ClinicalDocument xmlns="urn:hl7-org:v3">
<templateId root="2.16.840.1.113883.10.20.22.1.1"/>
<id root="2.16.724.4.41" extension="DOC-1"/>
<code code="11488-4" displayName="Nota de consulta"/>
<title>Nota</title>
<effectiveTime value="20190823"/>
<recordTarget><patientRole><patient><name><given>Ana</given><family>Ruiz</family></name></patient></patientRole></recordTarget>
<component>{body}</component>
</ClinicalDocument>"#
        )
    }

    #[test]
    fn test_render_sample_document() {
        let html = render(SAMPLE_DOCUMENT).unwrap();

        assert!(html.starts_with(r#"<div class="cda-document">"#));
        assert!(html.contains("Informe de consulta externa"));
        assert!(html.contains("Juan Carlos Pérez González"));
        assert!(html.contains("23-Agosto-2019, 11:05:24"));
        assert!(html.contains("Masculino"));
        assert!(html.contains(r#"class="cda-section section-diagnoses""#));
        assert!(html.contains("Hipertensión arterial esencial"));
        assert!(html.contains("Confirmado"));
        assert!(html.contains(r#"class="cda-section section-follow-up""#));
        assert!(html.contains("15-Septiembre-2019"));
        assert!(html.contains(r#"class="cda-section section-reasons""#));
        assert!(html.contains("Cefalea de una semana de evolución"));
        assert!(!html.contains("xml-stylesheet"));
        assert!(!html.contains(crate::constants::TEMPLATE_MISMATCH_NOTICE));
    }

    #[test]
    fn test_render_returns_result_tree() {
        let metadata = metadata();
        let request = RenderRequest::new(SAMPLE_DOCUMENT, &metadata);
        let result = RenderPipeline::default()
            .render_request(Some(&request))
            .unwrap();
        assert!(result.tree().document_element().is_some());
        assert_eq!(result.html(), serialize(result.tree()).unwrap());
    }

    #[test]
    fn test_render_is_repeatable() {
        assert_eq!(
            render(SAMPLE_DOCUMENT).unwrap(),
            render(SAMPLE_DOCUMENT).unwrap()
        );
    }

    #[test]
    fn test_date_only_timestamp_has_no_time() {
        let html = render(&with_body("<structuredBody/>")).unwrap();
        assert!(html.contains("23-Agosto-2019"));
        assert!(!html.contains("23-Agosto-2019,"));
    }

    #[test]
    fn test_utc_offset_never_renders_as_time_parts() {
        let cases = [
            ("2019082311+0200", "23-Agosto-2019, 11</td>", "0200"),
            ("201908231105-0300", "23-Agosto-2019, 11:05</td>", "0300"),
            ("20190823+0200", "23-Agosto-2019</td>", "0200"),
        ];
        for (stamp, expected, offset) in cases {
            let document = with_body("<structuredBody/>").replace(
                r#"<effectiveTime value="20190823"/>"#,
                &format!(r#"<effectiveTime value="{stamp}"/>"#),
            );
            let html = render(&document).unwrap();
            assert!(html.contains(expected), "{stamp}");
            assert!(!html.contains(":+") && !html.contains(":-"), "{stamp}");
            assert!(!html.contains(offset), "{stamp}");
        }
    }

    #[test]
    fn test_single_digit_day_drops_leading_zero() {
        let document = with_body("<structuredBody/>").replace(
            r#"<effectiveTime value="20190823"/>"#,
            r#"<effectiveTime value="20190801"/>"#,
        );
        let html = render(&document).unwrap();
        assert!(html.contains("1-Agosto-2019</td>"));
        assert!(!html.contains("01-Agosto-2019"));
    }

    #[test]
    fn test_missing_encounter_keeps_mandatory_row() {
        let html = render(&with_body("<structuredBody/>")).unwrap();
        assert!(!html.contains("encompassingEncounter"));
        assert!(html.contains(r#"<div class="header-block encounter">"#));
        assert!(html.contains(&format!(
            "<th>{}</th><td></td>",
            crate::Label::EncounterDate.default_text()
        )));
    }

    #[test]
    fn test_javascript_reference_is_never_rendered() {
        let html = render(&with_body(
            r#"<nonXMLBody><text><reference value="JaVaScRiPt:alert(1)"/></text></nonXMLBody>"#,
        ))
        .unwrap();
        assert!(html.contains(crate::constants::SCRIPT_REFERENCE_WARNING));
        assert!(!html.contains("alert(1)"));
        assert!(!html.contains("<iframe"));
    }

    #[test]
    fn test_scrubbed_reference_renders_warning() {
        let html = render(&with_body(
            r#"<nonXMLBody><text><reference value="https://example.org/a.pdf?x=&quot;y&quot;"/></text></nonXMLBody>"#,
        ))
        .unwrap();
        assert!(html.contains(crate::constants::MALICIOUS_CONTENT_WARNING));
        assert!(!html.contains("<iframe"));
    }

    #[test]
    fn test_clean_reference_renders_sandboxed_frame() {
        let html = render(&with_body(
            r#"<nonXMLBody><text><reference value="https://example.org/informe.pdf"/></text></nonXMLBody>"#,
        ))
        .unwrap();
        assert!(html.contains(r#"src="https://example.org/informe.pdf""#));
        assert!(html.contains(r#"sandbox="""#));
        assert!(html.contains(r#"referrerpolicy="no-referrer""#));
    }

    #[test]
    fn test_diagnosis_without_certainty_code_omits_row() {
        let mut metadata = metadata();
        metadata["observationCodes"]["diagnoses"]
            .as_object_mut()
            .unwrap()
            .remove("certaintyLevel");
        let html = RenderPipeline::default()
            .render(SAMPLE_DOCUMENT, &metadata)
            .unwrap();
        assert!(html.contains("Hipertensión arterial esencial"));
        assert!(!html.contains("Grado de certeza"));
    }

    #[test]
    fn test_empty_section_codes_render_generic_sections() {
        let mut metadata = metadata();
        metadata["sectionCodes"] = json!({});
        let html = RenderPipeline::default()
            .render(SAMPLE_DOCUMENT, &metadata)
            .unwrap();
        assert!(html.contains("Juan Carlos Pérez González"));
        assert!(html.contains("Hipertensión arterial esencial"));
        assert!(!html.contains("section-diagnoses"));
    }

    #[test]
    fn test_malformed_document_is_a_document_parse_error() {
        let err = render("<ClinicalDocument><title>Nota</ClinicalDocument>").unwrap_err();
        assert_eq!(err.stage(), Stage::ParseDocument);
        assert!(err.is_input_defect());
        assert!(matches!(
            err,
            PipelineError::Parse(ref e) if e.origin == DocumentOrigin::SourceDocument
        ));
    }

    #[test]
    fn test_missing_namespaces_fail_before_rendering() {
        let mut metadata = metadata();
        metadata.as_object_mut().unwrap().remove("namespaces");
        let err = RenderPipeline::default()
            .render(SAMPLE_DOCUMENT, &metadata)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::MissingNamespaces)
        ));
    }

    #[test]
    fn test_missing_request_is_rejected() {
        let err = RenderPipeline::default().render_request(None).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::MissingRequest)
        ));
    }

    #[test]
    fn test_depth_limit_fails_transform() {
        let pipeline = RenderPipeline::new(RenderConfig::new(3, true).unwrap());
        let err = pipeline.render(SAMPLE_DOCUMENT, &metadata()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Transform(TransformError::TransformFailed { .. })
        ));
        assert!(!err.is_input_defect());
    }

    #[test]
    fn test_template_mismatch_notice() {
        let document = with_body("<structuredBody/>").replace(
            "2.16.840.1.113883.10.20.22.1.1",
            "1.2.3.4",
        );
        let html = render(&document).unwrap();
        assert!(html.contains(crate::constants::TEMPLATE_MISMATCH_NOTICE));
    }
}
