//! Request and metadata validation.
//!
//! Runs once per pipeline invocation, before any rule is built. Presence checks run first,
//! in a fixed order, and stop at the first failure. A request that passes them is then read
//! into a typed [`MetadataDescriptor`] and its contents are checked.

use crate::constants::{
    MIN_CODE_SYSTEMS, REQUIRED_NAMESPACE_PREFIXES, RESERVED_NAMESPACE_PREFIX,
};
use crate::metadata::{MetadataDescriptor, RenderRequest};
use crate::{ValidationError, ValidationResult};
use serde_json::Value;

/// Checks a render request without keeping the typed descriptor.
///
/// # Errors
///
/// Returns the first [`ValidationError`] found; see [`validated_descriptor`].
pub fn validate(request: Option<&RenderRequest<'_>>) -> ValidationResult<()> {
    validated_descriptor(request).map(|_| ())
}

/// Checks a render request and returns its typed metadata descriptor.
///
/// Checks run in this order and stop at the first failure: request present, document
/// payload non-empty, metadata present, metadata is an object, `namespaces` present,
/// `templateIdentifiers` present, `codeSystems` present. Then the descriptor is read and its
/// namespaces, document template and code systems are checked.
///
/// # Arguments
///
/// * `request` - The request to check; `None` models a missing request.
///
/// # Returns
///
/// The typed descriptor, ready for the rule builders.
///
/// # Errors
///
/// Returns the [`ValidationError`] variant naming the first missing or invalid field.
pub fn validated_descriptor(
    request: Option<&RenderRequest<'_>>,
) -> ValidationResult<MetadataDescriptor> {
    let request = request.ok_or(ValidationError::MissingRequest)?;

    match request.document {
        Some(document) if !document.trim().is_empty() => {}
        _ => return Err(ValidationError::EmptyDocument),
    }

    let metadata = request.metadata.ok_or(ValidationError::MissingMetadata)?;
    let object = match metadata {
        Value::Object(object) => object,
        other => return Err(ValidationError::MetadataNotObject(json_kind(other))),
    };

    if !object.contains_key("namespaces") {
        return Err(ValidationError::MissingNamespaces);
    }
    if !object.contains_key("templateIdentifiers") {
        return Err(ValidationError::MissingTemplateIdentifiers);
    }
    if !object.contains_key("codeSystems") {
        return Err(ValidationError::MissingCodeSystems);
    }

    let descriptor: MetadataDescriptor =
        serde_path_to_error::deserialize(metadata).map_err(|e| {
            ValidationError::InvalidMetadata {
                path: e.path().to_string(),
                message: e.inner().to_string(),
            }
        })?;

    validate_namespaces(&descriptor)?;

    if descriptor.document_template().is_none() {
        return Err(ValidationError::MissingDocumentTemplate);
    }

    let found = descriptor
        .code_systems
        .values()
        .filter(|oid| !oid.trim().is_empty())
        .count();
    if found < MIN_CODE_SYSTEMS {
        return Err(ValidationError::InsufficientCodeSystems {
            found,
            required: MIN_CODE_SYSTEMS,
        });
    }

    Ok(descriptor)
}

fn validate_namespaces(descriptor: &MetadataDescriptor) -> ValidationResult<()> {
    for (prefix, uri) in &descriptor.namespaces {
        validate_namespace_prefix(prefix)?;
        if uri.trim().is_empty() {
            return Err(ValidationError::EmptyNamespace(prefix.clone()));
        }
    }

    if let Some(missing) = REQUIRED_NAMESPACE_PREFIXES
        .iter()
        .find(|prefix| !descriptor.namespaces.contains_key(**prefix))
    {
        return Err(ValidationError::MissingNamespace(missing.to_string()));
    }

    Ok(())
}

/// Validates that a metadata namespace prefix can be declared on the rule-set root.
///
/// - Rejects empty prefixes
/// - Rejects the prefix reserved for rule instructions and anything starting with `xml`
/// - Restricts characters to a conservative ASCII name set
///
/// # Errors
///
/// Returns [`ValidationError::InvalidNamespacePrefix`] if the prefix is not usable.
pub fn validate_namespace_prefix(prefix: &str) -> ValidationResult<()> {
    let invalid = || ValidationError::InvalidNamespacePrefix(prefix.to_string());

    let mut bytes = prefix.bytes();
    let Some(first) = bytes.next() else {
        return Err(invalid());
    };
    if !matches!(first, b'a'..=b'z' | b'A'..=b'Z' | b'_') {
        return Err(invalid());
    }
    if !bytes.all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'.' | b'-' | b'_'))
    {
        return Err(invalid());
    }

    if prefix == RESERVED_NAMESPACE_PREFIX || prefix.to_ascii_lowercase().starts_with("xml") {
        return Err(invalid());
    }

    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOCUMENT: &str = "<ClinicalDocument xmlns=\"urn:hl7-org:v3\"/>";

    fn metadata() -> Value {
        json!({
            "namespaces": {
                "n1": "urn:hl7-org:v3",
                "n2": "urn:hl7-org:v3/meta/voc",
                "ds": "http://www.w3.org/2000/09/xmldsig#",
                "xsi": "http://www.w3.org/2001/XMLSchema-instance"
            },
            "templateIdentifiers": {"documentTemplate": "2.16.840.1.113883.10.20.22.1.1"},
            "codeSystems": {
                "loinc": "2.16.840.1.113883.6.1",
                "snomed": "2.16.840.1.113883.6.96"
            }
        })
    }

    fn check(document: Option<&str>, metadata: Option<&Value>) -> ValidationResult<()> {
        validate(Some(&RenderRequest { document, metadata }))
    }

    #[test]
    fn test_validate_accepts_minimal_request() {
        let metadata = metadata();
        assert_eq!(check(Some(DOCUMENT), Some(&metadata)), Ok(()));
    }

    #[test]
    fn test_validate_missing_request() {
        assert_eq!(validate(None), Err(ValidationError::MissingRequest));
    }

    #[test]
    fn test_validate_document_checked_before_metadata() {
        assert_eq!(check(None, None), Err(ValidationError::EmptyDocument));
        assert_eq!(check(Some("  \n"), None), Err(ValidationError::EmptyDocument));
        assert_eq!(check(Some(DOCUMENT), None), Err(ValidationError::MissingMetadata));
    }

    #[test]
    fn test_validate_metadata_must_be_object() {
        let list = json!([metadata()]);
        assert_eq!(
            check(Some(DOCUMENT), Some(&list)),
            Err(ValidationError::MetadataNotObject("a list"))
        );
    }

    #[test]
    fn test_validate_presence_checks_run_in_order() {
        let empty = json!({});
        assert_eq!(
            check(Some(DOCUMENT), Some(&empty)),
            Err(ValidationError::MissingNamespaces)
        );

        let mut value = metadata();
        value.as_object_mut().unwrap().remove("templateIdentifiers");
        value.as_object_mut().unwrap().remove("codeSystems");
        assert_eq!(
            check(Some(DOCUMENT), Some(&value)),
            Err(ValidationError::MissingTemplateIdentifiers)
        );

        let mut value = metadata();
        value.as_object_mut().unwrap().remove("codeSystems");
        assert_eq!(
            check(Some(DOCUMENT), Some(&value)),
            Err(ValidationError::MissingCodeSystems)
        );
    }

    #[test]
    fn test_validate_reports_path_of_mistyped_field() {
        let mut value = metadata();
        value["sectionCodes"] = json!({"diagnoses": 11450});
        let err = check(Some(DOCUMENT), Some(&value)).unwrap_err();
        match err {
            ValidationError::InvalidMetadata { path, .. } => {
                assert_eq!(path, "sectionCodes.diagnoses")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_namespace_contents() {
        let mut value = metadata();
        value["namespaces"]["ds"] = json!("  ");
        assert_eq!(
            check(Some(DOCUMENT), Some(&value)),
            Err(ValidationError::EmptyNamespace("ds".into()))
        );

        let mut value = metadata();
        value["namespaces"]["xsl"] = json!("urn:other");
        assert_eq!(
            check(Some(DOCUMENT), Some(&value)),
            Err(ValidationError::InvalidNamespacePrefix("xsl".into()))
        );

        let value = json!({
            "namespaces": {"hl7": "urn:hl7-org:v3"},
            "templateIdentifiers": {"documentTemplate": "1.2.3"},
            "codeSystems": {"a": "1", "b": "2"}
        });
        assert_eq!(
            check(Some(DOCUMENT), Some(&value)),
            Err(ValidationError::MissingNamespace("n1".into()))
        );
    }

    #[test]
    fn test_validate_requires_every_standard_namespace() {
        for prefix in ["n2", "ds", "xsi"] {
            let mut value = metadata();
            value["namespaces"].as_object_mut().unwrap().remove(prefix);
            assert_eq!(
                check(Some(DOCUMENT), Some(&value)),
                Err(ValidationError::MissingNamespace(prefix.into()))
            );
        }
    }

    #[test]
    fn test_validate_document_template_and_code_systems() {
        let mut value = metadata();
        value["templateIdentifiers"] = json!({"sections": {"reasons": "1.2"}});
        assert_eq!(
            check(Some(DOCUMENT), Some(&value)),
            Err(ValidationError::MissingDocumentTemplate)
        );

        let mut value = metadata();
        value["codeSystems"] = json!({"loinc": "2.16.840.1.113883.6.1", "snomed": ""});
        assert_eq!(
            check(Some(DOCUMENT), Some(&value)),
            Err(ValidationError::InsufficientCodeSystems {
                found: 1,
                required: 2
            })
        );
    }

    #[test]
    fn test_validate_namespace_prefix_rules() {
        assert!(validate_namespace_prefix("n1").is_ok());
        assert!(validate_namespace_prefix("voc.ext-1").is_ok());
        assert!(validate_namespace_prefix("").is_err());
        assert!(validate_namespace_prefix("1n").is_err());
        assert!(validate_namespace_prefix("a:b").is_err());
        assert!(validate_namespace_prefix("xmlns").is_err());
    }

    #[test]
    fn test_validated_descriptor_returns_typed_metadata() {
        let metadata = metadata();
        let request = RenderRequest::new(DOCUMENT, &metadata);
        let descriptor = validated_descriptor(Some(&request)).unwrap();
        assert_eq!(
            descriptor.document_template(),
            Some("2.16.840.1.113883.10.20.22.1.1")
        );
        assert!(descriptor.section_codes.is_empty());
    }
}
