//! Constants used throughout the renderer core.
//!
//! Namespace URIs, placeholder names and fixed user-facing texts live here so rule builders,
//! the validator and tests agree on them.

/// Namespace of rule-set instructions.
pub const XSL_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// Prefix the rule builders use for the primary clinical document namespace.
pub const PRIMARY_NAMESPACE_PREFIX: &str = "n1";

/// Prefixes every descriptor must bind: the primary document, vocabulary, signed-envelope
/// and schema-instance namespaces.
pub const REQUIRED_NAMESPACE_PREFIXES: [&str; 4] =
    [PRIMARY_NAMESPACE_PREFIX, "n2", "ds", "xsi"];

/// Prefix reserved for rule-set instructions; metadata may not rebind it.
pub const RESERVED_NAMESPACE_PREFIX: &str = "xsl";

/// Minimum number of terminology systems a descriptor must declare.
pub const MIN_CODE_SYSTEMS: usize = 2;

/// Default recursion guard for template application.
pub const DEFAULT_MAX_TEMPLATE_DEPTH: usize = 64;

/// Default per-document deadline used by the batch runner, in milliseconds.
pub const DEFAULT_RENDER_TIMEOUT_MS: u64 = 10_000;

/// Placeholder names in the rule-set skeleton, in substitution order.
pub const PLACEHOLDER_NAMESPACES: &str = "namespaces";
pub const PLACEHOLDER_STYLES: &str = "styles";
pub const PLACEHOLDER_HELPERS: &str = "helpers";
pub const PLACEHOLDER_HEADERS: &str = "headers";
pub const PLACEHOLDER_SECTIONS: &str = "sections";

/// Shown instead of an external reference that names a script URI scheme.
pub const SCRIPT_REFERENCE_WARNING: &str =
    "Advertencia: se bloqueó una referencia a JavaScript en el contenido del documento.";

/// Shown instead of an external reference that the character scrub altered.
pub const MALICIOUS_CONTENT_WARNING: &str =
    "Advertencia: el contenido del documento es potencialmente malicioso y no se mostrará.";

/// Shown when the document does not declare the configured document template.
pub const TEMPLATE_MISMATCH_NOTICE: &str =
    "El documento no declara la plantilla esperada para este tipo de documento.";

/// Characters replaced with `*` by the reference scrub: quotes, braces, semicolon, smart quotes.
pub const SCRUBBED_CHARACTERS: &str = "\"'{};\u{201c}\u{201d}\u{2018}\u{2019}";
