//! Pre-parse cleaning and strict parsing into an [`XmlTree`].
//!
//! Parsing is delegated to `roxmltree`, which enforces well-formedness and resolves namespaces.
//! The borrowed `roxmltree` document is then copied into an owned tree so parsed documents can
//! outlive their input text.

use crate::tree::{Attribute, Element, Namespace, NodeId, QName, XmlTree};
use crate::{DocumentOrigin, ParseError, ParsedDocument, TextPosition};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;

/// Any processing instruction, capturing its target.
static PROCESSING_INSTRUCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<\?([A-Za-z_][A-Za-z0-9_.:\-]*)(.*?)\?>")
        .unwrap_or_else(|e| panic!("processing instruction pattern is invalid: {e}"))
});

/// Strips processing instructions that carry no content from a raw clinical payload.
///
/// Clinical documents are frequently exported with an `<?xml-stylesheet?>` association pointing
/// at a viewer stylesheet. The rule set is supplied programmatically, so such instructions are
/// meaningless here. The XML declaration is kept; a leading byte-order mark is removed.
///
/// # Arguments
///
/// * `payload` - Raw document text as received from the retrieval collaborator.
///
/// # Returns
///
/// The cleaned text, borrowed when nothing had to be removed.
pub fn clean_payload(payload: &str) -> Cow<'_, str> {
    let payload = payload.trim_start_matches('\u{feff}');
    if !payload.contains("<?") {
        return Cow::Borrowed(payload);
    }

    PROCESSING_INSTRUCTION.replace_all(payload, |caps: &Captures<'_>| {
        if &caps[1] == "xml" {
            caps[0].to_string()
        } else {
            tracing::debug!(target_name = &caps[1], "stripping processing instruction");
            String::new()
        }
    })
}

/// Parses markup into a [`ParsedDocument`] using strict well-formedness rules.
///
/// No semantic validation and no sanitisation happen here.
///
/// # Arguments
///
/// * `text` - Markup to parse.
/// * `origin` - Which artifact the text is, carried into any diagnostic.
///
/// # Errors
///
/// Returns [`ParseError`] naming `origin` if the text is not well-formed XML (unbalanced tags,
/// undeclared prefixes, DTDs, invalid characters and so on).
pub fn parse(text: &str, origin: DocumentOrigin) -> Result<ParsedDocument, ParseError> {
    let document = roxmltree::Document::parse(text).map_err(|e| {
        let pos = e.pos();
        ParseError {
            origin,
            message: e.to_string(),
            position: Some(TextPosition {
                row: pos.row,
                col: pos.col,
            }),
        }
    })?;

    let mut tree = XmlTree::new();
    let root = tree.root();

    // Iterative copy: clinical documents can nest deeply, so avoid native recursion.
    let mut stack: Vec<(roxmltree::Node<'_, '_>, NodeId)> = document
        .root()
        .children()
        .rev()
        .map(|child| (child, root))
        .collect();

    while let Some((node, parent)) = stack.pop() {
        match node.node_type() {
            roxmltree::NodeType::Element => {
                let id = tree.append_element(parent, copy_element(node));
                stack.extend(node.children().rev().map(|child| (child, id)));
            }
            roxmltree::NodeType::Text => {
                if let Some(text) = node.text() {
                    tree.append_text(parent, text);
                }
            }
            roxmltree::NodeType::Comment => {
                tree.append_comment(parent, node.text().unwrap_or_default());
            }
            roxmltree::NodeType::PI => {
                if let Some(pi) = node.pi() {
                    tree.append_processing_instruction(parent, pi.target, pi.value);
                }
            }
            roxmltree::NodeType::Root => {}
        }
    }

    Ok(ParsedDocument::new(origin, tree))
}

fn copy_element(node: roxmltree::Node<'_, '_>) -> Element {
    let tag = node.tag_name();
    let namespace = tag.namespace().map(str::to_string);
    let prefix = tag
        .namespace()
        .and_then(|uri| node.lookup_prefix(uri))
        .map(str::to_string);

    let attributes = node
        .attributes()
        .map(|attr| Attribute {
            name: QName::new(
                attr.namespace().map(str::to_string),
                attr.namespace()
                    .and_then(|uri| node.lookup_prefix(uri))
                    .map(str::to_string),
                attr.name(),
            ),
            value: attr.value().to_string(),
        })
        .collect();

    // Keep only declarations not already in scope on the parent element. The predefined
    // `xml` prefix is resolved by the tree itself.
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|parent| parent.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    let namespaces = node
        .namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .filter(|ns| !inherited.contains(&(ns.name(), ns.uri())))
        .map(|ns| Namespace {
            prefix: ns.name().map(str::to_string),
            uri: ns.uri().to_string(),
        })
        .collect();

    Element {
        name: QName::new(namespace, prefix, tag.name()),
        attributes,
        namespaces,
    }
}
