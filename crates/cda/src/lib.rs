//! CDA wire/boundary support.
//!
//! This crate is responsible for translating between markup text and the owned XML tree that
//! the rendering engine works on:
//! - cleaning raw clinical payloads before parsing (stray processing instructions, BOM)
//! - strict well-formedness parsing of both the clinical document and the assembled rule set
//! - serialising a rendered result tree back to an HTML string
//!
//! Rendering semantics live in `cdr-core`. This crate handles formats only.

pub mod parser;
pub mod serializer;
pub mod tree;

pub use cdr_types::DocumentOrigin;
pub use parser::{clean_payload, parse};
pub use serializer::serialize;
pub use tree::{Attribute, Element, Namespace, NodeId, NodeKind, QName, XmlTree};

/// Line/column position of a parse failure, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPosition {
    pub row: u32,
    pub col: u32,
}

impl std::fmt::Display for TextPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

/// Markup that could not be parsed into a tree.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("failed to parse {origin}: {message}")]
pub struct ParseError {
    /// Which artifact failed to parse.
    pub origin: DocumentOrigin,
    /// Parser diagnostic.
    pub message: String,
    /// Where the failure was detected, when the parser reports it.
    pub position: Option<TextPosition>,
}

/// Errors raised while serialising a result tree.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("result tree has no root element")]
    MissingRoot,

    #[error("result tree root is not a single element: {0}")]
    InvalidRoot(String),

    #[error("failed to write markup: {0}")]
    Write(String),
}

/// A parsed tree tagged with the artifact it came from.
///
/// Each `ParsedDocument` is owned by the pipeline invocation that created it.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    origin: DocumentOrigin,
    tree: XmlTree,
}

impl ParsedDocument {
    pub fn new(origin: DocumentOrigin, tree: XmlTree) -> Self {
        Self { origin, tree }
    }

    pub fn origin(&self) -> DocumentOrigin {
        self.origin
    }

    pub fn tree(&self) -> &XmlTree {
        &self.tree
    }

    pub fn into_tree(self) -> XmlTree {
        self.tree
    }
}
