//! Owned, arena-backed XML tree.
//!
//! Both parsed inputs (clinical document and rule set) and the rendered output are held in an
//! [`XmlTree`]. Nodes are addressed by [`NodeId`]; node 0 is always the document root.
//!
//! Trees produced by the parser allocate nodes in document order, so comparing two `NodeId`s
//! from a parsed tree compares their document positions.

use std::borrow::Cow;

/// Namespace URI reserved for the `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Index of a node inside an [`XmlTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// An expanded element or attribute name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QName {
    /// Namespace URI, `None` for the null namespace.
    pub namespace: Option<String>,
    /// Prefix used in the source markup, kept for serialisation only.
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    /// A name in the null namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            prefix: None,
            local: local.into(),
        }
    }

    pub fn new(namespace: Option<String>, prefix: Option<String>, local: impl Into<String>) -> Self {
        Self {
            namespace,
            prefix,
            local: local.into(),
        }
    }

    /// Returns `true` if this name has the given namespace and local part.
    pub fn is(&self, namespace: Option<&str>, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == namespace
    }

    /// The name as written in markup (`prefix:local` or `local`).
    pub fn qualified(&self) -> Cow<'_, str> {
        match &self.prefix {
            Some(prefix) => Cow::Owned(format!("{}:{}", prefix, self.local)),
            None => Cow::Borrowed(&self.local),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

/// A namespace declaration made on an element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    /// `None` for the default namespace.
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    /// Declarations made on this element only; inherited ones live on ancestors.
    pub namespaces: Vec<Namespace>,
}

impl Element {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    /// Looks up an attribute value by expanded name.
    pub fn attribute(&self, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name.is(namespace, local))
            .map(|attr| attr.value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Element(Element),
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: Option<String> },
}

#[derive(Clone, Debug)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An XML document held as a flat arena of nodes.
#[derive(Clone, Debug)]
pub struct XmlTree {
    nodes: Vec<NodeData>,
}

impl Default for XmlTree {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlTree {
    /// Creates a tree containing only the document root.
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].children.is_empty()
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, NodeKind::Element(_))
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Child elements of `id`, skipping text, comments and processing instructions.
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |child| self.is_element(*child))
    }

    /// The outermost element, if the tree has one.
    pub fn document_element(&self) -> Option<NodeId> {
        self.child_elements(self.root()).next()
    }

    /// Every node below `id` in document order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Ancestors of `id`, nearest first, ending with the root.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            out.push(node);
            current = self.parent(node);
        }
        out
    }

    /// Concatenated text of all descendant text nodes (the XPath string-value).
    pub fn string_value(&self, id: NodeId) -> String {
        match &self.nodes[id.0].kind {
            NodeKind::Text(text) | NodeKind::Comment(text) => text.clone(),
            NodeKind::ProcessingInstruction { data, .. } => data.clone().unwrap_or_default(),
            NodeKind::Root | NodeKind::Element(_) => self
                .descendants(id)
                .into_iter()
                .filter_map(|node| self.text(node))
                .collect(),
        }
    }

    /// Looks up an attribute value on an element node.
    pub fn attribute(&self, id: NodeId, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.element(id)
            .and_then(|element| element.attribute(namespace, local))
    }

    /// Resolves a namespace prefix in scope at `id` (`None` asks for the default namespace).
    pub fn lookup_namespace(&self, id: NodeId, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE);
        }
        let mut current = Some(id);
        while let Some(node) = current {
            if let Some(element) = self.element(node) {
                if let Some(ns) = element
                    .namespaces
                    .iter()
                    .find(|ns| ns.prefix.as_deref() == prefix)
                {
                    return Some(ns.uri.as_str());
                }
            }
            current = self.parent(node);
        }
        None
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn append_element(&mut self, parent: NodeId, element: Element) -> NodeId {
        self.push(parent, NodeKind::Element(element))
    }

    /// Appends text under `parent`, merging with a trailing text sibling. Empty text is dropped.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Option<NodeId> {
        if text.is_empty() {
            return None;
        }
        if let Some(&last) = self.nodes[parent.0].children.last() {
            if let NodeKind::Text(existing) = &mut self.nodes[last.0].kind {
                existing.push_str(text);
                return Some(last);
            }
        }
        Some(self.push(parent, NodeKind::Text(text.to_string())))
    }

    pub fn append_comment(&mut self, parent: NodeId, text: &str) -> NodeId {
        self.push(parent, NodeKind::Comment(text.to_string()))
    }

    pub fn append_processing_instruction(
        &mut self,
        parent: NodeId,
        target: &str,
        data: Option<&str>,
    ) -> NodeId {
        self.push(
            parent,
            NodeKind::ProcessingInstruction {
                target: target.to_string(),
                data: data.map(str::to_string),
            },
        )
    }

    /// Sets an attribute on an element, replacing an existing value with the same name.
    ///
    /// Returns `false` if `id` is not an element.
    pub fn set_attribute(&mut self, id: NodeId, name: QName, value: impl Into<String>) -> bool {
        let NodeKind::Element(element) = &mut self.nodes[id.0].kind else {
            return false;
        };
        let value = value.into();
        match element
            .attributes
            .iter_mut()
            .find(|attr| attr.name.namespace == name.namespace && attr.name.local == name.local)
        {
            Some(existing) => existing.value = value,
            None => element.attributes.push(Attribute { name, value }),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (XmlTree, NodeId, NodeId) {
        let mut tree = XmlTree::new();
        let root = tree.root();
        let mut doc = Element::new(QName::new(
            Some("urn:hl7-org:v3".into()),
            None,
            "ClinicalDocument",
        ));
        doc.namespaces.push(Namespace {
            prefix: None,
            uri: "urn:hl7-org:v3".into(),
        });
        let doc = tree.append_element(root, doc);
        let title = tree.append_element(doc, Element::new(QName::local("title")));
        tree.append_text(title, "Informe ");
        tree.append_text(title, "de alta");
        (tree, doc, title)
    }

    #[test]
    fn test_append_text_merges_adjacent_text() {
        let (tree, _, title) = sample();
        assert_eq!(tree.children(title).len(), 1);
        assert_eq!(tree.string_value(title), "Informe de alta");
    }

    #[test]
    fn test_document_element_and_descendants() {
        let (tree, doc, title) = sample();
        assert_eq!(tree.document_element(), Some(doc));
        let descendants = tree.descendants(tree.root());
        assert_eq!(descendants[0], doc);
        assert_eq!(descendants[1], title);
        assert_eq!(tree.ancestors(title), vec![doc, tree.root()]);
    }

    #[test]
    fn test_lookup_namespace_walks_ancestors() {
        let (tree, _, title) = sample();
        assert_eq!(tree.lookup_namespace(title, None), Some("urn:hl7-org:v3"));
        assert_eq!(tree.lookup_namespace(title, Some("xml")), Some(XML_NAMESPACE));
        assert_eq!(tree.lookup_namespace(title, Some("n1")), None);
    }

    #[test]
    fn test_set_attribute_replaces_existing_value() {
        let (mut tree, doc, title) = sample();
        assert!(tree.set_attribute(doc, QName::local("class"), "a"));
        assert!(tree.set_attribute(doc, QName::local("class"), "b"));
        assert_eq!(tree.attribute(doc, None, "class"), Some("b"));
        let text = tree.children(title)[0];
        assert!(!tree.set_attribute(text, QName::local("class"), "c"));
    }
}
