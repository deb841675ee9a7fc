//! HTML serialisation of a rendered result tree.
//!
//! The result tree must be rooted at exactly one element. Serialisation is a straight
//! structural walk written through `quick-xml`, with two HTML adjustments: void elements are
//! self-closed and every other empty element gets an explicit end tag, and the text of
//! `style` elements is written unescaped.

use crate::tree::{NodeId, NodeKind, XmlTree};
use crate::SerializeError;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

/// HTML elements that never have content and are written as `<name/>`.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose text content is raw in HTML.
const RAW_TEXT_ELEMENTS: &[&str] = &["style"];

enum Step {
    Open(NodeId),
    Close(String),
}

/// Serialises the single root element of `tree` to a markup string.
///
/// # Errors
///
/// - [`SerializeError::MissingRoot`] if the tree holds no element at the top level.
/// - [`SerializeError::InvalidRoot`] if the top level holds more than one element or
///   non-whitespace text.
/// - [`SerializeError::Write`] if the writer fails.
pub fn serialize(tree: &XmlTree) -> Result<String, SerializeError> {
    let root = root_element(tree)?;
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut stack = vec![Step::Open(root)];
    while let Some(step) = stack.pop() {
        match step {
            Step::Close(name) => write(&mut writer, Event::End(BytesEnd::new(name)))?,
            Step::Open(id) => match tree.kind(id) {
                NodeKind::Element(element) => {
                    let name = element.name.qualified().into_owned();
                    let mut start = BytesStart::new(name.clone());
                    for attr in &element.attributes {
                        let attr_name = attr.name.qualified();
                        start.push_attribute((attr_name.as_ref(), attr.value.as_str()));
                    }

                    let children = tree.children(id);
                    if children.is_empty() && VOID_ELEMENTS.contains(&element.name.local.as_str())
                    {
                        write(&mut writer, Event::Empty(start))?;
                        continue;
                    }

                    write(&mut writer, Event::Start(start))?;
                    stack.push(Step::Close(name));
                    stack.extend(children.iter().rev().map(|child| Step::Open(*child)));
                }
                NodeKind::Text(text) => {
                    let event = if is_raw_text_parent(tree, id) && !text.contains("</") {
                        BytesText::from_escaped(text.as_str())
                    } else {
                        BytesText::new(text)
                    };
                    write(&mut writer, Event::Text(event))?;
                }
                NodeKind::Comment(text) => {
                    let safe = text.replace("--", "- -");
                    write(&mut writer, Event::Comment(BytesText::from_escaped(safe)))?;
                }
                NodeKind::ProcessingInstruction { .. } | NodeKind::Root => {}
            },
        }
    }

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| SerializeError::Write(e.to_string()))
}

/// Finds the one element that roots the result, ignoring whitespace-only text around it.
fn root_element(tree: &XmlTree) -> Result<NodeId, SerializeError> {
    let mut root = None;
    for &child in tree.children(tree.root()) {
        match tree.kind(child) {
            NodeKind::Element(_) => {
                if root.is_some() {
                    return Err(SerializeError::InvalidRoot(
                        "more than one top-level element".into(),
                    ));
                }
                root = Some(child);
            }
            NodeKind::Text(text) if !text.trim().is_empty() => {
                return Err(SerializeError::InvalidRoot(
                    "text outside the root element".into(),
                ));
            }
            _ => {}
        }
    }
    root.ok_or(SerializeError::MissingRoot)
}

fn is_raw_text_parent(tree: &XmlTree, id: NodeId) -> bool {
    tree.parent(id)
        .and_then(|parent| tree.element(parent))
        .is_some_and(|element| RAW_TEXT_ELEMENTS.contains(&element.name.local.as_str()))
}

fn write(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<(), SerializeError> {
    writer
        .write_event(event)
        .map_err(|e| SerializeError::Write(e.to_string()))
}
