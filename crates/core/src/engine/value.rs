//! Expression values and node references.

use cda::{NodeId, XmlTree};

/// A node visited by an expression: a tree node, or one attribute of an element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Node(NodeId),
    Attribute(NodeId, usize),
}

impl NodeRef {
    /// Sort key in document order. Attributes follow their element and precede its children.
    pub fn order_key(&self) -> (usize, usize) {
        match self {
            NodeRef::Node(id) => (id.index(), 0),
            NodeRef::Attribute(id, index) => (id.index(), index + 1),
        }
    }

    /// The string-value of this node.
    pub fn string_value(&self, tree: &XmlTree) -> String {
        match self {
            NodeRef::Node(id) => tree.string_value(*id),
            NodeRef::Attribute(id, index) => tree
                .element(*id)
                .and_then(|element| element.attributes.get(*index))
                .map(|attr| attr.value.clone())
                .unwrap_or_default(),
        }
    }
}

/// Sorts a node set into document order and removes duplicates.
pub fn normalise_node_set(nodes: &mut Vec<NodeRef>) {
    nodes.sort_by_key(NodeRef::order_key);
    nodes.dedup();
}

/// Result of evaluating an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    NodeSet(Vec<NodeRef>),
    String(String),
    Number(f64),
    Boolean(bool),
}

impl Value {
    pub fn empty() -> Self {
        Value::NodeSet(Vec::new())
    }

    /// String conversion: a node set converts through its first node in document order.
    pub fn to_string_value(&self, tree: &XmlTree) -> String {
        match self {
            Value::NodeSet(nodes) => nodes
                .first()
                .map(|node| node.string_value(tree))
                .unwrap_or_default(),
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => b.to_string(),
        }
    }

    pub fn to_number(&self, tree: &XmlTree) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::String(_) | Value::NodeSet(_) => parse_number(&self.to_string_value(tree)),
        }
    }

    pub fn to_boolean(&self) -> bool {
        match self {
            Value::NodeSet(nodes) => !nodes.is_empty(),
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
        }
    }
}

/// Number conversion of a string: optional minus, digits and at most one decimal point,
/// surrounded by optional whitespace. Anything else is NaN.
pub fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let valid = !digits.is_empty()
        && digits != "."
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.matches('.').count() <= 1;
    if !valid {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Formats a number the way string conversion does: integers without a decimal point.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == n.trunc() && n.abs() < 1e15 {
        // Also turns negative zero into "0".
        return format!("{}", n as i64);
    }
    format!("{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_accepts_plain_decimals_only() {
        assert_eq!(parse_number(" 23 "), 23.0);
        assert_eq!(parse_number("05"), 5.0);
        assert_eq!(parse_number("-1.5"), -1.5);
        assert!(parse_number("1e3").is_nan());
        assert!(parse_number("+1").is_nan());
        assert!(parse_number("").is_nan());
        assert!(parse_number(".").is_nan());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_boolean_conversion() {
        assert!(!Value::empty().to_boolean());
        assert!(!Value::String(String::new()).to_boolean());
        assert!(Value::String("0".into()).to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());
        assert!(Value::Number(3.0).to_boolean());
    }
}
