//! Expression evaluation against a parsed document.

use super::expr::{Axis, CompareOp, Expr, Function, NodeTest, PathExpr, PathStart, Step};
use super::value::{normalise_node_set, parse_number, NodeRef, Value};
use crate::{TransformError, TransformResult};
use cda::{NodeKind, XmlTree};

/// Looks up variables and parameters visible to an expression.
pub trait VariableScope {
    fn variable(&self, name: &str) -> Option<&Value>;
}

/// A scope with no bindings.
pub struct NoVariables;

impl VariableScope for NoVariables {
    fn variable(&self, _name: &str) -> Option<&Value> {
        None
    }
}

/// The dynamic context of one evaluation.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub tree: &'a XmlTree,
    pub node: NodeRef,
    /// 1-based position of `node` in the current node list.
    pub position: usize,
    pub size: usize,
    pub variables: &'a dyn VariableScope,
}

impl<'a> EvalContext<'a> {
    pub fn new(tree: &'a XmlTree, node: NodeRef, variables: &'a dyn VariableScope) -> Self {
        Self {
            tree,
            node,
            position: 1,
            size: 1,
            variables,
        }
    }

    fn at(&self, node: NodeRef, position: usize, size: usize) -> Self {
        Self {
            node,
            position,
            size,
            ..*self
        }
    }
}

/// Evaluates `expr` in `ctx`.
///
/// # Errors
///
/// Returns [`TransformError::TransformFailed`] for undefined variables or when a node set is
/// required and another value is supplied.
pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>) -> TransformResult<Value> {
    match expr {
        Expr::Or(left, right) => Ok(Value::Boolean(
            evaluate(left, ctx)?.to_boolean() || evaluate(right, ctx)?.to_boolean(),
        )),
        Expr::And(left, right) => Ok(Value::Boolean(
            evaluate(left, ctx)?.to_boolean() && evaluate(right, ctx)?.to_boolean(),
        )),
        Expr::Compare(op, left, right) => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            Ok(Value::Boolean(compare(*op, &left, &right, ctx.tree)))
        }
        Expr::Add(left, right) => Ok(Value::Number(
            number(left, ctx)? + number(right, ctx)?,
        )),
        Expr::Subtract(left, right) => Ok(Value::Number(
            number(left, ctx)? - number(right, ctx)?,
        )),
        Expr::Negate(inner) => Ok(Value::Number(-number(inner, ctx)?)),
        Expr::Union(left, right) => {
            let mut nodes = node_set(evaluate(left, ctx)?, "union")?;
            nodes.extend(node_set(evaluate(right, ctx)?, "union")?);
            normalise_node_set(&mut nodes);
            Ok(Value::NodeSet(nodes))
        }
        Expr::Literal(text) => Ok(Value::String(text.clone())),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Variable(name) => ctx
            .variables
            .variable(name)
            .cloned()
            .ok_or_else(|| TransformError::failed(format!("undefined variable `${name}`"))),
        Expr::Function(function, args) => call(*function, args, ctx),
        Expr::Path(path) => evaluate_path(path, ctx).map(Value::NodeSet),
    }
}

fn number(expr: &Expr, ctx: &EvalContext<'_>) -> TransformResult<f64> {
    Ok(evaluate(expr, ctx)?.to_number(ctx.tree))
}

fn string(expr: &Expr, ctx: &EvalContext<'_>) -> TransformResult<String> {
    Ok(evaluate(expr, ctx)?.to_string_value(ctx.tree))
}

fn node_set(value: Value, what: &str) -> TransformResult<Vec<NodeRef>> {
    match value {
        Value::NodeSet(nodes) => Ok(nodes),
        other => Err(TransformError::failed(format!(
            "{what} requires a node set, found {other:?}"
        ))),
    }
}

/// Evaluates an expression that must produce a node set.
pub fn evaluate_node_set(expr: &Expr, ctx: &EvalContext<'_>) -> TransformResult<Vec<NodeRef>> {
    node_set(evaluate(expr, ctx)?, "selection")
}

fn evaluate_path(path: &PathExpr, ctx: &EvalContext<'_>) -> TransformResult<Vec<NodeRef>> {
    let mut current = match &path.start {
        PathStart::Context => vec![ctx.node],
        PathStart::Root => vec![NodeRef::Node(ctx.tree.root())],
        PathStart::Filter(primary, predicates) => {
            let mut nodes = node_set(evaluate(primary, ctx)?, "path step")?;
            normalise_node_set(&mut nodes);
            for predicate in predicates {
                nodes = filter(nodes, predicate, ctx)?;
            }
            nodes
        }
    };

    for step in &path.steps {
        let mut next = Vec::new();
        for node in &current {
            let mut candidates = axis_nodes(ctx.tree, *node, step);
            for predicate in &step.predicates {
                candidates = filter(candidates, predicate, ctx)?;
            }
            next.extend(candidates);
        }
        normalise_node_set(&mut next);
        current = next;
    }
    Ok(current)
}

/// Keeps the nodes for which `predicate` holds; a numeric predicate selects by position.
fn filter(
    nodes: Vec<NodeRef>,
    predicate: &Expr,
    ctx: &EvalContext<'_>,
) -> TransformResult<Vec<NodeRef>> {
    let size = nodes.len();
    let mut kept = Vec::with_capacity(size);
    for (index, node) in nodes.into_iter().enumerate() {
        let inner = ctx.at(node, index + 1, size);
        let keep = match evaluate(predicate, &inner)? {
            Value::Number(n) => n == (index + 1) as f64,
            other => other.to_boolean(),
        };
        if keep {
            kept.push(node);
        }
    }
    Ok(kept)
}

/// Nodes on `step.axis` from `node` that pass `step.test`, in document order.
pub fn axis_nodes(tree: &XmlTree, node: NodeRef, step: &Step) -> Vec<NodeRef> {
    match (step.axis, node) {
        (Axis::SelfNode, _) => {
            if node_test_matches(tree, node, &step.test, step.axis) {
                vec![node]
            } else {
                Vec::new()
            }
        }
        (Axis::Parent, NodeRef::Node(id)) => tree
            .parent(id)
            .map(NodeRef::Node)
            .filter(|parent| node_test_matches(tree, *parent, &step.test, step.axis))
            .into_iter()
            .collect(),
        (Axis::Parent, NodeRef::Attribute(owner, _)) => {
            let parent = NodeRef::Node(owner);
            if node_test_matches(tree, parent, &step.test, step.axis) {
                vec![parent]
            } else {
                Vec::new()
            }
        }
        (Axis::Child, NodeRef::Node(id)) => tree
            .children(id)
            .iter()
            .map(|child| NodeRef::Node(*child))
            .filter(|child| node_test_matches(tree, *child, &step.test, step.axis))
            .collect(),
        (Axis::Attribute, NodeRef::Node(id)) => match tree.element(id) {
            Some(element) => (0..element.attributes.len())
                .map(|index| NodeRef::Attribute(id, index))
                .filter(|attr| node_test_matches(tree, *attr, &step.test, step.axis))
                .collect(),
            None => Vec::new(),
        },
        (Axis::DescendantOrSelf, NodeRef::Node(id)) => std::iter::once(id)
            .chain(tree.descendants(id))
            .map(NodeRef::Node)
            .filter(|n| node_test_matches(tree, *n, &step.test, step.axis))
            .collect(),
        (Axis::DescendantOrSelf, NodeRef::Attribute(..)) => {
            if node_test_matches(tree, node, &step.test, step.axis) {
                vec![node]
            } else {
                Vec::new()
            }
        }
        (Axis::Child | Axis::Attribute, NodeRef::Attribute(..)) => Vec::new(),
    }
}

/// Whether `node` passes `test` when reached along `axis`.
pub fn node_test_matches(tree: &XmlTree, node: NodeRef, test: &NodeTest, axis: Axis) -> bool {
    match node {
        NodeRef::Attribute(id, index) => {
            let Some(attr) = tree.element(id).and_then(|e| e.attributes.get(index)) else {
                return false;
            };
            // Name tests only see attributes along the attribute axis.
            match test {
                NodeTest::Node => true,
                NodeTest::Text => false,
                _ if axis != Axis::Attribute => false,
                NodeTest::AnyName => true,
                NodeTest::NamespaceWildcard(uri) => attr.name.namespace.as_deref() == Some(uri),
                NodeTest::Name { namespace, local } => {
                    attr.name.is(namespace.as_deref(), local)
                }
            }
        }
        NodeRef::Node(id) => match (test, tree.kind(id)) {
            (NodeTest::Node, _) => true,
            (NodeTest::Text, NodeKind::Text(_)) => true,
            (NodeTest::AnyName, NodeKind::Element(_)) => axis != Axis::Attribute,
            (NodeTest::NamespaceWildcard(uri), NodeKind::Element(element)) => {
                axis != Axis::Attribute && element.name.namespace.as_deref() == Some(uri)
            }
            (NodeTest::Name { namespace, local }, NodeKind::Element(element)) => {
                axis != Axis::Attribute && element.name.is(namespace.as_deref(), local)
            }
            _ => false,
        },
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value, tree: &XmlTree) -> bool {
    match (left, right) {
        (Value::NodeSet(a), Value::NodeSet(b)) => {
            let b_strings: Vec<String> = b.iter().map(|n| n.string_value(tree)).collect();
            a.iter().any(|n| {
                let a_string = n.string_value(tree);
                b_strings
                    .iter()
                    .any(|b_string| compare_atoms(op, &Atom::Str(&a_string), &Atom::Str(b_string)))
            })
        }
        (Value::NodeSet(nodes), other) => compare_set(op, nodes, other, tree, false),
        (other, Value::NodeSet(nodes)) => compare_set(op, nodes, other, tree, true),
        _ => compare_atoms(op, &Atom::from_value(left, tree), &Atom::from_value(right, tree)),
    }
}

/// Compares each node of a set against a non-set value; `swapped` when the set was on the
/// right-hand side.
fn compare_set(op: CompareOp, nodes: &[NodeRef], other: &Value, tree: &XmlTree, swapped: bool) -> bool {
    if let Value::Boolean(b) = other {
        let set = Atom::Bool(!nodes.is_empty());
        let other = Atom::Bool(*b);
        return if swapped {
            compare_atoms(op, &other, &set)
        } else {
            compare_atoms(op, &set, &other)
        };
    }
    let other_atom = Atom::from_value(other, tree);
    nodes.iter().any(|node| {
        let text = node.string_value(tree);
        let node_atom = match other {
            Value::Number(_) => Atom::Num(parse_number(&text)),
            _ => Atom::Str(&text),
        };
        if swapped {
            compare_atoms(op, &other_atom, &node_atom)
        } else {
            compare_atoms(op, &node_atom, &other_atom)
        }
    })
}

enum Atom<'a> {
    Str(&'a str),
    Owned(String),
    Num(f64),
    Bool(bool),
}

impl<'a> Atom<'a> {
    fn from_value(value: &'a Value, tree: &XmlTree) -> Self {
        match value {
            Value::String(s) => Atom::Str(s),
            Value::Number(n) => Atom::Num(*n),
            Value::Boolean(b) => Atom::Bool(*b),
            Value::NodeSet(_) => Atom::Owned(value.to_string_value(tree)),
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            Atom::Str(s) => !s.is_empty(),
            Atom::Owned(s) => !s.is_empty(),
            Atom::Num(n) => *n != 0.0 && !n.is_nan(),
            Atom::Bool(b) => *b,
        }
    }

    fn as_num(&self) -> f64 {
        match self {
            Atom::Str(s) => parse_number(s),
            Atom::Owned(s) => parse_number(s),
            Atom::Num(n) => *n,
            Atom::Bool(b) => f64::from(u8::from(*b)),
        }
    }

    fn as_str(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Atom::Str(s) => std::borrow::Cow::Borrowed(s),
            Atom::Owned(s) => std::borrow::Cow::Borrowed(s.as_str()),
            Atom::Num(n) => std::borrow::Cow::Owned(super::value::format_number(*n)),
            Atom::Bool(b) => std::borrow::Cow::Owned(b.to_string()),
        }
    }
}

fn compare_atoms(op: CompareOp, left: &Atom<'_>, right: &Atom<'_>) -> bool {
    match op {
        CompareOp::Eq | CompareOp::NotEq => {
            let equal = if matches!(left, Atom::Bool(_)) || matches!(right, Atom::Bool(_)) {
                left.as_bool() == right.as_bool()
            } else if matches!(left, Atom::Num(_)) || matches!(right, Atom::Num(_)) {
                left.as_num() == right.as_num()
            } else {
                left.as_str() == right.as_str()
            };
            if op == CompareOp::Eq {
                equal
            } else {
                !equal
            }
        }
        CompareOp::Lt => left.as_num() < right.as_num(),
        CompareOp::Le => left.as_num() <= right.as_num(),
        CompareOp::Gt => left.as_num() > right.as_num(),
        CompareOp::Ge => left.as_num() >= right.as_num(),
    }
}

fn call(function: Function, args: &[Expr], ctx: &EvalContext<'_>) -> TransformResult<Value> {
    let context_string = || ctx.node.string_value(ctx.tree);
    let arg_string = |index: usize| -> TransformResult<String> {
        match args.get(index) {
            Some(arg) => string(arg, ctx),
            None => Ok(context_string()),
        }
    };

    let value = match function {
        Function::Concat => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&string(arg, ctx)?);
            }
            Value::String(out)
        }
        Function::Contains => Value::Boolean(arg_string(0)?.contains(arg_string(1)?.as_str())),
        Function::StartsWith => {
            Value::Boolean(arg_string(0)?.starts_with(arg_string(1)?.as_str()))
        }
        Function::Substring => {
            let text = arg_string(0)?;
            let start = number(&args[1], ctx)?;
            let length = match args.get(2) {
                Some(arg) => Some(number(arg, ctx)?),
                None => None,
            };
            Value::String(substring(&text, start, length))
        }
        Function::SubstringBefore => {
            let text = arg_string(0)?;
            let needle = arg_string(1)?;
            Value::String(
                text.find(needle.as_str())
                    .map(|at| text[..at].to_string())
                    .unwrap_or_default(),
            )
        }
        Function::SubstringAfter => {
            let text = arg_string(0)?;
            let needle = arg_string(1)?;
            Value::String(
                text.find(needle.as_str())
                    .map(|at| text[at + needle.len()..].to_string())
                    .unwrap_or_default(),
            )
        }
        Function::StringLength => Value::Number(arg_string(0)?.chars().count() as f64),
        Function::NormalizeSpace => Value::String(
            arg_string(0)?
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        ),
        Function::Translate => Value::String(translate(
            &arg_string(0)?,
            &arg_string(1)?,
            &arg_string(2)?,
        )),
        Function::Not => Value::Boolean(!evaluate(&args[0], ctx)?.to_boolean()),
        Function::String => Value::String(arg_string(0)?),
        Function::Number => match args.first() {
            Some(arg) => Value::Number(number(arg, ctx)?),
            None => Value::Number(parse_number(&context_string())),
        },
        Function::Boolean => Value::Boolean(evaluate(&args[0], ctx)?.to_boolean()),
        Function::Count => {
            Value::Number(node_set(evaluate(&args[0], ctx)?, "count()")?.len() as f64)
        }
        Function::Position => Value::Number(ctx.position as f64),
        Function::Last => Value::Number(ctx.size as f64),
        Function::True => Value::Boolean(true),
        Function::False => Value::Boolean(false),
        Function::LocalName => {
            let node = match args.first() {
                Some(arg) => node_set(evaluate(arg, ctx)?, "local-name()")?.first().copied(),
                None => Some(ctx.node),
            };
            Value::String(node.map(|n| local_name(ctx.tree, n)).unwrap_or_default())
        }
    };
    Ok(value)
}

fn local_name(tree: &XmlTree, node: NodeRef) -> String {
    match node {
        NodeRef::Node(id) => tree
            .element(id)
            .map(|e| e.name.local.clone())
            .unwrap_or_default(),
        NodeRef::Attribute(id, index) => tree
            .element(id)
            .and_then(|e| e.attributes.get(index))
            .map(|a| a.name.local.clone())
            .unwrap_or_default(),
    }
}

/// Character-based substring with 1-based, rounded positions.
fn substring(text: &str, start: f64, length: Option<f64>) -> String {
    let first = start.round();
    let end = length.map(|len| first + len.round());
    text.chars()
        .enumerate()
        .filter(|(index, _)| {
            let position = (*index + 1) as f64;
            position >= first && end.is_none_or(|end| position < end)
        })
        .map(|(_, c)| c)
        .collect()
}

/// Replaces each character found in `from` by the character at the same index in `to`, or
/// drops it when `to` is shorter.
fn translate(text: &str, from: &str, to: &str) -> String {
    let from: Vec<char> = from.chars().collect();
    let to: Vec<char> = to.chars().collect();
    text.chars()
        .filter_map(|c| match from.iter().position(|f| *f == c) {
            Some(index) => to.get(index).copied(),
            None => Some(c),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::expr::parse_expression;
    use super::*;
    use cda::{parse, DocumentOrigin};

    const DOC: &str = r#"<ClinicalDocument xmlns="urn:hl7-org:v3">
<id root="2.16.724" extension="A-1"/>
<section><code code="11450-4"/><title>Problemas</title></section>
<section><code code="10154-3"/><title>Motivo</title></section>
</ClinicalDocument>"#;

    struct Vars(Vec<(String, Value)>);

    impl VariableScope for Vars {
        fn variable(&self, name: &str) -> Option<&Value> {
            self.0.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v)
        }
    }

    fn eval_with(expr: &str, vars: &Vars) -> Value {
        let parsed = parse(DOC, DocumentOrigin::SourceDocument).unwrap();
        let tree = parsed.tree();
        let doc = tree.document_element().unwrap();
        let resolver = |prefix: &str| (prefix == "n1").then(|| "urn:hl7-org:v3".to_string());
        let expr = parse_expression(expr, &resolver).unwrap();
        let ctx = EvalContext::new(tree, NodeRef::Node(doc), vars);
        match evaluate(&expr, &ctx).unwrap() {
            Value::NodeSet(nodes) => Value::String(
                nodes
                    .iter()
                    .map(|n| n.string_value(tree))
                    .collect::<Vec<_>>()
                    .join("|"),
            ),
            other => other,
        }
    }

    fn eval(expr: &str) -> Value {
        eval_with(expr, &Vars(Vec::new()))
    }

    #[test]
    fn test_path_with_predicate_selects_matching_section() {
        assert_eq!(
            eval("n1:section[n1:code/@code = '10154-3']/n1:title"),
            Value::String("Motivo".into())
        );
        assert_eq!(
            eval("n1:section[2]/n1:title"),
            Value::String("Motivo".into())
        );
        assert_eq!(eval("count(n1:section)"), Value::Number(2.0));
    }

    #[test]
    fn test_union_is_in_document_order() {
        assert_eq!(
            eval("n1:section[2]/n1:title | n1:section[1]/n1:title"),
            Value::String("Problemas|Motivo".into())
        );
    }

    #[test]
    fn test_descendant_and_attribute_selection() {
        assert_eq!(
            eval("//n1:code/@code"),
            Value::String("11450-4|10154-3".into())
        );
        assert_eq!(eval("n1:id/@*"), Value::String("2.16.724|A-1".into()));
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(
            eval("substring('20190823110524', 7, 2)"),
            Value::String("23".into())
        );
        assert_eq!(
            eval("substring('2019', 9, 2)"),
            Value::String(String::new())
        );
        assert_eq!(
            eval("translate('JavaScript:', 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz')"),
            Value::String("javascript:".into())
        );
        assert_eq!(eval("translate('a-b', '-', '')"), Value::String("ab".into()));
        assert_eq!(
            eval("substring-after('tel:+34 600', 'tel:')"),
            Value::String("+34 600".into())
        );
        assert_eq!(
            eval("substring-before('a,b', ',')"),
            Value::String("a".into())
        );
        assert_eq!(
            eval("normalize-space('  Juan   Carlos ')"),
            Value::String("Juan Carlos".into())
        );
        assert_eq!(eval("string-length('Pérez')"), Value::Number(5.0));
        assert_eq!(eval("concat('a', 1, true())"), Value::String("a1true".into()));
    }

    #[test]
    fn test_comparisons_follow_conversion_rules() {
        assert_eq!(eval("n1:id/@extension = 'A-1'"), Value::Boolean(true));
        assert_eq!(eval("n1:section/n1:title != 'Motivo'"), Value::Boolean(true));
        assert_eq!(eval("n1:missing = ''"), Value::Boolean(false));
        assert_eq!(eval("number('05') = 5"), Value::Boolean(true));
        assert_eq!(eval("2 <= 2 and 3 > 2.5"), Value::Boolean(true));
        assert_eq!(eval("not(n1:missing)"), Value::Boolean(true));
    }

    #[test]
    fn test_variables_and_arithmetic() {
        let vars = Vars(vec![("level".into(), Value::Number(2.0))]);
        assert_eq!(eval_with("$level + 1", &vars), Value::Number(3.0));
        assert_eq!(eval_with("$level = 2", &vars), Value::Boolean(true));
    }

    #[test]
    fn test_undefined_variable_fails() {
        let parsed = parse(DOC, DocumentOrigin::SourceDocument).unwrap();
        let tree = parsed.tree();
        let resolver = |_: &str| -> Option<String> { None };
        let expr = parse_expression("$missing", &resolver).unwrap();
        let ctx = EvalContext::new(tree, NodeRef::Node(tree.root()), &NoVariables);
        assert!(matches!(
            evaluate(&expr, &ctx),
            Err(TransformError::TransformFailed { .. })
        ));
    }
}
