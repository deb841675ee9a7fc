//! Match patterns.
//!
//! A pattern is one or more location-path alternatives restricted to the child and attribute
//! axes joined by `/` or `//`. Matching runs right to left: the last step must match the
//! candidate node, then each earlier step must match its parent (`/`) or some ancestor (`//`).

use super::eval::{evaluate, node_test_matches, EvalContext, VariableScope};
use super::expr::{parse_expression, Axis, Expr, NodeTest, PathStart, PrefixResolver, Step};
use super::value::{NodeRef, Value};
use crate::{TransformError, TransformResult};
use cda::XmlTree;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Separator {
    Child,
    Descendant,
}

#[derive(Clone, Debug, PartialEq)]
struct PatternStep {
    /// How this step relates to the step before it.
    separator: Separator,
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

/// One `|`-separated alternative of a pattern.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    absolute: bool,
    steps: Vec<PatternStep>,
}

impl Pattern {
    /// Parses pattern text into its alternatives.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::StylesheetImportFailed`] if the text is not a pattern.
    pub fn parse_alternatives(
        input: &str,
        resolver: PrefixResolver<'_>,
    ) -> TransformResult<Vec<Pattern>> {
        let expr = parse_expression(input, resolver)?;
        let mut alternatives = Vec::new();
        collect_alternatives(expr, input, &mut alternatives)?;
        Ok(alternatives)
    }

    /// Priority used when the rule declares none.
    pub fn default_priority(&self) -> f64 {
        match self.steps.as_slice() {
            [step] if !self.absolute && step.predicates.is_empty() => match &step.test {
                NodeTest::Name { .. } => 0.0,
                NodeTest::NamespaceWildcard(_) => -0.25,
                NodeTest::AnyName | NodeTest::Text | NodeTest::Node => -0.5,
            },
            _ => 0.5,
        }
    }

    /// Whether `node` matches this pattern.
    ///
    /// # Errors
    ///
    /// Propagates failures from predicate evaluation.
    pub fn matches(
        &self,
        tree: &XmlTree,
        node: NodeRef,
        variables: &dyn VariableScope,
    ) -> TransformResult<bool> {
        if self.steps.is_empty() {
            return Ok(self.absolute && node == NodeRef::Node(tree.root()));
        }
        self.matches_step(tree, node, self.steps.len() - 1, variables)
    }

    fn matches_step(
        &self,
        tree: &XmlTree,
        node: NodeRef,
        index: usize,
        variables: &dyn VariableScope,
    ) -> TransformResult<bool> {
        let step = &self.steps[index];
        if !step_matches(tree, node, step, variables)? {
            return Ok(false);
        }

        let Some(parent) = parent_of(tree, node) else {
            return Ok(false);
        };

        if index == 0 {
            if !self.absolute {
                return Ok(true);
            }
            return Ok(match step.separator {
                Separator::Child => parent == tree.root(),
                Separator::Descendant => true,
            });
        }

        match step.separator {
            Separator::Child => self.matches_step(tree, NodeRef::Node(parent), index - 1, variables),
            Separator::Descendant => {
                let mut current = Some(parent);
                while let Some(ancestor) = current {
                    if self.matches_step(tree, NodeRef::Node(ancestor), index - 1, variables)? {
                        return Ok(true);
                    }
                    current = tree.parent(ancestor);
                }
                Ok(false)
            }
        }
    }
}

fn parent_of(tree: &XmlTree, node: NodeRef) -> Option<cda::NodeId> {
    match node {
        NodeRef::Node(id) => tree.parent(id),
        NodeRef::Attribute(owner, _) => Some(owner),
    }
}

/// Tests one step against `node`, including its predicates. Predicate positions count the
/// siblings that pass the same node test.
fn step_matches(
    tree: &XmlTree,
    node: NodeRef,
    step: &PatternStep,
    variables: &dyn VariableScope,
) -> TransformResult<bool> {
    let on_axis = match (step.axis, node) {
        (Axis::Attribute, NodeRef::Attribute(..)) => true,
        (Axis::Child, NodeRef::Node(id)) => tree.parent(id).is_some(),
        _ => false,
    };
    if !on_axis || !node_test_matches(tree, node, &step.test, step.axis) {
        return Ok(false);
    }
    if step.predicates.is_empty() {
        return Ok(true);
    }

    let Some(parent) = parent_of(tree, node) else {
        return Ok(false);
    };
    let siblings = super::eval::axis_nodes(
        tree,
        NodeRef::Node(parent),
        &Step {
            axis: step.axis,
            test: step.test.clone(),
            predicates: Vec::new(),
        },
    );
    let mut candidates = siblings;
    for predicate in &step.predicates {
        let size = candidates.len();
        let mut kept = Vec::with_capacity(size);
        for (index, candidate) in candidates.into_iter().enumerate() {
            let ctx = EvalContext {
                tree,
                node: candidate,
                position: index + 1,
                size,
                variables,
            };
            let keep = match evaluate(predicate, &ctx)? {
                Value::Number(n) => n == (index + 1) as f64,
                other => other.to_boolean(),
            };
            if keep {
                kept.push(candidate);
            }
        }
        candidates = kept;
    }
    Ok(candidates.contains(&node))
}

fn not_a_pattern(input: &str) -> TransformError {
    TransformError::import(format!("`{input}` is not a supported match pattern"))
}

fn collect_alternatives(
    expr: Expr,
    input: &str,
    out: &mut Vec<Pattern>,
) -> TransformResult<()> {
    match expr {
        Expr::Union(left, right) => {
            collect_alternatives(*left, input, out)?;
            collect_alternatives(*right, input, out)
        }
        Expr::Path(path) => {
            let absolute = match path.start {
                PathStart::Root => true,
                PathStart::Context => false,
                PathStart::Filter(..) => return Err(not_a_pattern(input)),
            };

            let mut steps = Vec::new();
            let mut separator = Separator::Child;
            for step in path.steps {
                match step.axis {
                    Axis::DescendantOrSelf if step.test == NodeTest::Node && step.predicates.is_empty() => {
                        separator = Separator::Descendant;
                    }
                    Axis::Child | Axis::Attribute => {
                        steps.push(PatternStep {
                            separator,
                            axis: step.axis,
                            test: step.test,
                            predicates: step.predicates,
                        });
                        separator = Separator::Child;
                    }
                    _ => return Err(not_a_pattern(input)),
                }
            }
            if separator == Separator::Descendant {
                return Err(not_a_pattern(input));
            }
            out.push(Pattern { absolute, steps });
            Ok(())
        }
        _ => Err(not_a_pattern(input)),
    }
}
