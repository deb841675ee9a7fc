//! Compilation of a parsed rule set into executable templates.
//!
//! Compilation happens once per pipeline run, right after the rule set is parsed. Every
//! expression, pattern and attribute value template is parsed here, so a rule set that
//! compiles cleanly can only fail at run time on dynamic errors (undefined variables,
//! type mismatches, the depth guard).

use super::expr::{parse_expression, Expr};
use super::pattern::Pattern;
use crate::constants::XSL_NAMESPACE;
use crate::{TransformError, TransformResult};
use cda::{NodeId, NodeKind, ParsedDocument, QName, XmlTree};
use std::collections::HashMap;

/// How a variable or parameter gets its value.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Binding {
    Select(Expr),
    /// The string value of the output produced by the body.
    Content(Vec<Instruction>),
    /// The empty string.
    Empty,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Param {
    pub name: String,
    pub binding: Binding,
}

/// Part of an attribute value template.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum AvtPart {
    Literal(String),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Instruction {
    Text(String),
    Element {
        name: QName,
        attributes: Vec<(QName, Vec<AvtPart>)>,
        body: Vec<Instruction>,
    },
    Attribute {
        name: Vec<AvtPart>,
        body: Vec<Instruction>,
    },
    ApplyTemplates {
        select: Option<Expr>,
        params: Vec<Param>,
    },
    CallTemplate {
        template: usize,
        params: Vec<Param>,
    },
    ForEach {
        select: Expr,
        body: Vec<Instruction>,
    },
    If {
        test: Expr,
        body: Vec<Instruction>,
    },
    Choose {
        branches: Vec<(Expr, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    ValueOf(Expr),
    Variable(Param),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Template {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Vec<Instruction>,
}

/// One match alternative of a template.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Rule {
    pub pattern: Pattern,
    pub priority: f64,
    pub template: usize,
}

/// A compiled rule set.
#[derive(Clone, Debug, PartialEq)]
pub struct Stylesheet {
    pub(crate) templates: Vec<Template>,
    /// Match rules in declaration order; later rules win priority ties.
    pub(crate) rules: Vec<Rule>,
    pub(crate) globals: Vec<Param>,
}

impl Stylesheet {
    /// Compiles a parsed rule set.
    ///
    /// # Arguments
    ///
    /// * `rule_set` - The parsed rule document.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::StylesheetImportFailed`] if the root is not an
    /// `xsl:stylesheet`, if it uses an unsupported instruction, if a named rule is declared
    /// twice or called without being declared, or if any expression or pattern is invalid.
    pub fn compile(rule_set: &ParsedDocument) -> TransformResult<Self> {
        let tree = rule_set.tree();
        let root = tree
            .document_element()
            .ok_or_else(|| TransformError::import("rule set has no root element"))?;
        match xsl_name(tree, root) {
            Some("stylesheet" | "transform") => {}
            _ => {
                return Err(TransformError::import(
                    "rule set root must be an xsl:stylesheet element",
                ))
            }
        }

        // Named rules may be called before they are declared, so index them first.
        let mut named = HashMap::new();
        let mut template_nodes = Vec::new();
        for child in tree.child_elements(root) {
            if xsl_name(tree, child) != Some("template") {
                continue;
            }
            let index = template_nodes.len();
            if let Some(name) = tree.attribute(child, None, "name") {
                let name = name.trim().to_string();
                if named.insert(name.clone(), index).is_some() {
                    return Err(TransformError::import(format!(
                        "named rule `{name}` is declared more than once"
                    )));
                }
            }
            template_nodes.push(child);
        }

        let compiler = Compiler { tree, named };
        let mut stylesheet = Stylesheet {
            templates: Vec::with_capacity(template_nodes.len()),
            rules: Vec::new(),
            globals: Vec::new(),
        };

        for child in tree.child_elements(root) {
            match xsl_name(tree, child) {
                Some("template") => {
                    let index = stylesheet.templates.len();
                    let (template, rules) = compiler.template(child, index)?;
                    stylesheet.templates.push(template);
                    stylesheet.rules.extend(rules);
                }
                Some("variable" | "param") => stylesheet.globals.push(compiler.param(child)?),
                Some("output") => {}
                Some(other) => {
                    return Err(TransformError::import(format!(
                        "unsupported top-level element xsl:{other}"
                    )))
                }
                None => {
                    tracing::debug!("ignoring non-rule top-level element");
                }
            }
        }

        Ok(stylesheet)
    }

    /// Number of compiled templates, named and matching.
    pub fn template_count(&self) -> usize {
        self.templates.len()
    }
}

/// Local name of `id` if it is an element in the rule namespace.
fn xsl_name(tree: &XmlTree, id: NodeId) -> Option<&str> {
    tree.element(id)
        .filter(|element| element.name.namespace.as_deref() == Some(XSL_NAMESPACE))
        .map(|element| element.name.local.as_str())
}

fn is_whitespace_text(tree: &XmlTree, id: NodeId) -> bool {
    matches!(tree.kind(id), NodeKind::Text(text) if text.trim().is_empty())
}

struct Compiler<'t> {
    tree: &'t XmlTree,
    named: HashMap<String, usize>,
}

impl Compiler<'_> {
    fn expression(&self, at: NodeId, text: &str) -> TransformResult<Expr> {
        let resolver =
            |prefix: &str| self.tree.lookup_namespace(at, Some(prefix)).map(str::to_string);
        parse_expression(text, &resolver)
    }

    fn required(&self, id: NodeId, attribute: &str) -> TransformResult<&str> {
        self.tree.attribute(id, None, attribute).ok_or_else(|| {
            let instruction = xsl_name(self.tree, id).unwrap_or("?");
            TransformError::import(format!(
                "xsl:{instruction} is missing its `{attribute}` attribute"
            ))
        })
    }

    fn required_expression(&self, id: NodeId, attribute: &str) -> TransformResult<Expr> {
        let text = self.required(id, attribute)?;
        self.expression(id, text)
    }

    fn template(&self, id: NodeId, index: usize) -> TransformResult<(Template, Vec<Rule>)> {
        let name = self
            .tree
            .attribute(id, None, "name")
            .map(|name| name.trim().to_string());
        let match_text = self.tree.attribute(id, None, "match");
        if name.is_none() && match_text.is_none() {
            return Err(TransformError::import(
                "xsl:template needs a `match` or a `name` attribute",
            ));
        }
        if self.tree.attribute(id, None, "mode").is_some() {
            return Err(TransformError::import("template modes are not supported"));
        }

        let explicit_priority = match self.tree.attribute(id, None, "priority") {
            Some(text) => Some(text.trim().parse::<f64>().map_err(|_| {
                TransformError::import(format!("invalid template priority `{text}`"))
            })?),
            None => None,
        };

        let mut rules = Vec::new();
        if let Some(pattern_text) = match_text {
            let resolver =
                |prefix: &str| self.tree.lookup_namespace(id, Some(prefix)).map(str::to_string);
            for pattern in Pattern::parse_alternatives(pattern_text, &resolver)? {
                let priority = explicit_priority.unwrap_or_else(|| pattern.default_priority());
                rules.push(Rule {
                    pattern,
                    priority,
                    template: index,
                });
            }
        }

        // Parameters must come first in the template body.
        let mut params = Vec::new();
        let mut rest = Vec::new();
        for &child in self.tree.children(id) {
            if xsl_name(self.tree, child) == Some("param") && rest.is_empty() {
                params.push(self.param(child)?);
            } else if !is_whitespace_text(self.tree, child) {
                rest.push(child);
            }
        }
        let body = self.instructions(&rest)?;

        Ok((Template { name, params, body }, rules))
    }

    fn param(&self, id: NodeId) -> TransformResult<Param> {
        let name = self.required(id, "name")?.trim().to_string();
        let binding = match self.tree.attribute(id, None, "select") {
            Some(select) => Binding::Select(self.expression(id, select)?),
            None => {
                let body = self.body(id)?;
                if body.is_empty() {
                    Binding::Empty
                } else {
                    Binding::Content(body)
                }
            }
        };
        Ok(Param { name, binding })
    }

    /// Compiles the children of `id`, dropping whitespace-only text.
    fn body(&self, id: NodeId) -> TransformResult<Vec<Instruction>> {
        let children: Vec<NodeId> = self
            .tree
            .children(id)
            .iter()
            .copied()
            .filter(|child| !is_whitespace_text(self.tree, *child))
            .collect();
        self.instructions(&children)
    }

    fn instructions(&self, nodes: &[NodeId]) -> TransformResult<Vec<Instruction>> {
        let mut out = Vec::with_capacity(nodes.len());
        for &node in nodes {
            match self.tree.kind(node) {
                NodeKind::Text(text) => out.push(Instruction::Text(text.clone())),
                NodeKind::Element(_) => out.push(self.instruction(node)?),
                _ => {}
            }
        }
        Ok(out)
    }

    fn instruction(&self, id: NodeId) -> TransformResult<Instruction> {
        let Some(local) = xsl_name(self.tree, id) else {
            return self.literal_element(id);
        };

        let instruction = match local {
            "text" => Instruction::Text(self.tree.string_value(id)),
            "value-of" => Instruction::ValueOf(self.required_expression(id, "select")?),
            "if" => Instruction::If {
                test: self.required_expression(id, "test")?,
                body: self.body(id)?,
            },
            "for-each" => Instruction::ForEach {
                select: self.required_expression(id, "select")?,
                body: self.body(id)?,
            },
            "choose" => self.choose(id)?,
            "variable" => Instruction::Variable(self.param(id)?),
            "attribute" => Instruction::Attribute {
                name: self.avt(id, self.required(id, "name")?)?,
                body: self.body(id)?,
            },
            "apply-templates" => Instruction::ApplyTemplates {
                select: match self.tree.attribute(id, None, "select") {
                    Some(select) => Some(self.expression(id, select)?),
                    None => None,
                },
                params: self.with_params(id)?,
            },
            "call-template" => {
                let name = self.required(id, "name")?.trim();
                let template = *self.named.get(name).ok_or_else(|| {
                    TransformError::import(format!("call to undeclared named rule `{name}`"))
                })?;
                Instruction::CallTemplate {
                    template,
                    params: self.with_params(id)?,
                }
            }
            other => {
                return Err(TransformError::import(format!(
                    "unsupported instruction xsl:{other}"
                )))
            }
        };
        Ok(instruction)
    }

    fn choose(&self, id: NodeId) -> TransformResult<Instruction> {
        let mut branches = Vec::new();
        let mut otherwise = None;
        for child in self.tree.child_elements(id) {
            match xsl_name(self.tree, child) {
                Some("when") if otherwise.is_none() => {
                    branches.push((self.required_expression(child, "test")?, self.body(child)?));
                }
                Some("otherwise") if otherwise.is_none() => otherwise = Some(self.body(child)?),
                _ => {
                    return Err(TransformError::import(
                        "xsl:choose may only hold xsl:when elements followed by one xsl:otherwise",
                    ))
                }
            }
        }
        if branches.is_empty() {
            return Err(TransformError::import("xsl:choose needs at least one xsl:when"));
        }
        Ok(Instruction::Choose {
            branches,
            otherwise: otherwise.unwrap_or_default(),
        })
    }

    fn with_params(&self, id: NodeId) -> TransformResult<Vec<Param>> {
        let mut params = Vec::new();
        for child in self.tree.child_elements(id) {
            match xsl_name(self.tree, child) {
                Some("with-param") => params.push(self.param(child)?),
                Some(other) => {
                    return Err(TransformError::import(format!(
                        "unsupported instruction xsl:{other} inside a template call"
                    )))
                }
                None => {
                    return Err(TransformError::import(
                        "template calls may only hold xsl:with-param elements",
                    ))
                }
            }
        }
        Ok(params)
    }

    fn literal_element(&self, id: NodeId) -> TransformResult<Instruction> {
        let Some(element) = self.tree.element(id) else {
            return Err(TransformError::import("expected an element"));
        };
        let mut attributes = Vec::with_capacity(element.attributes.len());
        for attr in &element.attributes {
            if attr.name.namespace.as_deref() == Some(XSL_NAMESPACE) {
                continue;
            }
            attributes.push((attr.name.clone(), self.avt(id, &attr.value)?));
        }
        Ok(Instruction::Element {
            name: element.name.clone(),
            attributes,
            body: self.body(id)?,
        })
    }

    /// Splits an attribute value template into literal and expression parts. `{{` and `}}`
    /// stand for literal braces.
    fn avt(&self, at: NodeId, text: &str) -> TransformResult<Vec<AvtPart>> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut expression = String::new();
                    let mut quote = None;
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        match (quote, inner) {
                            (None, '}') => {
                                closed = true;
                                break;
                            }
                            (None, '\'' | '"') => quote = Some(inner),
                            (Some(q), _) if q == inner => quote = None,
                            _ => {}
                        }
                        expression.push(inner);
                    }
                    if !closed {
                        return Err(TransformError::import(format!(
                            "unterminated expression in attribute value `{text}`"
                        )));
                    }
                    if !literal.is_empty() {
                        parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(AvtPart::Expr(self.expression(at, &expression)?));
                }
                '}' => {
                    return Err(TransformError::import(format!(
                        "unmatched `}}` in attribute value `{text}`"
                    )))
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            parts.push(AvtPart::Literal(literal));
        }
        Ok(parts)
    }
}
