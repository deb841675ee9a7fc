//! Execution of a compiled rule set against a parsed document.
//!
//! Processing starts by applying rules to the document root. For each selected node the
//! matching rule with the highest priority is instantiated (the one declared last on a tie);
//! nodes with no matching rule fall through to the built-in behaviour.

use super::eval::{evaluate, evaluate_node_set, EvalContext, VariableScope};
use super::expr::Expr;
use super::stylesheet::{AvtPart, Binding, Instruction, Param, Stylesheet, Template};
use super::value::{NodeRef, Value};
use crate::{TransformError, TransformResult};
use cda::{Element, NodeId, NodeKind, QName, XmlTree};

type Bindings = Vec<(String, Value)>;

struct Scope<'a> {
    locals: &'a [(String, Value)],
    globals: &'a [(String, Value)],
}

impl VariableScope for Scope<'_> {
    fn variable(&self, name: &str) -> Option<&Value> {
        self.locals
            .iter()
            .rev()
            .chain(self.globals.iter().rev())
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value)
    }
}

/// The node being processed and its place in the current node list.
#[derive(Clone, Copy)]
struct Focus {
    node: NodeRef,
    position: usize,
    size: usize,
}

struct Executor<'s> {
    stylesheet: &'s Stylesheet,
    source: &'s XmlTree,
    output: XmlTree,
    globals: Bindings,
    depth: usize,
    max_depth: usize,
}

/// Applies `stylesheet` to `source` and returns the result tree.
///
/// # Arguments
///
/// * `stylesheet` - The compiled rule set.
/// * `source` - The parsed clinical document.
/// * `max_depth` - Deepest allowed nesting of rule applications and named calls.
///
/// # Errors
///
/// - [`TransformError::TransformFailed`] on a dynamic error or when nesting exceeds
///   `max_depth`.
/// - [`TransformError::EmptyResult`] if nothing was produced.
/// - [`TransformError::NoRootElement`] if the result is not rooted at one element.
pub fn transform(
    stylesheet: &Stylesheet,
    source: &XmlTree,
    max_depth: usize,
) -> TransformResult<XmlTree> {
    let mut executor = Executor {
        stylesheet,
        source,
        output: XmlTree::new(),
        globals: Vec::new(),
        depth: 0,
        max_depth,
    };

    let root = Focus {
        node: NodeRef::Node(source.root()),
        position: 1,
        size: 1,
    };
    for global in &stylesheet.globals {
        let mut no_locals = Vec::new();
        let value = executor.bind(&global.binding, root, &mut no_locals)?;
        executor.globals.push((global.name.clone(), value));
    }

    let output_root = executor.output.root();
    executor.apply(&[root.node], &[], root, &mut Vec::new(), output_root)?;

    check_result(executor.output)
}

fn check_result(output: XmlTree) -> TransformResult<XmlTree> {
    let top = output.children(output.root());
    let meaningful = top.iter().any(|&id| match output.kind(id) {
        NodeKind::Text(text) => !text.trim().is_empty(),
        NodeKind::Element(_) => true,
        _ => false,
    });
    if !meaningful {
        return Err(TransformError::EmptyResult);
    }

    let elements = top.iter().filter(|&&id| output.is_element(id)).count();
    let stray_text = top.iter().any(
        |&id| matches!(output.kind(id), NodeKind::Text(text) if !text.trim().is_empty()),
    );
    if elements != 1 || stray_text {
        return Err(TransformError::NoRootElement);
    }
    Ok(output)
}

impl<'s> Executor<'s> {
    fn eval(&self, expr: &Expr, focus: Focus, locals: &Bindings) -> TransformResult<Value> {
        let scope = Scope {
            locals,
            globals: &self.globals,
        };
        let ctx = EvalContext {
            tree: self.source,
            node: focus.node,
            position: focus.position,
            size: focus.size,
            variables: &scope,
        };
        evaluate(expr, &ctx)
    }

    fn eval_nodes(
        &self,
        expr: &Expr,
        focus: Focus,
        locals: &Bindings,
    ) -> TransformResult<Vec<NodeRef>> {
        let scope = Scope {
            locals,
            globals: &self.globals,
        };
        let ctx = EvalContext {
            tree: self.source,
            node: focus.node,
            position: focus.position,
            size: focus.size,
            variables: &scope,
        };
        evaluate_node_set(expr, &ctx)
    }

    fn enter(&mut self) -> TransformResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(TransformError::failed(format!(
                "rule nesting exceeded the limit of {}",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Highest-priority rule matching `node`; the later rule wins a tie.
    fn best_rule(&self, node: NodeRef) -> TransformResult<Option<usize>> {
        let scope = Scope {
            locals: &[],
            globals: &self.globals,
        };
        let mut best: Option<(f64, usize)> = None;
        for rule in &self.stylesheet.rules {
            if best.is_some_and(|(priority, _)| rule.priority < priority) {
                continue;
            }
            if rule.pattern.matches(self.source, node, &scope)? {
                best = Some((rule.priority, rule.template));
            }
        }
        Ok(best.map(|(_, template)| template))
    }

    /// Processes each of `nodes` with its best rule, or the built-in behaviour.
    fn apply(
        &mut self,
        nodes: &[NodeRef],
        params: &'s [Param],
        caller: Focus,
        caller_locals: &mut Bindings,
        parent: NodeId,
    ) -> TransformResult<()> {
        let passed = self.bind_all(params, caller, caller_locals)?;
        let size = nodes.len();
        for (index, &node) in nodes.iter().enumerate() {
            let focus = Focus {
                node,
                position: index + 1,
                size,
            };
            self.enter()?;
            match self.best_rule(node)? {
                Some(template) => {
                    let stylesheet = self.stylesheet;
                    let template = &stylesheet.templates[template];
                    self.instantiate(template, &passed, focus, parent)?;
                }
                None => self.built_in(focus, parent)?,
            }
            self.leave();
        }
        Ok(())
    }

    fn built_in(&mut self, focus: Focus, parent: NodeId) -> TransformResult<()> {
        let source = self.source;
        match focus.node {
            NodeRef::Node(id) => match source.kind(id) {
                NodeKind::Root | NodeKind::Element(_) => {
                    let children: Vec<NodeRef> = source
                        .children(id)
                        .iter()
                        .map(|child| NodeRef::Node(*child))
                        .collect();
                    self.apply(&children, &[], focus, &mut Vec::new(), parent)
                }
                NodeKind::Text(text) => {
                    self.output.append_text(parent, text);
                    Ok(())
                }
                NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. } => Ok(()),
            },
            NodeRef::Attribute(..) => {
                let value = focus.node.string_value(source);
                self.output.append_text(parent, &value);
                Ok(())
            }
        }
    }

    /// Runs a template body with `passed` parameters; declared parameters not passed take
    /// their defaults.
    fn instantiate(
        &mut self,
        template: &'s Template,
        passed: &Bindings,
        focus: Focus,
        parent: NodeId,
    ) -> TransformResult<()> {
        let mut locals: Bindings = Vec::with_capacity(template.params.len());
        for param in &template.params {
            let value = match passed.iter().find(|(name, _)| *name == param.name) {
                Some((_, value)) => value.clone(),
                None => self.bind(&param.binding, focus, &mut locals)?,
            };
            locals.push((param.name.clone(), value));
        }
        self.execute(&template.body, focus, &mut locals, parent)
    }

    fn bind_all(
        &mut self,
        params: &'s [Param],
        focus: Focus,
        locals: &mut Bindings,
    ) -> TransformResult<Bindings> {
        let mut values = Vec::with_capacity(params.len());
        for param in params {
            let value = self.bind(&param.binding, focus, locals)?;
            values.push((param.name.clone(), value));
        }
        Ok(values)
    }

    fn bind(
        &mut self,
        binding: &'s Binding,
        focus: Focus,
        locals: &mut Bindings,
    ) -> TransformResult<Value> {
        match binding {
            Binding::Select(expr) => self.eval(expr, focus, locals),
            Binding::Content(body) => Ok(Value::String(self.capture(body, focus, locals)?)),
            Binding::Empty => Ok(Value::String(String::new())),
        }
    }

    /// Runs `body` into a scratch tree and returns the string value of what it produced.
    fn capture(
        &mut self,
        body: &'s [Instruction],
        focus: Focus,
        locals: &mut Bindings,
    ) -> TransformResult<String> {
        let saved = std::mem::take(&mut self.output);
        let scratch_root = self.output.root();
        let result = self.execute(body, focus, locals, scratch_root);
        let scratch = std::mem::replace(&mut self.output, saved);
        result?;
        Ok(scratch.string_value(scratch.root()))
    }

    fn avt(&self, parts: &[AvtPart], focus: Focus, locals: &Bindings) -> TransformResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                AvtPart::Literal(text) => out.push_str(text),
                AvtPart::Expr(expr) => {
                    out.push_str(&self.eval(expr, focus, locals)?.to_string_value(self.source))
                }
            }
        }
        Ok(out)
    }

    /// Runs `body`. Variables it declares are visible to the instructions after them and are
    /// dropped when the body ends.
    fn execute(
        &mut self,
        body: &'s [Instruction],
        focus: Focus,
        locals: &mut Bindings,
        parent: NodeId,
    ) -> TransformResult<()> {
        let mark = locals.len();
        let result = self.execute_each(body, focus, locals, parent);
        locals.truncate(mark);
        result
    }

    fn execute_each(
        &mut self,
        body: &'s [Instruction],
        focus: Focus,
        locals: &mut Bindings,
        parent: NodeId,
    ) -> TransformResult<()> {
        for instruction in body {
            match instruction {
                Instruction::Text(text) => {
                    self.output.append_text(parent, text);
                }
                Instruction::ValueOf(expr) => {
                    let text = self.eval(expr, focus, locals)?.to_string_value(self.source);
                    self.output.append_text(parent, &text);
                }
                Instruction::Element {
                    name,
                    attributes,
                    body,
                } => {
                    let mut element = Element::new(name.clone());
                    for (attr_name, parts) in attributes {
                        let value = self.avt(parts, focus, locals)?;
                        element.attributes.push(cda::Attribute {
                            name: attr_name.clone(),
                            value,
                        });
                    }
                    let id = self.output.append_element(parent, element);
                    self.execute(body, focus, locals, id)?;
                }
                Instruction::Attribute { name, body } => {
                    let name = self.avt(name, focus, locals)?;
                    let value = self.capture(body, focus, locals)?;
                    // Attributes can only be added to an element; elsewhere they are dropped.
                    self.output
                        .set_attribute(parent, QName::local(name.trim()), value);
                }
                Instruction::ApplyTemplates { select, params } => {
                    let nodes = match select {
                        Some(expr) => self.eval_nodes(expr, focus, locals)?,
                        None => match focus.node {
                            NodeRef::Node(id) => self
                                .source
                                .children(id)
                                .iter()
                                .map(|child| NodeRef::Node(*child))
                                .collect(),
                            NodeRef::Attribute(..) => Vec::new(),
                        },
                    };
                    self.apply(&nodes, params, focus, locals, parent)?;
                }
                Instruction::CallTemplate { template, params } => {
                    let passed = self.bind_all(params, focus, locals)?;
                    let stylesheet = self.stylesheet;
                    let template = &stylesheet.templates[*template];
                    self.enter()?;
                    self.instantiate(template, &passed, focus, parent)?;
                    self.leave();
                }
                Instruction::ForEach { select, body } => {
                    let nodes = self.eval_nodes(select, focus, locals)?;
                    let size = nodes.len();
                    for (index, node) in nodes.into_iter().enumerate() {
                        let inner = Focus {
                            node,
                            position: index + 1,
                            size,
                        };
                        self.execute(body, inner, locals, parent)?;
                    }
                }
                Instruction::If { test, body } => {
                    if self.eval(test, focus, locals)?.to_boolean() {
                        self.execute(body, focus, locals, parent)?;
                    }
                }
                Instruction::Choose {
                    branches,
                    otherwise,
                } => {
                    let mut chosen = otherwise;
                    for (test, body) in branches {
                        if self.eval(test, focus, locals)?.to_boolean() {
                            chosen = body;
                            break;
                        }
                    }
                    self.execute(chosen, focus, locals, parent)?;
                }
                Instruction::Variable(param) => {
                    let value = self.bind(&param.binding, focus, locals)?;
                    locals.push((param.name.clone(), value));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::XSL_NAMESPACE;
    use cda::{parse, serialize, DocumentOrigin};

    const DOC: &str = r#"<ClinicalDocument xmlns="urn:hl7-org:v3">
<title>Informe</title>
<component><structuredBody>
<component><section><code code="11450-4"/><title>Problemas</title></section></component>
<component><section><code code="99999-9"/><title>Otros</title></section></component>
</structuredBody></component>
</ClinicalDocument>"#;

    fn render(rules: &str, max_depth: usize) -> TransformResult<String> {
        let text = format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="{XSL_NAMESPACE}" xmlns:n1="urn:hl7-org:v3">
{rules}
</xsl:stylesheet>"#
        );
        let rule_set = parse(&text, DocumentOrigin::RuleSet).unwrap();
        let stylesheet = Stylesheet::compile(&rule_set)?;
        let source = parse(DOC, DocumentOrigin::SourceDocument).unwrap();
        let output = transform(&stylesheet, source.tree(), max_depth)?;
        Ok(serialize(&output).unwrap())
    }

    #[test]
    fn test_most_specific_rule_wins() {
        let html = render(
            r#"<xsl:template match="/"><div><xsl:apply-templates select="//n1:section"/></div></xsl:template>
<xsl:template match="n1:section[n1:code/@code = '11450-4']"><b>coded</b></xsl:template>
<xsl:template match="n1:section"><i><xsl:value-of select="n1:title"/></i></xsl:template>"#,
            64,
        )
        .unwrap();
        assert_eq!(html, "<div><b>coded</b><i>Otros</i></div>");
    }

    #[test]
    fn test_later_rule_wins_priority_tie() {
        let html = render(
            r#"<xsl:template match="/"><div><xsl:apply-templates select="n1:ClinicalDocument/n1:title"/></div></xsl:template>
<xsl:template match="n1:title">first</xsl:template>
<xsl:template match="n1:title">second</xsl:template>"#,
            64,
        )
        .unwrap();
        assert_eq!(html, "<div>second</div>");
    }

    #[test]
    fn test_built_in_rules_copy_text() {
        let html = render(
            r#"<xsl:template match="/"><div><xsl:apply-templates select="n1:ClinicalDocument/n1:title"/></div></xsl:template>"#,
            64,
        )
        .unwrap();
        assert_eq!(html, "<div>Informe</div>");
    }

    #[test]
    fn test_named_rule_parameters_and_defaults() {
        let html = render(
            r#"<xsl:template match="/"><p><xsl:call-template name="greet"><xsl:with-param name="who" select="'Ana'"/></xsl:call-template><xsl:call-template name="greet"/></p></xsl:template>
<xsl:template name="greet"><xsl:param name="who">nadie</xsl:param><xsl:param name="sep" select="';'"/><xsl:value-of select="concat($who, $sep)"/></xsl:template>"#,
            64,
        )
        .unwrap();
        assert_eq!(html, "<p>Ana;nadie;</p>");
    }

    #[test]
    fn test_for_each_position_and_attribute_templates() {
        let html = render(
            r#"<xsl:template match="/"><ul><xsl:for-each select="//n1:section"><li id="s{position()}" class="{n1:code/@code}"><xsl:value-of select="last()"/></li></xsl:for-each></ul></xsl:template>"#,
            64,
        )
        .unwrap();
        assert_eq!(
            html,
            r#"<ul><li id="s1" class="11450-4">2</li><li id="s2" class="99999-9">2</li></ul>"#
        );
    }

    #[test]
    fn test_variables_choose_and_attribute_instruction() {
        let html = render(
            r#"<xsl:template match="/">
<xsl:variable name="count" select="count(//n1:section)"/>
<xsl:variable name="label"><xsl:text>total</xsl:text></xsl:variable>
<span>
<xsl:attribute name="title"><xsl:value-of select="$label"/></xsl:attribute>
<xsl:choose>
<xsl:when test="$count &gt; 5">muchos</xsl:when>
<xsl:when test="$count = 2">dos</xsl:when>
<xsl:otherwise>otros</xsl:otherwise>
</xsl:choose>
</span>
</xsl:template>"#,
            64,
        )
        .unwrap();
        assert_eq!(html, r#"<span title="total">dos</span>"#);
    }

    #[test]
    fn test_recursion_beyond_depth_limit_fails() {
        let err = render(
            r#"<xsl:template match="/"><div><xsl:call-template name="loop"/></div></xsl:template>
<xsl:template name="loop"><xsl:call-template name="loop"/></xsl:template>"#,
            16,
        )
        .unwrap_err();
        assert!(matches!(err, TransformError::TransformFailed { .. }));
    }

    #[test]
    fn test_empty_result_is_reported() {
        let err = render(r#"<xsl:template match="/"/>"#, 64).unwrap_err();
        assert_eq!(err, TransformError::EmptyResult);
    }

    #[test]
    fn test_result_without_single_root_is_reported() {
        let err = render(r#"<xsl:template match="/"><p/><p/></xsl:template>"#, 64).unwrap_err();
        assert_eq!(err, TransformError::NoRootElement);
    }

    #[test]
    fn test_undefined_variable_fails_transform() {
        let err = render(
            r#"<xsl:template match="/"><p><xsl:value-of select="$missing"/></p></xsl:template>"#,
            64,
        )
        .unwrap_err();
        assert!(matches!(err, TransformError::TransformFailed { .. }));
    }
}
