//! Expression syntax tree and parser.
//!
//! Prefixes in name tests are resolved while parsing, against the namespace declarations in
//! scope on the rule element that carries the expression. Unknown prefixes, unknown functions
//! and wrong argument counts are reported as import failures.

use super::lexer::{tokenize, Token};
use crate::{TransformError, TransformResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Subtract(Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Variable(String),
    Function(Function, Vec<Expr>),
    Path(PathExpr),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PathExpr {
    pub start: PathStart,
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PathStart {
    /// Relative to the context node.
    Context,
    /// The root of the context node's tree.
    Root,
    /// A primary expression with optional predicates, e.g. `$name` or `(a | b)[1]`.
    Filter(Box<Expr>, Vec<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Child,
    Attribute,
    SelfNode,
    Parent,
    DescendantOrSelf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeTest {
    /// An expanded name; unprefixed names are in no namespace.
    Name {
        namespace: Option<String>,
        local: String,
    },
    /// `prefix:*`, carrying the resolved namespace URI.
    NamespaceWildcard(String),
    /// `*`
    AnyName,
    /// `text()`
    Text,
    /// `node()`
    Node,
}

/// Supported functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    Concat,
    Contains,
    StartsWith,
    Substring,
    SubstringBefore,
    SubstringAfter,
    StringLength,
    NormalizeSpace,
    Translate,
    Not,
    String,
    Number,
    Boolean,
    Count,
    Position,
    Last,
    True,
    False,
    LocalName,
}

impl Function {
    fn lookup(name: &str) -> Option<(Function, usize, Option<usize>)> {
        let entry = match name {
            "concat" => (Function::Concat, 2, None),
            "contains" => (Function::Contains, 2, Some(2)),
            "starts-with" => (Function::StartsWith, 2, Some(2)),
            "substring" => (Function::Substring, 2, Some(3)),
            "substring-before" => (Function::SubstringBefore, 2, Some(2)),
            "substring-after" => (Function::SubstringAfter, 2, Some(2)),
            "string-length" => (Function::StringLength, 0, Some(1)),
            "normalize-space" => (Function::NormalizeSpace, 0, Some(1)),
            "translate" => (Function::Translate, 3, Some(3)),
            "not" => (Function::Not, 1, Some(1)),
            "string" => (Function::String, 0, Some(1)),
            "number" => (Function::Number, 0, Some(1)),
            "boolean" => (Function::Boolean, 1, Some(1)),
            "count" => (Function::Count, 1, Some(1)),
            "position" => (Function::Position, 0, Some(0)),
            "last" => (Function::Last, 0, Some(0)),
            "true" => (Function::True, 0, Some(0)),
            "false" => (Function::False, 0, Some(0)),
            "local-name" => (Function::LocalName, 0, Some(1)),
            _ => return None,
        };
        Some(entry)
    }
}

/// Resolves a namespace prefix to its URI.
pub type PrefixResolver<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Parses an expression.
///
/// # Errors
///
/// Returns [`TransformError::StylesheetImportFailed`] on any syntax error, unknown prefix or
/// unknown function.
pub fn parse_expression(input: &str, resolver: PrefixResolver<'_>) -> TransformResult<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        input,
        resolver,
    };
    let expr = parser.or_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing tokens"));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    input: &'a str,
    resolver: PrefixResolver<'a>,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> TransformError {
        TransformError::import(format!("{message} in expression `{}`", self.input))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> TransformResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {token:?}")))
        }
    }

    fn or_expr(&mut self) -> TransformResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> TransformResult<Expr> {
        let mut left = self.equality_expr()?;
        while self.eat(&Token::And) {
            let right = self.equality_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality_expr(&mut self) -> TransformResult<Expr> {
        let mut left = self.relational_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CompareOp::Eq,
                Some(Token::NotEq) => CompareOp::NotEq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.relational_expr()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn relational_expr(&mut self) -> TransformResult<Expr> {
        let mut left = self.additive_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CompareOp::Lt,
                Some(Token::Le) => CompareOp::Le,
                Some(Token::Gt) => CompareOp::Gt,
                Some(Token::Ge) => CompareOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive_expr()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn additive_expr(&mut self) -> TransformResult<Expr> {
        let mut left = self.unary_expr()?;
        loop {
            if self.eat(&Token::Plus) {
                let right = self.unary_expr()?;
                left = Expr::Add(Box::new(left), Box::new(right));
            } else if self.eat(&Token::Minus) {
                let right = self.unary_expr()?;
                left = Expr::Subtract(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn unary_expr(&mut self) -> TransformResult<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Negate(Box::new(self.unary_expr()?)));
        }
        self.union_expr()
    }

    fn union_expr(&mut self) -> TransformResult<Expr> {
        let mut left = self.path_expr()?;
        while self.eat(&Token::Pipe) {
            let right = self.path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn starts_primary(&self) -> bool {
        match self.peek() {
            Some(Token::Literal(_) | Token::Number(_) | Token::Variable(_) | Token::LParen) => {
                true
            }
            Some(Token::Name(name)) => {
                self.peek_at(1) == Some(&Token::LParen) && !matches!(name.as_str(), "text" | "node")
            }
            _ => false,
        }
    }

    fn path_expr(&mut self) -> TransformResult<Expr> {
        if self.starts_primary() {
            let primary = self.primary_expr()?;
            let predicates = self.predicates()?;
            let continues = matches!(self.peek(), Some(Token::Slash | Token::DoubleSlash));
            if predicates.is_empty() && !continues {
                return Ok(primary);
            }
            let mut steps = Vec::new();
            if continues {
                self.relative_steps(&mut steps, true)?;
            }
            return Ok(Expr::Path(PathExpr {
                start: PathStart::Filter(Box::new(primary), predicates),
                steps,
            }));
        }

        let mut steps = Vec::new();
        let start = match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                if self.starts_step() {
                    self.relative_steps(&mut steps, false)?;
                }
                PathStart::Root
            }
            Some(Token::DoubleSlash) => {
                self.relative_steps(&mut steps, true)?;
                PathStart::Root
            }
            _ => {
                self.relative_steps(&mut steps, false)?;
                PathStart::Context
            }
        };
        Ok(Expr::Path(PathExpr { start, steps }))
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_) | Token::Star | Token::At | Token::Dot | Token::DotDot)
        )
    }

    /// Parses `step (('/' | '//') step)*`. With `separator_first`, a separator precedes the
    /// first step.
    fn relative_steps(&mut self, steps: &mut Vec<Step>, separator_first: bool) -> TransformResult<()> {
        let mut need_separator = separator_first;
        loop {
            if need_separator {
                match self.peek() {
                    Some(Token::Slash) => self.pos += 1,
                    Some(Token::DoubleSlash) => {
                        self.pos += 1;
                        steps.push(Step {
                            axis: Axis::DescendantOrSelf,
                            test: NodeTest::Node,
                            predicates: Vec::new(),
                        });
                    }
                    _ => return Ok(()),
                }
            }
            steps.push(self.step()?);
            need_separator = true;
        }
    }

    fn step(&mut self) -> TransformResult<Step> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfNode,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }

        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else {
            Axis::Child
        };
        let test = self.node_test()?;
        let predicates = self.predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn node_test(&mut self) -> TransformResult<NodeTest> {
        match self.peek().cloned() {
            Some(Token::Star) => {
                self.pos += 1;
                Ok(NodeTest::AnyName)
            }
            Some(Token::Name(name)) => {
                self.pos += 1;
                if self.peek() == Some(&Token::LParen) {
                    let test = match name.as_str() {
                        "text" => NodeTest::Text,
                        "node" => NodeTest::Node,
                        _ => return Err(self.error(&format!("`{name}()` is not a node test"))),
                    };
                    self.pos += 1;
                    self.expect(&Token::RParen)?;
                    return Ok(test);
                }
                self.name_test(&name)
            }
            _ => Err(self.error("expected a node test")),
        }
    }

    fn name_test(&self, name: &str) -> TransformResult<NodeTest> {
        match name.split_once(':') {
            Some((prefix, local)) => {
                let uri = (self.resolver)(prefix)
                    .ok_or_else(|| self.error(&format!("undeclared prefix `{prefix}`")))?;
                if local == "*" {
                    Ok(NodeTest::NamespaceWildcard(uri))
                } else {
                    Ok(NodeTest::Name {
                        namespace: Some(uri),
                        local: local.to_string(),
                    })
                }
            }
            None => Ok(NodeTest::Name {
                namespace: None,
                local: name.to_string(),
            }),
        }
    }

    fn predicates(&mut self) -> TransformResult<Vec<Expr>> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.or_expr()?);
            self.expect(&Token::RBracket)?;
        }
        Ok(predicates)
    }

    fn primary_expr(&mut self) -> TransformResult<Expr> {
        match self.peek().cloned() {
            Some(Token::Literal(text)) => {
                self.pos += 1;
                Ok(Expr::Literal(text))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::Variable(name)) => {
                self.pos += 1;
                Ok(Expr::Variable(name))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.or_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) => {
                self.pos += 1;
                self.expect(&Token::LParen)?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.or_expr()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                let (function, min, max) = Function::lookup(&name)
                    .ok_or_else(|| self.error(&format!("unknown function `{name}`")))?;
                if args.len() < min || max.is_some_and(|max| args.len() > max) {
                    return Err(self.error(&format!(
                        "`{name}` does not take {} argument(s)",
                        args.len()
                    )));
                }
                Ok(Expr::Function(function, args))
            }
            _ => Err(self.error("expected an expression")),
        }
    }
}
