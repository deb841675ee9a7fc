//! Tokeniser for rule expressions and match patterns.

use crate::{TransformError, TransformResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Slash,
    DoubleSlash,
    Dot,
    DotDot,
    At,
    Star,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Pipe,
    Plus,
    Minus,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Literal(String),
    Number(f64),
    Variable(String),
    /// A name test or function name, possibly prefixed (`n1:code`, `n1:*`).
    Name(String),
}

impl Token {
    /// Whether a following `and`/`or` is an operator rather than a name.
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::Name(_)
                | Token::Literal(_)
                | Token::Number(_)
                | Token::Variable(_)
                | Token::RParen
                | Token::RBracket
                | Token::Dot
                | Token::DotDot
                | Token::Star
        )
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Splits `input` into tokens.
///
/// # Errors
///
/// Returns [`TransformError::StylesheetImportFailed`] on unterminated literals or characters
/// outside the supported expression language.
pub fn tokenize(input: &str) -> TransformResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    let error = |message: String| TransformError::import(format!("{message} in `{input}`"));

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '/' if next == Some('/') => {
                i += 2;
                Token::DoubleSlash
            }
            '/' => {
                i += 1;
                Token::Slash
            }
            '.' if next == Some('.') => {
                i += 2;
                Token::DotDot
            }
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                Token::Number(text.parse::<f64>().map_err(|_| error(format!("bad number `{text}`")))?)
            }
            '.' => {
                i += 1;
                Token::Dot
            }
            '@' => {
                i += 1;
                Token::At
            }
            '*' => {
                i += 1;
                Token::Star
            }
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '[' => {
                i += 1;
                Token::LBracket
            }
            ']' => {
                i += 1;
                Token::RBracket
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            '|' => {
                i += 1;
                Token::Pipe
            }
            '+' => {
                i += 1;
                Token::Plus
            }
            '-' => {
                i += 1;
                Token::Minus
            }
            '=' => {
                i += 1;
                Token::Eq
            }
            '!' if next == Some('=') => {
                i += 2;
                Token::NotEq
            }
            '<' if next == Some('=') => {
                i += 2;
                Token::Le
            }
            '<' => {
                i += 1;
                Token::Lt
            }
            '>' if next == Some('=') => {
                i += 2;
                Token::Ge
            }
            '>' => {
                i += 1;
                Token::Gt
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let Some(len) = chars[start..].iter().position(|ch| *ch == quote) else {
                    return Err(error("unterminated string literal".into()));
                };
                i = start + len + 1;
                Token::Literal(chars[start..start + len].iter().collect())
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '.' {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                Token::Number(text.parse::<f64>().map_err(|_| error(format!("bad number `{text}`")))?)
            }
            '$' => {
                let start = i + 1;
                if !chars.get(start).copied().is_some_and(is_name_start) {
                    return Err(error("expected variable name after `$`".into()));
                }
                i = start;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                Token::Variable(chars[start..i].iter().collect())
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                // `prefix:local` or `prefix:*`, but not an axis separator.
                if i + 1 < chars.len()
                    && chars[i] == ':'
                    && (is_name_start(chars[i + 1]) || chars[i + 1] == '*')
                {
                    i += 1;
                    if chars[i] == '*' {
                        i += 1;
                    } else {
                        while i < chars.len() && is_name_char(chars[i]) {
                            i += 1;
                        }
                    }
                }
                let name: String = chars[start..i].iter().collect();
                let operand_before = tokens.last().is_some_and(Token::ends_operand);
                match name.as_str() {
                    "and" if operand_before => Token::And,
                    "or" if operand_before => Token::Or,
                    _ => Token::Name(name),
                }
            }
            other => return Err(error(format!("unexpected character `{other}`"))),
        };
        tokens.push(token);
    }

    Ok(tokens)
}
