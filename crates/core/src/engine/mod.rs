//! Rule engine.
//!
//! A small interpreter for the subset of the XSLT 1.0 rule language used by assembled rule
//! sets: match and named templates with priorities, template application, iteration,
//! conditionals, variables and parameters, value extraction and literal output with attribute
//! value templates. Expressions use a matching subset of XPath 1.0.
//!
//! [`Stylesheet::compile`] turns a parsed rule set into templates once; [`transform`] runs it
//! against a parsed document.

mod eval;
mod executor;
mod expr;
mod lexer;
mod pattern;
mod stylesheet;
mod value;

pub use executor::transform;
pub use stylesheet::Stylesheet;
