//! The script language: a small, expression-oriented subset of Python
//! covering the dataframe idioms generated analysis code relies on.
//!
//! Scripts are sequences of expression statements and assignments. There are
//! no imports, no function definitions and no block statements; anything
//! outside the language surfaces as a [`ScriptError`] rather than a crash.

pub mod ast;
mod error;
mod lexer;
mod parser;

pub use error::{ErrorClass, ScriptError, ScriptResult};
pub use parser::parse;
