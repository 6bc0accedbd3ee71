//! Map-function evaluation.
//!
//! The indexer talks to an evaluator through two traits: a [`MapEngine`]
//! compiles a set of map-function sources into a [`MapContext`], and the
//! context evaluates every function against one document at a time. A
//! context owns whatever the engine allocated for it and releases it on
//! drop, so every exit path of a run frees the evaluator state.
//!
//! [`ScriptEngine`] is the built-in engine. It understands the subset of
//! JavaScript that map functions are written in: `var`, `if`/`else`,
//! `for`, `while`, `return`, member and index access, object and array
//! literals, the usual arithmetic, comparison, logical, update and compound
//! assignment operators, and the `emit`, `sum` and `decodeBase64` globals.

mod ast;
mod lexer;
mod parser;
mod runtime;

pub use runtime::{ScriptContext, ScriptEngine};

use crate::core::MapResult;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("SyntaxError: {message} in {function}")]
    Compile { function: String, message: String },

    #[error("Invalid function: {0}")]
    InvalidFunction(String),

    #[error("Document is not valid JSON: {0}")]
    InvalidDocument(String),

    #[error("Document is not a JSON object")]
    NotAnObject,

    #[error("{0}")]
    Runtime(String),

    #[error("Map function exceeded {0} loop iterations")]
    IterationLimit(u64),
}

/// Compiles map-function sources into an evaluation context.
pub trait MapEngine {
    type Context: MapContext;

    /// Compile `sources` in order. Fails if any source does not compile or
    /// does not evaluate to a function.
    fn init(&self, sources: &[String]) -> Result<Self::Context, EvalError>;
}

/// A set of compiled map functions.
pub trait MapContext {
    fn function_count(&self) -> usize;

    /// Run every function against the JSON text `doc`. The outer vector
    /// has one entry per function, in compile order; each inner vector
    /// holds that function's emitted pairs in emission order.
    fn map_doc(&mut self, doc: &str) -> Result<Vec<Vec<MapResult>>, EvalError>;
}
