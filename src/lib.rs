//! Core library for the Hoot scripting language: a tree-walking evaluator
//! with closures, single-inheritance classes and a cooperative event loop
//! that runs native callbacks after the script body finishes.

pub mod ast;
pub mod diagnostics;
pub mod environment;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod resolver;
pub mod runtime;
pub mod scheduler;
pub mod stdlib;
pub mod value;

pub use diagnostics::{Diagnostic, DiagnosticKind, HootError, RuntimeErrorKind, SourceSpan};
pub use repl::Repl;
pub use runtime::{ExecutionContext, Interpreter, OutputSink};
pub use scheduler::{ClockMode, Scheduler};
pub use value::Value;
