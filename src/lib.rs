//! Core library for the Quill scripting language: lexing, parsing,
//! evaluation, and the host bridge used by the CLI and REPL.

pub mod ast;
pub mod bridge;
pub mod diagnostics;
pub mod environment;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod stack;
pub mod stdlib;
pub mod value;

pub use bridge::{ExecutionResult, Runtime, initialize};
pub use diagnostics::{Diagnostic, DiagnosticKind, Fault, QuillError, SourceSpan};
pub use repl::Repl;
pub use runtime::{Interpreter, InterpreterConfig};
