//! Host-facing entry point. A [`Runtime`] runs complete programs and sorts
//! every outcome into success, a language error, or a fault, so hosts never
//! see a panic or a raw [`QuillError`].

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::{
    diagnostics::{Fault, QuillError, Result},
    runtime::{Interpreter, InterpreterConfig},
};

/// Outcome of one [`Runtime::execute`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Everything the program printed, in order.
    Success { text: String },
    /// The program was rejected or stopped by a runtime check. Output
    /// printed before the error is discarded.
    LanguageError { text: String },
    /// The interpreter itself failed; the runtime is poisoned.
    Fault { reason: String },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, ExecutionResult::Fault { .. })
    }

    /// The printed output or error message, whichever this outcome carries.
    pub fn text(&self) -> &str {
        match self {
            ExecutionResult::Success { text } | ExecutionResult::LanguageError { text } => text,
            ExecutionResult::Fault { reason } => reason,
        }
    }
}

/// Creates a runtime with the default configuration.
pub fn initialize() -> Runtime {
    Runtime::new()
}

#[derive(Debug, Default)]
pub struct Runtime {
    config: InterpreterConfig,
    poisoned: Option<String>,
    executions: u64,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        Self {
            config,
            poisoned: None,
            executions: 0,
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Number of `execute` calls made on this runtime.
    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Runs `source` as a complete program. Each call starts from an empty
    /// root scope; nothing carries over from earlier calls.
    pub fn execute(&mut self, source: &str) -> ExecutionResult {
        self.executions += 1;
        if let Some(reason) = &self.poisoned {
            warn!(%reason, "execute called on a poisoned runtime");
            return ExecutionResult::Fault {
                reason: format!("runtime is poisoned by an earlier fault: {reason}"),
            };
        }
        debug!(
            execution = self.executions,
            bytes = source.len(),
            "executing program"
        );

        let config = self.config.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_program(source, config)));
        match outcome {
            Ok(Ok(text)) => {
                debug!(bytes = text.len(), "program finished");
                ExecutionResult::Success { text }
            }
            Ok(Err(QuillError::Diagnostic(diagnostic))) => {
                debug!(kind = ?diagnostic.kind, message = %diagnostic.message, "program failed");
                ExecutionResult::LanguageError {
                    text: diagnostic.render(source),
                }
            }
            Ok(Err(QuillError::Fault(fault))) => self.poison(fault),
            Ok(Err(QuillError::Io(err))) => self.poison(Fault::Internal(err.to_string())),
            Err(payload) => self.poison(Fault::Panic(panic_message(payload.as_ref()))),
        }
    }

    fn poison(&mut self, fault: Fault) -> ExecutionResult {
        let reason = fault.to_string();
        warn!(%reason, "interpreter fault, runtime poisoned");
        self.poisoned = Some(reason.clone());
        ExecutionResult::Fault { reason }
    }
}

fn run_program(source: &str, config: InterpreterConfig) -> Result<String> {
    let echo = config.echo_result;
    let mut interpreter = Interpreter::with_config(config);
    let value = interpreter.eval_source(source)?;
    let mut text = interpreter.take_output();
    if echo && !value.is_null() {
        text.push_str(&value.to_string());
        text.push('\n');
    }
    Ok(text)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
