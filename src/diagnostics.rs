use std::fmt;

use thiserror::Error;

/// Represents a byte span within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub const fn to(self, other: SourceSpan) -> Self {
        Self {
            start: self.start,
            end: other.end,
        }
    }

    pub const fn shifted(self, offset: usize) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }

    /// 1-based line and column (in characters) of the span start.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let start = self.start.min(source.len());
        let mut line = 1;
        let mut line_start = 0;
        for (idx, ch) in source.char_indices() {
            if idx >= start {
                break;
            }
            if ch == '\n' {
                line += 1;
                line_start = idx + 1;
            }
        }
        let column = source
            .get(line_start..start)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(0)
            + 1;
        (line, column)
    }
}

/// Classification of a diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexer,
    Parser,
    Runtime,
}

impl DiagnosticKind {
    pub fn is_syntax(&self) -> bool {
        matches!(self, DiagnosticKind::Lexer | DiagnosticKind::Parser)
    }

    fn label(&self) -> &'static str {
        if self.is_syntax() {
            "syntax error"
        } else {
            "runtime error"
        }
    }
}

/// Language-level error: malformed source or a failed runtime check.
/// The interpreter that produced it stays usable.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    pub fn runtime(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticKind::Runtime, message).with_span(span)
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Renders the diagnostic for display next to `source`, resolving the
    /// span into a line and column.
    pub fn render(&self, source: &str) -> String {
        let mut out = match self.span {
            Some(span) => {
                let (line, column) = span.line_col(source);
                format!("{} at {line}:{column}: {}", self.kind.label(), self.message)
            }
            None => format!("{}: {}", self.kind.label(), self.message),
        };
        for note in &self.notes {
            out.push_str("\n  note: ");
            out.push_str(note);
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(span) = self.span {
            write!(f, " ({}..{})", span.start, span.end)?;
        }
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Failure of the execution substrate itself. After a fault the interpreter
/// state is not trusted and the instance has to be replaced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("call depth exceeded the limit of {limit} frames")]
    CallDepthExceeded { limit: usize },
    #[error("output exceeded the limit of {limit} bytes")]
    OutputLimitExceeded { limit: usize },
    #[error("internal invariant violated: {0}")]
    Internal(String),
    #[error("interpreter panicked: {0}")]
    Panic(String),
}

/// Unified error type for the Quill interpreter and its hosts.
#[derive(Debug, Error)]
pub enum QuillError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("fault: {0}")]
    Fault(#[from] Fault),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuillError {
    pub fn is_fault(&self) -> bool {
        matches!(self, QuillError::Fault(_))
    }
}

pub type Result<T> = std::result::Result<T, QuillError>;
