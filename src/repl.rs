use rustyline::{DefaultEditor, error::ReadlineError};

use crate::{
    bridge::{ExecutionResult, Runtime},
    diagnostics::{QuillError, Result},
    lexer::{Lexer, TokenKind},
    runtime::InterpreterConfig,
};

/// Printed once when the REPL starts.
pub const BANNER: &str = "quill repl: each entry runs as a separate program, \
so bindings do not carry over between entries. Type :quit to leave.";

/// Line-oriented front end. Input is buffered until brackets balance, then
/// executed as one program.
pub struct Repl {
    runtime: Runtime,
}

impl Repl {
    pub fn new(config: InterpreterConfig) -> Self {
        Self {
            runtime: Runtime::with_config(config),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(readline_error)?;
        let mut buffer = String::new();
        println!("{BANNER}");
        loop {
            let prompt = if buffer.is_empty() { ">> " } else { ".. " };
            match editor.readline(prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if buffer.is_empty() {
                        if trimmed == ":quit" || trimmed == ":exit" {
                            break;
                        }
                        if trimmed.is_empty() {
                            continue;
                        }
                    }
                    buffer.push_str(&line);
                    buffer.push('\n');
                    if is_incomplete(&buffer) {
                        continue;
                    }
                    editor.add_history_entry(buffer.trim_end()).ok();
                    let source = std::mem::take(&mut buffer);
                    self.submit(&source);
                }
                Err(ReadlineError::Interrupted) if !buffer.is_empty() => buffer.clear(),
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(readline_error(err)),
            }
        }
        Ok(())
    }

    fn submit(&mut self, source: &str) {
        match self.runtime.execute(source) {
            ExecutionResult::Success { text } => print!("{text}"),
            ExecutionResult::LanguageError { text } => eprintln!("{text}"),
            ExecutionResult::Fault { reason } => {
                eprintln!("fault: {reason}");
                eprintln!("interpreter restarted");
                self.runtime = Runtime::with_config(self.runtime.config().clone());
            }
        }
    }
}

/// True when `source` ends inside a string, template or open bracket.
pub fn is_incomplete(source: &str) -> bool {
    let tokens = match Lexer::new(source).tokenize() {
        Ok(tokens) => tokens,
        Err(diagnostic) => return diagnostic.message.starts_with("unterminated"),
    };
    let mut depth = 0i64;
    for token in &tokens {
        match token.kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => depth -= 1,
            _ => {}
        }
    }
    depth > 0
}

fn readline_error(err: ReadlineError) -> QuillError {
    QuillError::from(std::io::Error::other(err))
}
