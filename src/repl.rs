use rustyline::{error::ReadlineError, DefaultEditor};
use tracing::debug;

use crate::{
    diagnostics::{HootError, Result},
    runtime::{ExecutionContext, Interpreter},
};

const PROMPT: &str = "> ";

/// Line-at-a-time session. Each line runs to completion, event loop
/// included, before the next prompt; globals persist between lines.
pub struct Repl {
    interpreter: Interpreter,
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}

impl Repl {
    pub fn new() -> Self {
        Self::with_context(ExecutionContext::default())
    }

    pub fn with_context(context: ExecutionContext) -> Self {
        Self {
            interpreter: Interpreter::with_context(context),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(readline_error)?;
        loop {
            match editor.readline(PROMPT) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed == ":quit" || trimmed == ":exit" {
                        break;
                    }
                    if trimmed.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(trimmed).ok();
                    self.eval_line(trimmed);
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(readline_error(err)),
            }
        }
        Ok(())
    }

    /// Runs one line. Static errors are printed here; runtime errors were
    /// already reported by the interpreter.
    pub fn eval_line(&mut self, line: &str) {
        match self.interpreter.eval_source(line) {
            Ok(()) => {}
            Err(HootError::Runtime(errors)) => debug!(count = errors.len(), "line failed"),
            Err(other) => eprintln!("{other}"),
        }
    }
}

fn readline_error(err: ReadlineError) -> HootError {
    HootError::from(std::io::Error::other(err))
}
