use std::fmt;

use thiserror::Error;

/// Represents a byte span within a source file, plus the line it starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
    pub line: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize, line: usize) -> Self {
        Self { start, end, line }
    }

    /// Span covering `self` through `other`, keeping the first line.
    pub fn to(self, other: SourceSpan) -> Self {
        Self {
            start: self.start,
            end: other.end,
            line: self.line,
        }
    }
}

/// The runtime error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    UndefinedVariable,
    UndefinedProperty,
    Type,
    Arity,
    Index,
    Native,
    StackOverflow,
}

/// Classification of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexer,
    Parser,
    Resolve,
    Runtime(RuntimeErrorKind),
}

/// Rich diagnostic information surfaced to end users.
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

    pub fn runtime(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Runtime(kind), message)
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    /// Attaches `span` unless the diagnostic already points somewhere.
    pub fn or_span(mut self, span: SourceSpan) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn runtime_kind(&self) -> Option<RuntimeErrorKind> {
        match self.kind {
            DiagnosticKind::Runtime(kind) => Some(kind),
            _ => None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(span) = self.span {
            write!(f, "[line {}] ", span.line)?;
        }
        match self.kind {
            DiagnosticKind::Runtime(_) => write!(f, "{}", self.message)?,
            kind => write!(f, "{kind:?} error: {}", self.message)?,
        }
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

fn join_lines(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Unified error type for the Hoot toolchain.
#[derive(Debug, Error)]
pub enum HootError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("{}", join_lines(.0))]
    Resolve(Vec<Diagnostic>),
    #[error("{}", join_lines(.0))]
    Runtime(Vec<Diagnostic>),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HootError {
    /// Process exit code following the sysexits convention.
    pub fn exit_code(&self) -> i32 {
        match self {
            HootError::Diagnostic(_) | HootError::Resolve(_) => 65,
            HootError::Runtime(_) => 70,
            HootError::Io(_) => 74,
        }
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            HootError::Diagnostic(diag) => vec![diag.clone()],
            HootError::Resolve(diags) | HootError::Runtime(diags) => diags.clone(),
            HootError::Io(_) => Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HootError>;
