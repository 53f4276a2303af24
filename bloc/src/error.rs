use std::fmt;

use codespan_reporting::diagnostic::{Diagnostic, Label};

use crate::ast::Span;

/// Which stage of compilation rejected the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed token sequence.
    Syntax,
    /// Duplicate struct/variable name within one scope.
    Definition,
    /// Unknown name or unknown type.
    Resolution,
    /// Literal/target mismatch or an illegal reference operation.
    Type,
    /// A command appeared in a grammatical position that requires a
    /// different command kind.
    Internal,
}

impl ErrorKind {
    fn label(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Definition => "definition error",
            ErrorKind::Resolution => "resolution error",
            ErrorKind::Type => "type error",
            ErrorKind::Internal => "internal invariant error",
        }
    }
}

/// Compile errors with source location information. All errors are
/// fail-fast: the first one raised aborts the whole compilation.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub file_id: usize,
    pub notes: Vec<String>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, span: Span, file_id: usize) -> Self {
        CompileError {
            kind,
            message: message.into(),
            span,
            file_id,
            notes: Vec::new(),
        }
    }

    pub fn syntax(message: impl Into<String>, span: Span, file_id: usize) -> Self {
        Self::new(ErrorKind::Syntax, message, span, file_id)
    }

    pub fn definition(message: impl Into<String>, span: Span, file_id: usize) -> Self {
        Self::new(ErrorKind::Definition, message, span, file_id)
    }

    pub fn resolution(message: impl Into<String>, span: Span, file_id: usize) -> Self {
        Self::new(ErrorKind::Resolution, message, span, file_id)
    }

    pub fn type_error(message: impl Into<String>, span: Span, file_id: usize) -> Self {
        Self::new(ErrorKind::Type, message, span, file_id)
    }

    pub fn internal(message: impl Into<String>, span: Span, file_id: usize) -> Self {
        Self::new(ErrorKind::Internal, message, span, file_id)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Convert to a codespan-reporting Diagnostic for display.
    pub fn to_diagnostic(&self) -> Diagnostic<usize> {
        Diagnostic::error()
            .with_message(format!("{}: {}", self.kind.label(), self.message))
            .with_labels(vec![Label::primary(self.file_id, self.span.clone())])
            .with_notes(self.notes.clone())
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::error::Error for CompileError {}
