use std::fmt;

use thiserror::Error;

use crate::source::Span;

/// A structural problem found by the verifier in a lowered function.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationErrorKind {
    MissingEpilogue,
    DuplicateEpilogue,
    UnsyncedExit,
    MissingFrame,
    UnresolvedLabel,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    // spawn legality
    SpawnPlacement,
    MultipleSpawns,
    ConsecutiveSpawn,
    NestedSpawn,
    SpawnNotCall,
    SpawnOutsideFunction,
    SpawnUnevaluated,
    SpawnInElemental,
    SpawnResultMismatch,
    // _Cilk_for legality
    InvalidControlVariable,
    ControlVariableModified,
    InvalidCondition,
    InvalidIncrement,
    InconsistentDirection,
    ZeroStride,
    InvalidBounds,
    JumpOutOfParallelLoop,
    InvalidGrainsize,
    // warnings
    ControlVariableAliased,
    NegativeGrainsize,
    TripCountWraps,
    SignednessMismatch,
}

/// A legality error or warning produced while lowering one function.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub function: String,
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            function: String::new(),
            span: Span::default(),
            message: message.into(),
        }
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, message)
        }
    }

    #[must_use]
    pub fn at(mut self, function: &str, span: Span) -> Self {
        self.function = function.to_string();
        if self.span == Span::default() {
            self.span = span;
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if self.function.is_empty() {
            write!(f, "{}:{}: {level}: {}", self.span.line, self.span.col, self.message)
        } else {
            write!(
                f,
                "{}:{}: {level} in '{}': {}",
                self.span.line, self.span.col, self.function, self.message
            )
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("lowering rejected: {}", format_diagnostics(.0))]
    Rejected(Vec<Diagnostic>),

    #[error("Errors: {0:#?}")]
    InvalidLowering(Vec<ValidationError>),

    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Render error: {0}")]
    RenderError(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<Vec<ValidationError>> for Error {
    fn from(errors: Vec<ValidationError>) -> Self {
        Error::InvalidLowering(errors)
    }
}

impl From<Vec<Diagnostic>> for Error {
    fn from(diagnostics: Vec<Diagnostic>) -> Self {
        Error::Rejected(diagnostics)
    }
}
