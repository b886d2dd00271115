// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases:
// the typed `LangError` accumulated by resolution passes and the
// user-facing `Diagnostic` every phase converts into for reporting.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::ast::{Span, Tree};
use crate::id::NodeId;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `W0300`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes.
pub mod codes {
    use super::DiagCode;

    pub const E0001: DiagCode = DiagCode("E0001"); // syntax error
    pub const E0100: DiagCode = DiagCode("E0100"); // undeclared symbol
    pub const E0101: DiagCode = DiagCode("E0101"); // duplicate symbol
    pub const E0102: DiagCode = DiagCode("E0102"); // unknown type
    pub const E0200: DiagCode = DiagCode("E0200"); // invalid type
    pub const E0201: DiagCode = DiagCode("E0201"); // invalid index type
    pub const E0202: DiagCode = DiagCode("E0202"); // array index out of range
    pub const E0300: DiagCode = DiagCode("E0300"); // bundle size mismatch
    pub const E0301: DiagCode = DiagCode("E0301"); // stream member size mismatch
    pub const E0302: DiagCode = DiagCode("E0302"); // constraint failure
    pub const E0400: DiagCode = DiagCode("E0400"); // invalid port
    pub const E0401: DiagCode = DiagCode("E0401"); // invalid port type
    pub const E0500: DiagCode = DiagCode("E0500"); // domain mismatch
    pub const E0600: DiagCode = DiagCode("E0600"); // library load failure
    pub const W0100: DiagCode = DiagCode("W0100"); // unresolved domain
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub line: u32,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            line: 0,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the 1-based source line.
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if self.line > 0 {
            write!(f, " (line {})", self.line)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

// ── Language errors ──────────────────────────────────────────────────────

/// Kind of a hard resolution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    SyntaxError,
    UndeclaredSymbol,
    DuplicateSymbol,
    UnknownType,
    InvalidType,
    InvalidIndexType,
    ArrayIndexOutOfRange,
    BundleSizeMismatch,
    StreamMemberSizeMismatch,
    ConstraintFail,
    InvalidPort,
    InvalidPortType,
    DomainMismatch,
}

impl ErrorKind {
    pub fn code(self) -> DiagCode {
        match self {
            ErrorKind::SyntaxError => codes::E0001,
            ErrorKind::UndeclaredSymbol => codes::E0100,
            ErrorKind::DuplicateSymbol => codes::E0101,
            ErrorKind::UnknownType => codes::E0102,
            ErrorKind::InvalidType => codes::E0200,
            ErrorKind::InvalidIndexType => codes::E0201,
            ErrorKind::ArrayIndexOutOfRange => codes::E0202,
            ErrorKind::BundleSizeMismatch => codes::E0300,
            ErrorKind::StreamMemberSizeMismatch => codes::E0301,
            ErrorKind::ConstraintFail => codes::E0302,
            ErrorKind::InvalidPort => codes::E0400,
            ErrorKind::InvalidPortType => codes::E0401,
            ErrorKind::DomainMismatch => codes::E0500,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "syntax error",
            ErrorKind::UndeclaredSymbol => "undeclared symbol",
            ErrorKind::DuplicateSymbol => "duplicate symbol",
            ErrorKind::UnknownType => "unknown type",
            ErrorKind::InvalidType => "invalid type",
            ErrorKind::InvalidIndexType => "invalid index type",
            ErrorKind::ArrayIndexOutOfRange => "array index out of range",
            ErrorKind::BundleSizeMismatch => "bundle size mismatch",
            ErrorKind::StreamMemberSizeMismatch => "stream member size mismatch",
            ErrorKind::ConstraintFail => "constraint failed",
            ErrorKind::InvalidPort => "invalid port",
            ErrorKind::InvalidPortType => "invalid port type",
            ErrorKind::DomainMismatch => "domain mismatch",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed resolution error: kind, source line, and the offending tokens.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{kind} at line {line}: {}", .tokens.join(" "))]
pub struct LangError {
    pub kind: ErrorKind,
    pub line: u32,
    pub tokens: Vec<String>,
    #[serde(skip)]
    pub span: Span,
}

impl LangError {
    pub fn new(kind: ErrorKind, line: u32, tokens: Vec<String>) -> Self {
        LangError {
            kind,
            line,
            tokens,
            span: Span::default(),
        }
    }

    /// Error located at `node`.
    pub fn at(kind: ErrorKind, tree: &Tree, node: NodeId, tokens: Vec<String>) -> Self {
        let n = tree.node(node);
        LangError {
            kind,
            line: n.line,
            tokens,
            span: n.span,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let message = format!("{}: {}", self.kind, self.tokens.join(" "));
        let diag = Diagnostic::new(DiagLevel::Error, self.span, message)
            .with_code(self.kind.code())
            .with_line(self.line);
        match self.kind {
            ErrorKind::UndeclaredSymbol => {
                diag.with_hint("declare the symbol or import the library that provides it")
            }
            ErrorKind::DomainMismatch => {
                diag.with_hint("add a connector for this domain pair to the connector table")
            }
            ErrorKind::StreamMemberSizeMismatch => {
                diag.with_hint("adjacent sizes must be equal, divisible, or 1")
            }
            _ => diag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        Span::new(0, 1)
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_line() {
        let d = Diagnostic::new(DiagLevel::Warning, dummy_span(), "unresolved domain")
            .with_code(codes::W0100)
            .with_line(3);
        assert_eq!(format!("{d}"), "warning[W0100]: unresolved domain (line 3)");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "type mismatch")
            .with_code(codes::E0200)
            .with_hint("use a real literal")
            .with_related(dummy_span(), "declared here");

        assert_eq!(d.code, Some(DiagCode("E0200")));
        assert_eq!(d.hint.as_deref(), Some("use a real literal"));
        assert_eq!(d.related_spans.len(), 1);
    }

    #[test]
    fn lang_error_display() {
        let err = LangError::new(ErrorKind::UndeclaredSymbol, 4, vec!["Foo".to_string()]);
        assert_eq!(err.to_string(), "undeclared symbol at line 4: Foo");
    }

    #[test]
    fn lang_error_to_diagnostic() {
        let err = LangError::new(
            ErrorKind::DomainMismatch,
            2,
            vec!["Audio".to_string(), "OSC".to_string()],
        );
        let diag = err.to_diagnostic();
        assert_eq!(diag.code, Some(codes::E0500));
        assert!(diag.is_error());
        assert_eq!(diag.line, 2);
        assert_eq!(diag.message, "domain mismatch: Audio OSC");
        assert!(diag.hint.is_some());
    }

    #[test]
    fn lang_error_serializes_without_span() {
        let err = LangError::new(ErrorKind::ConstraintFail, 1, vec!["B".to_string()]);
        let json = serde_json::to_string(&err).expect("serialize");
        assert_eq!(
            json,
            r#"{"kind":"ConstraintFail","line":1,"tokens":["B"]}"#
        );
    }
}
