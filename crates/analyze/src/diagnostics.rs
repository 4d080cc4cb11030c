//! Diagnostics and the ordered, de-duplicated emitter.

use ctxeffects_core::{DeclError, SourceLocation};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    /// Malformed contract declaration.
    Declaration,
    /// Effect obligation not met at a use site.
    Violation,
    /// The analyzer gave up on a callable.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub location: SourceLocation,
    pub severity: Severity,
    pub kind: DiagnosticKind,
    /// Id of the callable the diagnostic belongs to.
    pub callable: String,
    pub message: String,
}

impl Diagnostic {
    pub fn violation(
        callable: &str,
        location: SourceLocation,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            location,
            severity,
            kind: DiagnosticKind::Violation,
            callable: callable.to_string(),
            message: message.into(),
        }
    }

    pub fn declaration(error: &DeclError) -> Self {
        let message = match &error.clause {
            Some(clause) => format!("{} (in `{}`)", error.message, clause),
            None => error.message.clone(),
        };
        Diagnostic {
            location: error.location,
            severity: Severity::Error,
            kind: DiagnosticKind::Declaration,
            callable: error.callable.clone(),
            message,
        }
    }

    pub fn internal(callable: &str, location: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic {
            location,
            severity: Severity::Warning,
            kind: DiagnosticKind::Internal,
            callable: callable.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}: {} [{}]",
            self.location, self.severity, self.message, self.callable
        )
    }
}

/// Collects diagnostics; [`finish`](Self::finish) sorts by location then
/// message and drops repeated `(location, message)` pairs.
#[derive(Debug, Default)]
pub struct DiagnosticEmitter {
    items: Vec<Diagnostic>,
}

impl DiagnosticEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.items.extend(diagnostics);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn finish(mut self) -> Vec<Diagnostic> {
        self.items.sort_by(|a, b| {
            (a.location, &a.message, a.severity).cmp(&(b.location, &b.message, b.severity))
        });
        self.items
            .dedup_by(|later, kept| later.location == kept.location && later.message == kept.message);
        self.items
    }
}
