//! AnalysisReport: aggregated output of one analysis run.
//!
//! Holds the ordered diagnostics of the whole program unit plus one summary
//! per callable, in declaration order.

use crate::diagnostics::{Diagnostic, DiagnosticKind, Severity};
use serde::Serialize;

/// How far the tracker got with a callable.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallableStatus {
    Complete,
    /// Declared without a body; only its contract was checked.
    NoBody,
    /// The analyzer gave up; see the internal diagnostic.
    Incomplete,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallableSummary {
    pub callable: String,
    pub status: CallableStatus,
    /// The contract block had declaration errors and was ignored.
    pub contract_rejected: bool,
    pub diagnostics: usize,
    /// Facts holding when the body completes normally.
    pub exit_facts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub unit: String,
    pub callables: Vec<CallableSummary>,
    pub diagnostics: Vec<Diagnostic>,
    pub cancelled: bool,
}

impl AnalysisReport {
    /// Create a new empty report.
    pub fn new(unit: &str) -> Self {
        AnalysisReport {
            unit: unit.to_string(),
            callables: Vec::new(),
            diagnostics: Vec::new(),
            cancelled: false,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn count_kind(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.iter().filter(|d| d.kind == kind).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn summary(&self, callable: &str) -> Option<&CallableSummary> {
        self.callables.iter().find(|s| s.callable == callable)
    }

    pub fn diagnostics_for<'r>(
        &'r self,
        callable: &'r str,
    ) -> impl Iterator<Item = &'r Diagnostic> + 'r {
        self.diagnostics
            .iter()
            .filter(move |d| d.callable == callable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxeffects_core::SourceLocation;

    #[test]
    fn counts_by_severity_and_kind() {
        let mut r = AnalysisReport::new("unit.kt");
        r.diagnostics.push(Diagnostic::violation(
            "f",
            SourceLocation::new(1, 1),
            Severity::Warning,
            "w",
        ));
        r.diagnostics
            .push(Diagnostic::internal("g", SourceLocation::new(2, 1), "gave up"));
        assert_eq!(r.count(Severity::Warning), 2);
        assert_eq!(r.count_kind(DiagnosticKind::Internal), 1);
        assert!(!r.has_errors());
        assert_eq!(r.diagnostics_for("g").count(), 1);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&CallableStatus::NoBody).unwrap();
        assert_eq!(json, "\"no_body\"");
    }
}
