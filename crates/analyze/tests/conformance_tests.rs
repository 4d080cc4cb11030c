//! Integration tests over the conformance samples.
//!
//! Every `conformance/**/<name>.json` program unit has a sibling
//! `<name>.expected.json` listing the diagnostics the analyzer must emit:
//! exactly those, each matched by location, kind and a message fragment.

use ctxeffects_analyze::{analyze, AnalysisReport, AnalyzerConfig, CallableStatus, DiagnosticKind};
use ctxeffects_core::{load_program, FileSystemProvider, Program};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Locate the workspace root.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

#[derive(Debug, Deserialize)]
struct Expected {
    line: u32,
    column: u32,
    kind: DiagnosticKind,
    contains: String,
}

fn load_fixture(fixture: &str) -> Program {
    let path = workspace_root().join(fixture);
    load_program(&FileSystemProvider, &path).unwrap_or_else(|e| {
        panic!("could not load {}: {}", fixture, e);
    })
}

fn expected_for(fixture: &str) -> Vec<Expected> {
    let path = workspace_root().join(fixture.replace(".json", ".expected.json"));
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("missing {}: {}", path.display(), e));
    serde_json::from_str(&text).expect("expected diagnostics parse")
}

fn analyze_fixture(fixture: &str) -> AnalysisReport {
    analyze(&load_fixture(fixture), &AnalyzerConfig::default())
}

/// Every expected entry matches one distinct diagnostic and nothing is left over.
fn assert_conforms(fixture: &str) -> AnalysisReport {
    let report = analyze_fixture(fixture);
    let expected = expected_for(fixture);
    let mut unmatched: Vec<_> = report.diagnostics.iter().collect();

    for e in &expected {
        let found = unmatched.iter().position(|d| {
            d.location.line == e.line
                && d.location.column == e.column
                && d.kind == e.kind
                && d.message.contains(&e.contains)
        });
        match found {
            Some(i) => {
                unmatched.remove(i);
            }
            None => panic!(
                "{}: no diagnostic at {}:{} containing {:?}; got:\n{}",
                fixture,
                e.line,
                e.column,
                e.contains,
                render(&report)
            ),
        }
    }
    assert!(
        unmatched.is_empty(),
        "{}: unexpected diagnostics:\n{}",
        fixture,
        unmatched
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    );
    report
}

fn render(report: &AnalysisReport) -> String {
    report
        .diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

// ──────────────────────────────────────────────
// Open/close: transactions
// ──────────────────────────────────────────────

#[test]
fn transactions_conform() {
    let report = assert_conforms("conformance/samples/transactions.json");
    for clean in [
        "transactionTest1",
        "reuseTransactionTest",
        "conditionalCommit",
        "retryLoop",
    ] {
        assert_eq!(
            report.diagnostics_for(clean).count(),
            0,
            "{} should be clean:\n{}",
            clean,
            render(&report)
        );
    }
}

#[test]
fn aliased_transaction_is_a_distinct_reference() {
    let report = analyze_fixture("conformance/samples/transactions.json");
    let messages: Vec<_> = report
        .diagnostics_for("aliasingTest")
        .map(|d| d.message.as_str())
        .collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("'transaction2' is not in state OpenedTransaction"));
    assert!(messages[1].contains("'transaction1' must be closed"));
}

#[test]
fn transaction_members_complete_without_findings() {
    let report = analyze_fixture("conformance/samples/transactions.json");
    let commit = report.summary("Transaction.commit").expect("commit summary");
    assert_eq!(commit.status, CallableStatus::Complete);
    assert!(!commit.contract_rejected);
    assert!(!report.has_errors(), "violations default to warnings");
}

// ──────────────────────────────────────────────
// DSL markers
// ──────────────────────────────────────────────

#[test]
fn dsl_marker_conforms() {
    let report = assert_conforms("conformance/samples/dsl_marker.json");
    assert_eq!(report.diagnostics_for("DslMarkerTest1").count(), 0);
    assert_eq!(report.diagnostics_for("test_2").count(), 1);
}

// ──────────────────────────────────────────────
// Call counts: safe builders
// ──────────────────────────────────────────────

#[test]
fn safe_builders_conform() {
    let report = assert_conforms("conformance/samples/safe_builders.json");
    for clean in [
        "buildersTest1",
        "buildersTest2",
        "builderInstance",
        "branchingBuilder",
    ] {
        assert_eq!(report.diagnostics_for(clean).count(), 0, "{}", clean);
    }
}

#[test]
fn over_called_setter_reports_observed_range() {
    let report = analyze_fixture("conformance/samples/safe_builders.json");
    let message = report
        .diagnostics_for("buildersTest3")
        .map(|d| d.message.as_str())
        .find(|m| m.contains("setDefaultValZ"))
        .expect("setDefaultValZ diagnostic");
    assert!(message.ends_with("but is called 2 times"), "{}", message);
}

#[test]
fn dsl_marker_with_safe_builders_conforms() {
    let report = assert_conforms("conformance/samples/dsl_marker_safe_builders.json");
    assert_eq!(report.diagnostics_for("SBDslMarkerTest1").count(), 0);
}

// ──────────────────────────────────────────────
// Exception catching
// ──────────────────────────────────────────────

#[test]
fn checked_exceptions_conform() {
    let report = assert_conforms("conformance/samples/checked_exceptions.json");
    assert_eq!(report.diagnostics_for("alsoThrowsException").count(), 0);
    assert_eq!(report.diagnostics_for("myCatchIOException").count(), 0);
}

// ──────────────────────────────────────────────
// Declaration errors
// ──────────────────────────────────────────────

#[test]
fn invalid_contracts_conform() {
    let report = assert_conforms("conformance/declarations/invalid_contracts.json");
    assert_eq!(report.count_kind(DiagnosticKind::Declaration), 12);
    assert!(report.has_errors());
}

#[test]
fn rejected_contracts_are_transparent_to_callers() {
    let report = analyze_fixture("conformance/declarations/invalid_contracts.json");
    assert!(report.summary("startsMarker").is_some_and(|s| s.contract_rejected));
    assert_eq!(report.diagnostics_for("user").count(), 0);
    assert!(report.summary("user").is_some_and(|s| !s.contract_rejected));
}

// ──────────────────────────────────────────────
// Run-level behavior
// ──────────────────────────────────────────────

#[test]
fn parallel_jobs_produce_identical_reports() {
    let program = load_fixture("conformance/samples/dsl_marker_safe_builders.json");
    let sequential = analyze(&program, &AnalyzerConfig::default());
    let parallel = analyze(
        &program,
        &AnalyzerConfig {
            jobs: 4,
            ..AnalyzerConfig::default()
        },
    );
    assert_eq!(sequential.diagnostics, parallel.diagnostics);
}

#[test]
fn analysis_is_deterministic_across_runs() {
    let program = load_fixture("conformance/samples/transactions.json");
    let first = analyze(&program, &AnalyzerConfig::default());
    let second = analyze(&program, &AnalyzerConfig::default());
    assert_eq!(first.diagnostics, second.diagnostics);
}

#[test]
fn nesting_limit_turns_into_internal_diagnostic() {
    let program = load_fixture("conformance/samples/dsl_marker.json");
    let config = AnalyzerConfig {
        max_nesting_depth: 2,
        ..AnalyzerConfig::default()
    };
    let report = analyze(&program, &config);
    let summary = report.summary("DslMarkerTest1").expect("summary");
    assert_eq!(summary.status, CallableStatus::Incomplete);
    assert!(report
        .diagnostics_for("DslMarkerTest1")
        .all(|d| d.kind == DiagnosticKind::Internal));
}
