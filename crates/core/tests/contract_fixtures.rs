//! Contract tables built from the conformance program units.

use ctxeffects_core::{
    build_contract_table, load_program, ContractClause, EffectRegistry, FileSystemProvider,
    InvocationKind, Program,
};
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

fn load(fixture: &str) -> Program {
    let path = workspace_root().join(fixture);
    load_program(&FileSystemProvider, &path)
        .unwrap_or_else(|e| panic!("could not load {}: {}", fixture, e))
}

#[test]
fn all_samples_have_valid_contracts() {
    for sample in [
        "transactions",
        "dsl_marker",
        "safe_builders",
        "dsl_marker_safe_builders",
        "checked_exceptions",
    ] {
        let program = load(&format!("conformance/samples/{}.json", sample));
        let table = build_contract_table(&program, &EffectRegistry::default());
        assert!(
            table.errors().is_empty(),
            "{}: unexpected declaration errors: {:?}",
            sample,
            table.errors()
        );
    }
}

#[test]
fn builder_contract_declares_three_expectations() {
    let program = load("conformance/samples/safe_builders.json");
    let table = build_contract_table(&program, &EffectRegistry::default());
    let build = table.get("build").expect("build has a contract");
    assert_eq!(build.invocation_kind("init"), Some(InvocationKind::ExactlyOnce));
    let callees: Vec<_> = build
        .expectations("init")
        .iter()
        .map(|c| c.callee.as_str())
        .collect();
    assert_eq!(
        callees,
        vec![
            "XYZBuilder.setValX",
            "XYZBuilder.setVarY",
            "XYZBuilder.setDefaultValZ"
        ]
    );
}

#[test]
fn qualified_exception_names_are_shortened() {
    let program = load("conformance/samples/checked_exceptions.json");
    let table = build_contract_table(&program, &EffectRegistry::default());
    let contract = table
        .get("throwsFileNotFoundException")
        .expect("contract present");
    assert!(matches!(
        contract.clauses.as_slice(),
        [ContractClause::Requires(e)] if e.token() == "FileNotFoundException"
    ));
}

#[test]
fn every_invalid_callable_is_rejected_once() {
    let program = load("conformance/declarations/invalid_contracts.json");
    let table = build_contract_table(&program, &EffectRegistry::default());
    assert_eq!(table.errors().len(), 12);
    for callable in program.callables.iter().filter(|c| !c.contract.is_empty()) {
        let id = callable.id();
        assert!(table.is_rejected(&id), "{} should be rejected", id);
        assert!(table.get(&id).is_none());
    }
    assert!(!table.is_rejected("user"));
}
