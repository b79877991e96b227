//! Integration Test: Runtime Hygiene
//!
//! Production code in the core and daemon must never park a runtime worker:
//! - Quota windows are computed from a clock, so nothing needs to sleep
//! - All I/O inside `async fn` goes through tokio or async reqwest
//!
//! Blocking file reads are fine in synchronous functions that run before the
//! runtime starts (config loading).

use architectural_enforcement::{
    scan_production, workspace_root, Violation, BLOCKING_IO_RULES, PRODUCTION_DIRS, SLEEP_RULES,
};

fn report(kind: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {kind} found in production code:\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }

    panic!(
        "\nFound {} {kind} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[test]
fn test_production_dirs_exist() {
    let root = workspace_root();
    for dir in PRODUCTION_DIRS {
        assert!(root.join(dir).is_dir(), "missing source dir {dir}");
    }
}

#[test]
fn test_no_sleep_in_production_code() {
    report("sleep calls", &scan_production(SLEEP_RULES));
}

#[test]
fn test_no_blocking_io_in_production_code() {
    report("blocking I/O", &scan_production(BLOCKING_IO_RULES));
}
