use crate::types::{Dialect, ExecutionUnit, Expectation, Style, TestCase};
use std::sync::Arc;

/// Tests whose name starts with this are expected to be rejected.
pub const FAIL_PREFIX: &str = "fail-";

pub fn resolve_expectation(name: &str) -> Expectation {
    if name.starts_with(FAIL_PREFIX) {
        Expectation::Fail
    } else {
        Expectation::Succeed
    }
}

/// Styles exercised for a dialect; `None` means the dialect has no style dimension.
pub fn styles_for(dialect: Dialect) -> Vec<Option<Style>> {
    match dialect {
        Dialect::C => Style::ALL.iter().copied().map(Some).collect(),
        Dialect::Cpp => vec![None],
    }
}

/// Dialect-major plan: every unit of the first dialect for every test, then the next dialect.
pub fn expand(tests: &[TestCase], dialects: &[Dialect]) -> Vec<ExecutionUnit> {
    let shared: Vec<Arc<TestCase>> = tests.iter().cloned().map(Arc::new).collect();
    let mut units = Vec::new();
    for &dialect in dialects {
        for test in &shared {
            for style in styles_for(dialect) {
                units.push(ExecutionUnit {
                    index: units.len(),
                    test: Arc::clone(test),
                    dialect,
                    style,
                });
            }
        }
    }
    units
}
