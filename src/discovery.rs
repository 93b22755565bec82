use crate::matrix::resolve_expectation;
use crate::types::{TestCase, TestKind};
use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Where and what to look for when no explicit tests are given.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub root: PathBuf,
    pub source_extension: String,
    pub config_extension: String,
}

/// Test names ending in this still compile, but warnings stay warnings.
pub const SKIP_WARNING_AS_ERROR_SUFFIX: &str = ".skip_warning_as_error";

/// Turns explicit paths into tests, or lists the top level of the test root when there are none.
pub fn discover(explicit: &[PathBuf], opts: &DiscoveryOptions) -> Result<Vec<TestCase>> {
    if !explicit.is_empty() {
        let tests = explicit
            .iter()
            .map(|p| test_case_for(p, opts))
            .collect::<Result<Vec<_>>>()?;
        warn_on_collisions(&tests);
        return Ok(tests);
    }

    let mut tests = Vec::new();
    let walker = WalkDir::new(&opts.root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry =
            entry.with_context(|| format!("failed to list tests in {}", opts.root.display()))?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            tests.push(test_case_for(path, opts)?);
        } else if entry.file_type().is_file()
            && path.extension().is_some_and(|ext| ext == opts.source_extension.as_str())
        {
            tests.push(test_case_for(path, opts)?);
        }
    }
    debug!("discovered {} tests under {}", tests.len(), opts.root.display());
    warn_on_collisions(&tests);
    Ok(tests)
}

pub fn test_case_for(path: &Path, opts: &DiscoveryOptions) -> Result<TestCase> {
    if !path.exists() {
        warn!("test input {} does not exist", path.display());
    }
    let kind = if path.is_dir() {
        TestKind::Package
    } else {
        TestKind::SingleFile
    };
    let stem = test_name(path, kind)?;
    let (name, warnings_as_errors) = match stem.strip_suffix(SKIP_WARNING_AS_ERROR_SUFFIX) {
        Some(name) => (name.to_string(), false),
        None => (stem, true),
    };
    let config = match kind {
        TestKind::SingleFile => sibling_config(path, &opts.config_extension),
        TestKind::Package => None,
    };
    Ok(TestCase {
        path: path.to_path_buf(),
        kind,
        expectation: resolve_expectation(&name),
        name,
        config,
        warnings_as_errors,
    })
}

fn test_name(path: &Path, kind: TestKind) -> Result<String> {
    let component = match kind {
        TestKind::SingleFile => path.file_stem(),
        TestKind::Package => path.file_name(),
    };
    match component {
        Some(name) if !name.is_empty() => Ok(name.to_string_lossy().into_owned()),
        _ => bail!("test input {} has no file name", path.display()),
    }
}

/// Names shared by more than one test; such tests write the same golden files.
pub fn colliding_names(tests: &[TestCase]) -> Vec<&str> {
    let mut seen = HashSet::new();
    let mut colliding = Vec::new();
    for test in tests {
        if !seen.insert(test.name.as_str()) && !colliding.contains(&test.name.as_str()) {
            colliding.push(test.name.as_str());
        }
    }
    colliding
}

fn warn_on_collisions(tests: &[TestCase]) {
    for name in colliding_names(tests) {
        warn!("more than one test is named `{name}`; they share golden files");
    }
}

fn sibling_config(path: &Path, extension: &str) -> Option<PathBuf> {
    let candidate = path.with_extension(extension);
    if candidate != path && candidate.is_file() {
        Some(candidate)
    } else {
        None
    }
}
