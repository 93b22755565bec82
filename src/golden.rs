use crate::types::{Dialect, ExecutionUnit, Style};
use anyhow::{Context, Result};
use difference::{Changeset, Difference};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

const MAX_DIFF_LINES: usize = 20;

/// Golden artifact location for one (name, dialect, style).
///
/// The by-type C style is the canonical one and lives at the root; the other C
/// styles get their own subdirectory. C++ output has no style dimension.
pub fn golden_path(root: &Path, name: &str, dialect: Dialect, style: Option<Style>) -> PathBuf {
    let file = format!("{name}.{}", dialect.extension());
    match (dialect, style) {
        (Dialect::C, Some(style @ (Style::Tag | Style::Both))) => {
            root.join(style.as_str()).join(file)
        }
        _ => root.join(file),
    }
}

pub fn golden_path_for(root: &Path, unit: &ExecutionUnit) -> PathBuf {
    golden_path(root, &unit.test.name, unit.dialect, unit.style)
}

/// Private per-unit paths inside the run's scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchPaths {
    pub artifact: PathBuf,
    pub object: PathBuf,
}

impl ScratchPaths {
    pub fn for_unit(scratch_dir: &Path, unit: &ExecutionUnit) -> Self {
        let ext = unit.dialect.extension();
        let stem = match unit.style {
            Some(style) => format!("{}-{}-{ext}-{style}", unit.index, unit.test.name),
            None => format!("{}-{}-{ext}", unit.index, unit.test.name),
        };
        Self {
            artifact: scratch_dir.join(format!("{stem}.{ext}")),
            object: scratch_dir.join(format!("{stem}.o")),
        }
    }
}

/// Removes the file when dropped, whatever path the caller returned through.
#[derive(Debug)]
pub struct RemoveOnDrop {
    path: Option<PathBuf>,
}

impl RemoveOnDrop {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Keeps the file.
    pub fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            remove_if_exists(&path);
        }
    }
}

/// Puts a golden file back the way it was found unless disarmed: the old
/// bytes are rewritten, or a file that did not exist before is removed.
#[derive(Debug)]
pub struct RestoreOnDrop {
    path: Option<PathBuf>,
    original: Option<Vec<u8>>,
}

impl RestoreOnDrop {
    pub fn capture(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let original = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        Ok(Self {
            path: Some(path),
            original,
        })
    }

    /// Keeps whatever is at the path now.
    pub fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for RestoreOnDrop {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match self.original.take() {
            Some(bytes) => {
                if let Err(e) = fs::write(&path, bytes) {
                    warn!("could not restore {}: {}", path.display(), e);
                }
            }
            None => remove_if_exists(&path),
        }
    }
}

pub fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("could not remove {}: {}", path.display(), e);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    Match,
    Mismatch(String),
    MissingGolden,
}

impl Comparison {
    pub fn matched(&self) -> bool {
        matches!(self, Comparison::Match)
    }

    pub fn describe(&self) -> Option<String> {
        match self {
            Comparison::Match => None,
            Comparison::Mismatch(detail) => Some(detail.clone()),
            Comparison::MissingGolden => Some("golden file missing".to_string()),
        }
    }
}

/// Byte-exact comparison of a regenerated artifact against its golden file.
pub fn compare(generated: &Path, golden: &Path) -> Result<Comparison> {
    let actual = fs::read(generated)
        .with_context(|| format!("failed to read generated artifact {}", generated.display()))?;
    let expected = match fs::read(golden) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Comparison::MissingGolden),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read golden file {}", golden.display()));
        }
    };
    Ok(compare_bytes(&expected, &actual))
}

pub fn compare_bytes(expected: &[u8], actual: &[u8]) -> Comparison {
    if expected == actual {
        return Comparison::Match;
    }
    let offset = expected
        .iter()
        .zip(actual)
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| expected.len().min(actual.len()));
    let mut detail = format!(
        "content differs from golden file at byte {offset} (golden {} bytes, generated {} bytes)",
        expected.len(),
        actual.len()
    );
    if let (Ok(expected), Ok(actual)) =
        (std::str::from_utf8(expected), std::str::from_utf8(actual))
    {
        detail.push_str(&line_diff(expected, actual));
    }
    Comparison::Mismatch(detail)
}

fn line_diff(expected: &str, actual: &str) -> String {
    let changeset = Changeset::new(expected, actual, "\n");
    let mut out = String::new();
    let mut shown = 0;
    for diff in &changeset.diffs {
        let (sign, text) = match diff {
            Difference::Same(_) => continue,
            Difference::Rem(text) => ('-', text),
            Difference::Add(text) => ('+', text),
        };
        for line in text.lines() {
            if shown == MAX_DIFF_LINES {
                out.push_str("\n  ...");
                return out;
            }
            out.push_str(&format!("\n  {sign} {line}"));
            shown += 1;
        }
    }
    out
}
