#![allow(dead_code)]

use anyhow::{Result, anyhow};
use genconform::backend::{Exit, GeneratorOptions, Toolchain};
use genconform::types::{Dialect, ExecutionUnit, TestCase, TestKind};
use genconform::matrix::resolve_expectation;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Behaviour is keyed off the test name:
/// `reject` -> generator exits non-zero, `partial` -> writes half a file then exits non-zero,
/// `broken` -> output doesn't compile, `hang` -> generator times out.
#[derive(Default)]
pub struct MockToolchain {
    /// Appended to every artifact, to simulate a changed generator.
    pub drift: String,
    pub generated: Mutex<Vec<(PathBuf, GeneratorOptions)>>,
    pub compiled: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl MockToolchain {
    pub fn with_drift(drift: &str) -> Self {
        Self {
            drift: drift.to_string(),
            ..Self::default()
        }
    }

    pub fn generated_outputs(&self) -> Vec<PathBuf> {
        self.generated.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn verify_flags(&self) -> Vec<bool> {
        self.generated.lock().unwrap().iter().map(|(_, o)| o.verify).collect()
    }

    pub fn objects(&self) -> Vec<PathBuf> {
        self.compiled.lock().unwrap().iter().map(|(_, o)| o.clone()).collect()
    }
}

impl Toolchain for MockToolchain {
    fn generate(&self, input: &Path, output: &Path, options: &GeneratorOptions) -> Result<Exit> {
        options.validate()?;
        self.generated
            .lock()
            .unwrap()
            .push((output.to_path_buf(), options.clone()));
        let name = input.file_stem().unwrap().to_string_lossy().into_owned();
        if name.contains("hang") {
            fs::write(output, "struct Ha")?;
            return Err(anyhow!("'generator' timed out after 1 s"));
        }
        if name.contains("partial") {
            fs::write(output, "struct Half")?;
            return Ok(Exit::Failure { code: Some(1), stderr: "panicked".into() });
        }
        if name.contains("reject") {
            return Ok(Exit::Failure { code: Some(1), stderr: "unsupported item".into() });
        }
        let style = options.style.map(|s| s.as_str()).unwrap_or("-");
        fs::write(output, format!("/* {name} {} {style} */\n{}", options.dialect, self.drift))?;
        Ok(Exit::Success)
    }

    fn compile(&self, source: &Path, object: &Path, _unit: &ExecutionUnit) -> Result<Exit> {
        self.compiled
            .lock()
            .unwrap()
            .push((source.to_path_buf(), object.to_path_buf()));
        fs::write(object, "obj")?;
        let text = fs::read_to_string(source)?;
        if text.contains("broken") {
            Ok(Exit::Failure { code: Some(1), stderr: "error: expected ';'".into() })
        } else {
            Ok(Exit::Success)
        }
    }

    fn validate(&self, _dialects: &[Dialect]) -> Result<()> {
        Ok(())
    }
}

pub fn single(dir: &Path, name: &str) -> TestCase {
    let path = dir.join(format!("{name}.rs"));
    fs::write(&path, "").unwrap();
    TestCase {
        path,
        kind: TestKind::SingleFile,
        name: name.to_string(),
        expectation: resolve_expectation(name),
        config: None,
        warnings_as_errors: true,
    }
}

pub fn dir_is_empty(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut it| it.next().is_none()).unwrap_or(true)
}
