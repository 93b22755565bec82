use crate::backend::{Exit, GeneratorOptions, Toolchain, describe_code};
use crate::golden::{self, RemoveOnDrop, RestoreOnDrop, ScratchPaths, golden_path_for};
use crate::types::{ExecutionUnit, Expectation, Outcome, StepStatus, Summary, UnitResult};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Generate straight into the golden path and judge that file.
    #[default]
    Trust,
    /// Generate into scratch space and require byte equality with the golden file.
    Verify,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub golden_root: PathBuf,
    pub scratch_dir: PathBuf,
    pub mode: Mode,
    /// Passed through to the generator as its own self-check flag.
    pub generator_verify: bool,
    pub compile: bool,
}

#[derive(Debug)]
struct Observation {
    generator: StepStatus,
    compile: StepStatus,
    content: StepStatus,
    detail: Option<String>,
}

/// Decides whether what was observed is what the test expected.
pub fn reconcile(
    expectation: Expectation,
    generator: StepStatus,
    compile: StepStatus,
    content: StepStatus,
) -> Outcome {
    let passed = match expectation {
        Expectation::Succeed => {
            generator == StepStatus::Passed
                && compile != StepStatus::Failed
                && content != StepStatus::Failed
        }
        Expectation::Fail => generator == StepStatus::Failed || compile == StepStatus::Failed,
    };
    if passed { Outcome::Pass } else { Outcome::Fail }
}

fn failure_detail(step: &str, code: Option<i32>, stderr: &str) -> String {
    let stderr = stderr.trim_end();
    if stderr.is_empty() {
        format!("{step} failed with {}", describe_code(code))
    } else {
        format!("{step} failed with {}\n{stderr}", describe_code(code))
    }
}

fn append_detail(detail: &mut Option<String>, more: String) {
    match detail {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(&more);
        }
        None => *detail = Some(more),
    }
}

fn observe<B: Toolchain>(
    backend: &B,
    unit: &ExecutionUnit,
    settings: &RunSettings,
) -> Result<Observation> {
    let golden = golden_path_for(&settings.golden_root, unit);
    let scratch = ScratchPaths::for_unit(&settings.scratch_dir, unit);
    let options = GeneratorOptions {
        dialect: unit.dialect,
        style: unit.style,
        config: unit.test.config.clone(),
        verify: settings.generator_verify,
    };

    // Verify output is always thrown away; a golden file is put back unless the generator succeeds.
    let (output, _scratch_guard, golden_guard) = match settings.mode {
        Mode::Verify => (
            scratch.artifact.clone(),
            Some(RemoveOnDrop::new(&scratch.artifact)),
            None,
        ),
        Mode::Trust => {
            if let Some(parent) = golden.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            (golden.clone(), None, Some(RestoreOnDrop::capture(&golden)?))
        }
    };

    debug!("generating {} -> {}", unit.identity(), output.display());
    if let Exit::Failure { code, stderr } = backend.generate(&unit.test.path, &output, &options)? {
        return Ok(Observation {
            generator: StepStatus::Failed,
            compile: StepStatus::Skipped,
            content: StepStatus::Skipped,
            detail: Some(failure_detail("generator", code, &stderr)),
        });
    }
    if let Some(guard) = golden_guard {
        guard.disarm();
    }

    let mut detail = None;
    let compile = if settings.compile {
        let _object = RemoveOnDrop::new(&scratch.object);
        match backend.compile(&output, &scratch.object, unit)? {
            Exit::Success => StepStatus::Passed,
            Exit::Failure { code, stderr } => {
                detail = Some(failure_detail("compiler", code, &stderr));
                StepStatus::Failed
            }
        }
    } else {
        StepStatus::Skipped
    };

    let compare_content =
        settings.mode == Mode::Verify && unit.test.expectation == Expectation::Succeed;
    let content = if compare_content {
        let comparison = golden::compare(&output, &golden)?;
        if let Some(d) = comparison.describe() {
            append_detail(&mut detail, format!("{}: {d}", golden.display()));
        }
        StepStatus::from_success(comparison.matched())
    } else {
        StepStatus::Skipped
    };

    Ok(Observation {
        generator: StepStatus::Passed,
        compile,
        content,
        detail,
    })
}

/// Runs one unit end to end. Never fails: harness problems become `Outcome::Error`.
pub fn run_unit<B: Toolchain>(
    backend: &B,
    unit: &ExecutionUnit,
    settings: &RunSettings,
) -> UnitResult {
    match observe(backend, unit, settings) {
        Ok(obs) => {
            let outcome =
                reconcile(unit.test.expectation, obs.generator, obs.compile, obs.content);
            let mut detail = obs.detail;
            if outcome == Outcome::Fail && unit.test.expectation == Expectation::Fail {
                detail = Some(if obs.compile == StepStatus::Skipped {
                    "generator accepted an input expected to fail".to_string()
                } else {
                    "generator and compiler accepted an input expected to fail".to_string()
                });
            }
            UnitResult {
                unit: unit.clone(),
                generator: obs.generator,
                compile: obs.compile,
                content: obs.content,
                outcome,
                detail,
            }
        }
        Err(e) => UnitResult {
            unit: unit.clone(),
            generator: StepStatus::Skipped,
            compile: StepStatus::Skipped,
            content: StepStatus::Skipped,
            outcome: Outcome::Error,
            detail: Some(format!("{e:#}")),
        },
    }
}

/// Runs every unit, handing each result to `on_result` as soon as it resolves.
///
/// With `jobs > 1` units run on a rayon pool and results come back over a
/// channel to the calling thread, which is the only one touching the summary.
pub fn run_units<B, F>(
    backend: &B,
    units: &[ExecutionUnit],
    settings: &RunSettings,
    jobs: usize,
    mut on_result: F,
) -> Result<Summary>
where
    B: Toolchain,
    F: FnMut(&UnitResult),
{
    let mut summary = Summary::default();

    if jobs <= 1 {
        for unit in units {
            let result = run_unit(backend, unit, settings);
            on_result(&result);
            summary.record(result);
        }
        return Ok(summary);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .context("failed to start worker pool")?;
    let (tx, rx) = mpsc::channel::<UnitResult>();

    thread::scope(|scope| {
        scope.spawn(move || {
            pool.install(|| {
                units.par_iter().for_each_with(tx, |tx, unit| {
                    let _ = tx.send(run_unit(backend, unit, settings));
                });
            });
        });
        for result in rx {
            on_result(&result);
            summary.record(result);
        }
    });

    summary.cases.sort_by_key(|r| r.unit.index);
    Ok(summary)
}
