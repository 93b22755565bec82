use crate::types::{ExecutionUnit, Expectation, Outcome, Summary, UnitResult};
use colored::Colorize;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    pub verbose: bool,
    /// Hide pass lines.
    pub quiet: bool,
}

/// The line for one unit, plus its detail when it failed and `verbose` is on.
pub fn render_unit(result: &UnitResult, opts: ReportOptions) -> Option<String> {
    let identity = result.unit.identity();
    let mut out = match result.outcome {
        Outcome::Pass if opts.quiet => return None,
        Outcome::Pass => format!("{} - {}", "Pass".green().bold(), identity),
        Outcome::Fail => format!("{} - {}", "Fail".red().bold(), identity.red()),
        Outcome::Error => format!("{} - {}", "Error".red().bold(), identity.red()),
    };
    // Errors are always explained; plain failures only on request.
    let explain = match result.outcome {
        Outcome::Error => true,
        Outcome::Fail => opts.verbose,
        Outcome::Pass => false,
    };
    if explain {
        if let Some(detail) = &result.detail {
            for line in detail.lines() {
                out.push_str("\n    ");
                out.push_str(line);
            }
        }
    }
    Some(out)
}

pub fn print_unit(result: &UnitResult, opts: ReportOptions) {
    if let Some(line) = render_unit(result, opts) {
        println!("{line}");
    }
}

pub fn render_summary(summary: &Summary) -> String {
    let failed = if summary.failed > 0 {
        summary.failed.to_string().red().bold().to_string()
    } else {
        summary.failed.to_string().green().to_string()
    };
    let mut line = format!(
        "Tests complete. {} passed, {} failed.",
        summary.passed.to_string().green(),
        failed
    );
    if summary.errors > 0 {
        line.push_str(&format!(
            " ({} could not be judged)",
            summary.errors.to_string().red().bold()
        ));
    }
    line
}

/// Some unit was judged and did not pass.
pub const EXIT_FAILED: u8 = 1;
/// The run itself broke: bad config, failed build, missing tools, or a unit that could not be judged.
pub const EXIT_INFRA: u8 = 2;

/// Process exit status for a finished run.
pub fn exit_code(summary: &Summary) -> u8 {
    if summary.errors > 0 {
        EXIT_INFRA
    } else if !summary.all_passed() {
        EXIT_FAILED
    } else {
        0
    }
}

pub fn print_summary(summary: &Summary) {
    println!("{}", render_summary(summary));
}

/// One line per planned unit, for `--list`.
pub fn render_plan(units: &[ExecutionUnit]) -> String {
    let mut out = String::new();
    for unit in units {
        let expect = match unit.test.expectation {
            Expectation::Succeed => "succeed",
            Expectation::Fail => "fail",
        };
        out.push_str(&format!(
            "{:>4}  {}  [expect {}]\n",
            unit.index + 1,
            unit.identity(),
            expect
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dialect, StepStatus, Style, TestCase, TestKind};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn result(outcome: Outcome, detail: Option<&str>) -> UnitResult {
        let test = TestCase {
            path: PathBuf::from("cases/enum.rs"),
            kind: TestKind::SingleFile,
            name: "enum".into(),
            expectation: Expectation::Succeed,
            config: None,
            warnings_as_errors: true,
        };
        UnitResult {
            unit: ExecutionUnit {
                index: 0,
                test: Arc::new(test),
                dialect: Dialect::C,
                style: Some(Style::Tag),
            },
            generator: StepStatus::Passed,
            compile: StepStatus::Failed,
            content: StepStatus::Skipped,
            outcome,
            detail: detail.map(str::to_string),
        }
    }

    #[test]
    fn lines_name_the_unit() {
        colored::control::set_override(false);
        let opts = ReportOptions::default();
        assert_eq!(
            render_unit(&result(Outcome::Pass, None), opts).as_deref(),
            Some("Pass - cases/enum.rs (c, tag)")
        );
        assert_eq!(
            render_unit(&result(Outcome::Fail, Some("compiler failed")), opts).as_deref(),
            Some("Fail - cases/enum.rs (c, tag)")
        );
        let verbose = ReportOptions { verbose: true, quiet: false };
        let failed = result(Outcome::Fail, Some("compiler failed\nx.c:1: error"));
        assert_eq!(
            render_unit(&failed, verbose).as_deref(),
            Some("Fail - cases/enum.rs (c, tag)\n    compiler failed\n    x.c:1: error")
        );
        let quiet = ReportOptions { verbose: false, quiet: true };
        assert_eq!(render_unit(&result(Outcome::Pass, None), quiet), None);
    }

    #[test]
    fn summary_counts() {
        colored::control::set_override(false);
        let mut summary = Summary::default();
        summary.record(result(Outcome::Pass, None));
        summary.record(result(Outcome::Fail, None));
        summary.record(result(Outcome::Error, Some("timed out")));
        assert_eq!(
            render_summary(&summary),
            "Tests complete. 1 passed, 2 failed. (1 could not be judged)"
        );
    }

    #[test]
    fn exit_code_tracks_the_worst_result() {
        let mut summary = Summary::default();
        summary.record(result(Outcome::Pass, None));
        assert_eq!(exit_code(&summary), 0);
        summary.record(result(Outcome::Fail, None));
        assert_eq!(exit_code(&summary), EXIT_FAILED);
        summary.record(result(Outcome::Error, Some("timed out")));
        assert_eq!(exit_code(&summary), EXIT_INFRA);
        assert_eq!(exit_code(&Summary::default()), 0);
    }
}
