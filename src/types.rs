use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestKind {
    SingleFile,
    Package,
}

/// What the whole pipeline is expected to do with a test input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expectation {
    Succeed,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dialect {
    C,
    Cpp,
}

impl Dialect {
    pub const ALL: [Dialect; 2] = [Dialect::C, Dialect::Cpp];

    pub fn extension(self) -> &'static str {
        match self {
            Dialect::C => "c",
            Dialect::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::C => f.write_str("c"),
            Dialect::Cpp => f.write_str("c++"),
        }
    }
}

/// Representation style of the C dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Style {
    Type,
    Tag,
    Both,
}

impl Style {
    pub const ALL: [Style; 3] = [Style::Type, Style::Tag, Style::Both];

    pub fn as_str(self) -> &'static str {
        match self {
            Style::Type => "type",
            Style::Tag => "tag",
            Style::Both => "both",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub path: PathBuf,
    pub kind: TestKind,
    pub name: String,
    pub expectation: Expectation,
    /// Sibling generator config, only ever set for single-file tests.
    pub config: Option<PathBuf>,
    /// Compile with `-Werror`; cleared by the `.skip_warning_as_error` name suffix.
    pub warnings_as_errors: bool,
}

/// One (test, dialect, style) combination, judged on its own.
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    /// Position in the execution plan; keeps scratch paths unique.
    pub index: usize,
    pub test: Arc<TestCase>,
    pub dialect: Dialect,
    pub style: Option<Style>,
}

impl ExecutionUnit {
    /// Human readable identity used in report lines.
    pub fn identity(&self) -> String {
        match self.style {
            Some(style) => {
                format!("{} ({}, {})", self.test.path.display(), self.dialect, style)
            }
            None => format!("{} ({})", self.test.path.display(), self.dialect),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn from_success(ok: bool) -> Self {
        if ok {
            StepStatus::Passed
        } else {
            StepStatus::Failed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    /// The harness itself could not judge the unit (timeout, process could not start).
    Error,
}

#[derive(Debug, Clone)]
pub struct UnitResult {
    pub unit: ExecutionUnit,
    pub generator: StepStatus,
    pub compile: StepStatus,
    pub content: StepStatus,
    pub outcome: Outcome,
    pub detail: Option<String>,
}

impl UnitResult {
    pub fn generator_succeeded(&self) -> bool {
        self.generator == StepStatus::Passed
    }

    pub fn compile_succeeded(&self) -> bool {
        self.compile == StepStatus::Passed
    }

    pub fn content_matched(&self) -> bool {
        self.content == StepStatus::Passed
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize, // includes errors
    pub errors: usize,
    pub cases: Vec<UnitResult>,
}

impl Summary {
    pub fn record(&mut self, result: UnitResult) {
        self.total += 1;
        match result.outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Fail => self.failed += 1,
            Outcome::Error => {
                self.failed += 1;
                self.errors += 1;
            }
        }
        self.cases.push(result);
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}
