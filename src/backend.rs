use crate::config::HarnessConfig;
use crate::types::{Dialect, ExecutionUnit, Style};
use anyhow::{Context, Result, anyhow, bail};
use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How an external process ended, when it ended on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    Success,
    Failure { code: Option<i32>, stderr: String },
}

impl Exit {
    pub fn success(&self) -> bool {
        matches!(self, Exit::Success)
    }
}

/// Generator flags for one execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOptions {
    pub dialect: Dialect,
    pub style: Option<Style>,
    pub config: Option<PathBuf>,
    /// Ask the generator to double-check its own output.
    pub verify: bool,
}

impl GeneratorOptions {
    pub fn validate(&self) -> Result<()> {
        match (self.dialect, self.style) {
            (Dialect::C, None) => bail!("the C dialect needs a style"),
            (Dialect::Cpp, Some(style)) => bail!("style `{style}` is only valid for the C dialect"),
            _ => Ok(()),
        }
    }

    pub fn to_args(&self, input: &Path, output: &Path) -> Result<Vec<OsString>> {
        self.validate()?;
        let mut args: Vec<OsString> = Vec::new();
        if self.dialect == Dialect::C {
            args.push("--lang".into());
            args.push("c".into());
        }
        if let Some(style) = self.style {
            args.push("--style".into());
            args.push(style.as_str().into());
        }
        if let Some(config) = &self.config {
            args.push("--config".into());
            args.push(config.into());
        }
        if self.verify {
            args.push("--verify".into());
        }
        args.push("-o".into());
        args.push(output.into());
        args.push(input.into());
        Ok(args)
    }
}

/// The external collaborators a unit is judged with.
///
/// `Ok(Exit::Failure)` is a verdict on the input; `Err` means the process
/// could not be run or judged at all.
pub trait Toolchain: Send + Sync {
    fn generate(&self, input: &Path, output: &Path, options: &GeneratorOptions) -> Result<Exit>;
    fn compile(&self, source: &Path, object: &Path, unit: &ExecutionUnit) -> Result<Exit>;
    fn validate(&self, dialects: &[Dialect]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ExternalBackend {
    pub generator: PathBuf,
    pub cc: String,
    pub cxx: String,
    pub cflags: Vec<String>,
    pub cxxflags: Vec<String>,
    pub define: String,
    pub cxx_std: String,
    pub warnings: Vec<String>,
    pub style_define_prefix: String,
    /// Added as `-I` so generated code can include corpus helpers.
    pub include_dir: PathBuf,
    pub timeout: Duration,
}

impl ExternalBackend {
    pub fn from_config(cfg: &HarnessConfig) -> Result<Self> {
        let generator = cfg
            .generator
            .clone()
            .ok_or_else(|| anyhow!("no generator configured"))?;
        Ok(Self {
            generator,
            cc: cfg.cc.clone(),
            cxx: cfg.cxx.clone(),
            cflags: cfg.cflags.clone(),
            cxxflags: cfg.cxxflags.clone(),
            define: cfg.define.clone(),
            cxx_std: cfg.cxx_std.clone(),
            warnings: cfg.warnings.clone(),
            style_define_prefix: cfg.style_define_prefix.clone(),
            include_dir: cfg.tests_dir.clone(),
            timeout: cfg.timeout,
        })
    }

    pub fn compiler_for(&self, dialect: Dialect) -> &str {
        match dialect {
            Dialect::C => &self.cc,
            Dialect::Cpp => &self.cxx,
        }
    }

    pub fn compile_args(&self, source: &Path, object: &Path, unit: &ExecutionUnit) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-D".into(), self.define.clone().into()];
        args.push("-I".into());
        args.push(self.include_dir.clone().into());
        args.extend(self.warnings.iter().map(OsString::from));
        if unit.test.warnings_as_errors {
            args.push("-Werror".into());
        }
        match unit.dialect {
            Dialect::C => args.extend(self.cflags.iter().map(OsString::from)),
            Dialect::Cpp => {
                args.push(format!("-std={}", self.cxx_std).into());
                args.extend(self.cxxflags.iter().map(OsString::from));
            }
        }
        if let Some(style) = unit.style {
            args.push("-D".into());
            args.push(
                format!("{}{}", self.style_define_prefix, style.as_str().to_uppercase()).into(),
            );
        }
        args.push("-c".into());
        args.push(source.into());
        args.push("-o".into());
        args.push(object.into());
        args
    }
}

impl Toolchain for ExternalBackend {
    fn generate(&self, input: &Path, output: &Path, options: &GeneratorOptions) -> Result<Exit> {
        let mut cmd = Command::new(&self.generator);
        cmd.args(options.to_args(input, output)?);
        run_with_timeout(cmd, self.timeout)
    }

    fn compile(&self, source: &Path, object: &Path, unit: &ExecutionUnit) -> Result<Exit> {
        let mut cmd = Command::new(self.compiler_for(unit.dialect));
        cmd.args(self.compile_args(source, object, unit));
        run_with_timeout(cmd, self.timeout)
    }

    fn validate(&self, dialects: &[Dialect]) -> Result<()> {
        if !self.generator.is_file() {
            which::which(&self.generator).map_err(|_| {
                anyhow!(
                    "generator '{}' does not exist or is not in PATH",
                    self.generator.display()
                )
            })?;
        }
        for &dialect in dialects {
            let compiler = self.compiler_for(dialect);
            which::which(compiler).map_err(|_| {
                anyhow!("{dialect} compiler '{compiler}' does not exist or is not in PATH")
            })?;
        }
        Ok(())
    }
}

/// Runs the configured generator build command.
pub fn build_generator(command: &[String], timeout: Duration) -> Result<()> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("empty build command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    match run_with_timeout(cmd, timeout)? {
        Exit::Success => Ok(()),
        Exit::Failure { code, stderr } => Err(anyhow!(
            "generator build `{}` failed with {}\n{}",
            command.join(" "),
            describe_code(code),
            stderr.trim_end()
        )),
    }
}

pub fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "a signal".to_string(),
    }
}

/// Runs to completion or kills the child after `timeout`; stdout is discarded, stderr captured.
///
/// The deadline also bounds collecting stderr: a descendant that outlives the
/// child may hold the pipe open, and then only what arrived in time is kept.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<Exit> {
    debug!("running {:?}", cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().into_owned();
    let deadline = Instant::now() + timeout;
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to start '{program}'"))?;

    // Drained on its own thread so a chatty child can't fill the pipe and stall.
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    if let Some(mut stderr) = child.stderr.take() {
        thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match stderr.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
    } else {
        drop(tx);
    }

    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!(
                "'{program}' timed out after {} s",
                timeout.as_secs_f64()
            ));
        }
    };

    let mut stderr = Vec::new();
    loop {
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(chunk) => stderr.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                warn!("'{program}' exited but its stderr is still held open; not waiting for it");
                break;
            }
        }
    }
    let stderr = String::from_utf8_lossy(&stderr).into_owned();

    if status.success() {
        Ok(Exit::Success)
    } else {
        Ok(Exit::Failure {
            code: status.code(),
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(opts: &GeneratorOptions) -> Vec<String> {
        opts.to_args(Path::new("in.rs"), Path::new("out.c"))
            .unwrap()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn c_flags_carry_dialect_style_and_config() {
        let opts = GeneratorOptions {
            dialect: Dialect::C,
            style: Some(Style::Tag),
            config: Some(PathBuf::from("in.toml")),
            verify: true,
        };
        assert_eq!(
            args(&opts),
            vec!["--lang", "c", "--style", "tag", "--config", "in.toml", "--verify", "-o", "out.c", "in.rs"]
        );
    }

    #[test]
    fn cpp_is_the_generator_default() {
        let opts = GeneratorOptions {
            dialect: Dialect::Cpp,
            style: None,
            config: None,
            verify: false,
        };
        assert_eq!(args(&opts), vec!["-o", "out.c", "in.rs"]);
    }

    #[test]
    fn style_is_only_valid_with_c() {
        let cpp_with_style = GeneratorOptions {
            dialect: Dialect::Cpp,
            style: Some(Style::Both),
            config: None,
            verify: false,
        };
        assert!(cpp_with_style.validate().is_err());
        let c_without_style = GeneratorOptions {
            dialect: Dialect::C,
            style: None,
            config: None,
            verify: false,
        };
        assert!(c_without_style.validate().is_err());
    }

    #[test]
    fn compiler_flags_per_dialect() {
        use crate::types::{Expectation, TestCase, TestKind};
        use std::sync::Arc;

        let cfg = HarnessConfig {
            generator: Some(PathBuf::from("gen")),
            tests_dir: PathBuf::from("cases"),
            cflags: vec!["-O1".into()],
            warnings: vec!["-Wall".into()],
            ..HarnessConfig::default()
        };
        let backend = ExternalBackend::from_config(&cfg).unwrap();
        let unit = |dialect, style, warnings_as_errors| ExecutionUnit {
            index: 0,
            test: Arc::new(TestCase {
                path: PathBuf::from("cases/x.rs"),
                kind: TestKind::SingleFile,
                name: "x".into(),
                expectation: Expectation::Succeed,
                config: None,
                warnings_as_errors,
            }),
            dialect,
            style,
        };
        let render = |u: ExecutionUnit| -> Vec<String> {
            backend
                .compile_args(Path::new("x.src"), Path::new("x.o"), &u)
                .into_iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect()
        };
        assert_eq!(
            render(unit(Dialect::C, Some(Style::Tag), true)),
            vec![
                "-D", "DEFINED", "-I", "cases", "-Wall", "-Werror", "-O1",
                "-D", "CBINDGEN_STYLE_TAG", "-c", "x.src", "-o", "x.o"
            ]
        );
        assert_eq!(
            render(unit(Dialect::C, Some(Style::Both), false)),
            vec![
                "-D", "DEFINED", "-I", "cases", "-Wall", "-O1",
                "-D", "CBINDGEN_STYLE_BOTH", "-c", "x.src", "-o", "x.o"
            ]
        );
        assert_eq!(
            render(unit(Dialect::Cpp, None, true)),
            vec![
                "-D", "DEFINED", "-I", "cases", "-Wall", "-Werror", "-std=c++11",
                "-c", "x.src", "-o", "x.o"
            ]
        );
        assert_eq!(backend.compiler_for(Dialect::C), "gcc");
        assert_eq!(backend.compiler_for(Dialect::Cpp), "g++");
    }
}
