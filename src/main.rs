use anyhow::Result;
use clap::{Parser, ValueEnum};
use colored::control::set_override as set_color_override;
use genconform::backend::{ExternalBackend, Toolchain, build_generator};
use genconform::config::HarnessConfig;
use genconform::discovery::{DiscoveryOptions, discover};
use genconform::engine::{Mode, RunSettings, run_units};
use genconform::matrix::expand;
use genconform::report::{
    EXIT_INFRA, ReportOptions, exit_code, print_summary, print_unit, render_plan,
};
use genconform::types::Dialect;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum DialectOpt {
    C,
    Cpp,
    All,
}

impl DialectOpt {
    fn dialects(self) -> Vec<Dialect> {
        match self {
            DialectOpt::C => vec![Dialect::C],
            DialectOpt::Cpp => vec![Dialect::Cpp],
            DialectOpt::All => Dialect::ALL.to_vec(),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Runs a binding generator over a test corpus, compiles its C/C++ output and checks it against golden files"
)]
struct Cli {
    /// Test inputs (source files or package directories); default: everything under the tests dir
    #[arg(value_name = "TESTS")]
    tests: Vec<PathBuf>,

    /// Regenerate into scratch space and require byte equality with the golden files
    #[arg(long)]
    verify: bool,

    /// Pass the generator its own self-check flag
    #[arg(long = "generator-verify")]
    generator_verify: bool,

    /// Harness config file [default: genconform.yaml if present]
    #[arg(long = "config-file", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Generator executable
    #[arg(long, value_name = "PATH")]
    generator: Option<PathBuf>,

    #[arg(long = "tests-dir", value_name = "DIR")]
    tests_dir: Option<PathBuf>,

    #[arg(long = "golden-dir", value_name = "DIR")]
    golden_dir: Option<PathBuf>,

    /// Seconds before an external process is killed
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Output dialects to exercise
    #[arg(long, value_enum, default_value = "all")]
    dialect: DialectOpt,

    /// Skip the configured generator build step
    #[arg(long = "no-build")]
    no_build: bool,

    /// Don't run the native compiler on generated output
    #[arg(long = "no-compile")]
    no_compile: bool,

    /// Print the execution plan and exit
    #[arg(long)]
    list: bool,

    /// Number of parallel workers [default: available parallelism]
    #[arg(short = 'j', long, value_name = "N", conflicts_with = "serial")]
    jobs: Option<NonZeroUsize>,

    /// Run units one at a time, in plan order
    #[arg(long)]
    serial: bool,

    #[arg(short = 'v', long)]
    verbose: bool,

    /// Only report failures
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    #[arg(long = "no-color")]
    no_color: bool,
}

fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut cfg = HarnessConfig::load(cli.config_file.as_deref())?;
    cfg.apply_process_env();
    if let Some(generator) = &cli.generator {
        cfg.generator = Some(generator.clone());
    }
    if let Some(dir) = &cli.tests_dir {
        cfg.tests_dir = dir.clone();
    }
    if let Some(dir) = &cli.golden_dir {
        cfg.golden_dir = dir.clone();
    }
    if let Some(secs) = cli.timeout {
        cfg.timeout = Duration::from_secs(secs);
    }
    cfg.validate()?;
    Ok(cfg)
}

fn worker_count(cli: &Cli) -> usize {
    if cli.serial {
        return 1;
    }
    cli.jobs
        .or_else(|| std::thread::available_parallelism().ok())
        .map_or(1, NonZeroUsize::get)
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let cfg = match load_config(cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e:#}");
            return Ok(ExitCode::from(EXIT_INFRA));
        }
    };

    if let (Some(build), false) = (&cfg.build, cli.no_build) {
        info!("building generator: {}", build.join(" "));
        if let Err(e) = build_generator(build, cfg.timeout) {
            error!("{e:#}");
            return Ok(ExitCode::from(EXIT_INFRA));
        }
    }

    let dialects = cli.dialect.dialects();
    let tests = discover(
        &cli.tests,
        &DiscoveryOptions {
            root: cfg.tests_dir.clone(),
            source_extension: cfg.source_extension.clone(),
            config_extension: cfg.config_extension.clone(),
        },
    )?;
    let units = expand(&tests, &dialects);

    if cli.list {
        print!("{}", render_plan(&units));
        return Ok(ExitCode::SUCCESS);
    }

    let backend = ExternalBackend::from_config(&cfg)?;
    let needed: &[Dialect] = if cli.no_compile { &[] } else { &dialects };
    if let Err(e) = backend.validate(needed) {
        error!("{e:#}");
        return Ok(ExitCode::from(EXIT_INFRA));
    }

    let scratch = tempfile::Builder::new().prefix("genconform-").tempdir()?;
    let settings = RunSettings {
        golden_root: cfg.golden_dir.clone(),
        scratch_dir: scratch.path().to_path_buf(),
        mode: if cli.verify { Mode::Verify } else { Mode::Trust },
        generator_verify: cli.generator_verify,
        compile: !cli.no_compile,
    };
    let jobs = worker_count(cli);
    info!(
        "running {} units from {} tests ({:?} mode, {} workers)",
        units.len(),
        tests.len(),
        settings.mode,
        jobs
    );

    let report_opts = ReportOptions {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    let summary = run_units(&backend, &units, &settings, jobs, |result| {
        print_unit(result, report_opts)
    })?;
    print_summary(&summary);

    Ok(ExitCode::from(exit_code(&summary)))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "genconform=info".to_string())
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "genconform=warn".to_string())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.no_color {
        set_color_override(false);
    }

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_INFRA)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_must_be_positive() {
        assert!(Cli::try_parse_from(["genconform", "-j", "0"]).is_err());
        let cli = Cli::try_parse_from(["genconform", "-j", "3"]).unwrap();
        assert_eq!(worker_count(&cli), 3);
        let serial = Cli::try_parse_from(["genconform", "--serial"]).unwrap();
        assert_eq!(worker_count(&serial), 1);
    }
}
