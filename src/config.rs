use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Looked up in the working directory when no config file is given.
pub const DEFAULT_CONFIG_FILE: &str = "genconform.yaml";

/// 120 seconds per external process
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Warning flags every compile gets; `-Werror` is added on top per test.
pub const DEFAULT_WARNINGS: [&str; 5] = [
    "-Wall",
    "-Wno-attributes",
    "-Wno-unused-const-variable",
    "-Wno-return-type-c-linkage",
    "-Wno-deprecated-declarations",
];

pub const DEFAULT_STYLE_DEFINE_PREFIX: &str = "CBINDGEN_STYLE_";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct RawConfig {
    pub generator: Option<String>,
    pub build: Option<Vec<String>>,
    pub tests_dir: Option<String>,
    pub golden_dir: Option<String>,
    pub source_extension: Option<String>,
    pub config_extension: Option<String>,
    pub cc: Option<String>,
    pub cxx: Option<String>,
    pub define: Option<String>,
    pub cxx_std: Option<String>,
    pub warnings: Option<Vec<String>>,
    pub style_define_prefix: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub generator: Option<PathBuf>,
    pub build: Option<Vec<String>>,
    pub tests_dir: PathBuf,
    pub golden_dir: PathBuf,
    pub source_extension: String,
    pub config_extension: String,
    pub cc: String,
    pub cxx: String,
    pub cflags: Vec<String>,
    pub cxxflags: Vec<String>,
    pub define: String,
    pub cxx_std: String,
    pub warnings: Vec<String>,
    /// Prefix of the macro naming the C style a unit is compiled for.
    pub style_define_prefix: String,
    pub timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            generator: None,
            build: None,
            tests_dir: PathBuf::from("tests/rust"),
            golden_dir: PathBuf::from("tests/expectations"),
            source_extension: "rs".to_string(),
            config_extension: "toml".to_string(),
            cc: "gcc".to_string(),
            cxx: "g++".to_string(),
            cflags: Vec::new(),
            cxxflags: Vec::new(),
            define: "DEFINED".to_string(),
            cxx_std: "c++11".to_string(),
            warnings: DEFAULT_WARNINGS.iter().map(|w| w.to_string()).collect(),
            style_define_prefix: DEFAULT_STYLE_DEFINE_PREFIX.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

fn resolve_path_relative_to_yaml(path: &str, yaml_file_path: &Path) -> PathBuf {
    let path_buf = Path::new(path.trim());
    if path_buf.is_absolute() {
        path_buf.to_path_buf()
    } else {
        match yaml_file_path.parent() {
            Some(yaml_dir) => yaml_dir.join(path_buf),
            None => path_buf.to_path_buf(),
        }
    }
}

fn split_flags(flags: &str) -> Vec<String> {
    flags.split_whitespace().map(str::to_string).collect()
}

impl HarnessConfig {
    /// Loads `explicit` if given, else the default file if present, else plain defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read harness config {}", path.display()))?;
        let raw: RawConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid harness config {}", path.display()))?;
        Ok(Self::default().merge(raw, path))
    }

    fn merge(mut self, raw: RawConfig, file: &Path) -> Self {
        if let Some(generator) = raw.generator {
            // Bare command names are left for PATH lookup.
            self.generator = Some(if generator.contains(std::path::MAIN_SEPARATOR) {
                resolve_path_relative_to_yaml(&generator, file)
            } else {
                PathBuf::from(generator.trim())
            });
        }
        if let Some(build) = raw.build {
            self.build = Some(build);
        }
        if let Some(dir) = raw.tests_dir {
            self.tests_dir = resolve_path_relative_to_yaml(&dir, file);
        }
        if let Some(dir) = raw.golden_dir {
            self.golden_dir = resolve_path_relative_to_yaml(&dir, file);
        }
        if let Some(ext) = raw.source_extension {
            self.source_extension = ext.trim().trim_start_matches('.').to_string();
        }
        if let Some(ext) = raw.config_extension {
            self.config_extension = ext.trim().trim_start_matches('.').to_string();
        }
        if let Some(cc) = raw.cc {
            self.cc = cc.trim().to_string();
        }
        if let Some(cxx) = raw.cxx {
            self.cxx = cxx.trim().to_string();
        }
        if let Some(define) = raw.define {
            self.define = define.trim().to_string();
        }
        if let Some(std) = raw.cxx_std {
            self.cxx_std = std.trim().to_string();
        }
        if let Some(warnings) = raw.warnings {
            self.warnings = warnings;
        }
        if let Some(prefix) = raw.style_define_prefix {
            self.style_define_prefix = prefix.trim().to_string();
        }
        if let Some(secs) = raw.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        self
    }

    /// Applies `CC`, `CXX`, `CFLAGS` and `CXXFLAGS`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(cc) = lookup("CC").filter(|v| !v.trim().is_empty()) {
            self.cc = cc.trim().to_string();
        }
        if let Some(cxx) = lookup("CXX").filter(|v| !v.trim().is_empty()) {
            self.cxx = cxx.trim().to_string();
        }
        if let Some(flags) = lookup("CFLAGS") {
            self.cflags = split_flags(&flags);
        }
        if let Some(flags) = lookup("CXXFLAGS") {
            self.cxxflags = split_flags(&flags);
        }
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    pub fn validate(&self) -> Result<()> {
        if self.generator.is_none() {
            bail!("no generator configured (use --generator or `Generator:` in {DEFAULT_CONFIG_FILE})");
        }
        if self.timeout.is_zero() {
            bail!("timeout must be greater than zero");
        }
        if let Some(build) = &self.build {
            if build.is_empty() {
                return Err(anyhow!("`Build` must name a command"));
            }
        }
        Ok(())
    }
}
