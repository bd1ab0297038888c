use serde::Deserialize;

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::batch::BatchingPolicy;
use crate::cli::CreateArgs;
use crate::consts::*;
use crate::error::{BatchError, ConfigError};

/// A struct representing a configuration file.
///
/// # Fields
///
/// * `metadata` - Project, disease, app and log file.
/// * `batching` - Size bounds and recognized experimental strategies.
/// * `tasks` - Manifest, ledger and run limits.
/// * `params` - Parameters flattened onto every task command line.
///
/// # Example
///
/// ``` toml
/// [metadata]
/// project = "tcga-brca"
/// disease = "BRCA"
/// app = "samtools-bam2fasta"
///
/// [batching]
/// lower-bound = 400
/// upper-bound = 600
///
/// [tasks]
/// manifest = "bams.tsv"
/// max-per-run = 10
///
/// [params]
/// threads = 8
/// ```
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub batching: BatchingSection,
    #[serde(default)]
    pub tasks: TaskSection,
    #[serde(default)]
    pub params: AppParams,
}

impl Config {
    /// Read a configuration file and return a Config struct.
    ///
    /// # Arguments
    ///
    /// * `config` - Path to the configuration file.
    ///
    /// # Example
    ///
    /// ``` rust, ignore
    /// let config = Config::read(Path::new("config.toml"))?;
    /// ```
    pub fn read(config: &Path) -> Result<Self, ConfigError> {
        let mut contents = String::new();
        File::open(config)
            .and_then(|mut file| file.read_to_string(&mut contents))
            .map_err(|source| ConfigError::Missing {
                path: config.to_path_buf(),
                source,
            })?;

        Self::parse(&contents, config)
    }

    /// Parse configuration contents; `origin` is only used for error messages.
    pub fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;

        config.resolve_paths(origin.parent().unwrap_or_else(|| Path::new("")));
        config.validate()?;

        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.tasks.manifest, &mut self.tasks.ledger] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for key in [PROJECT, DISEASE, APP] {
            self.get_metadata(key)?;
        }

        self.policy()?;

        Ok(())
    }

    /// Override batching bounds from the command line.
    ///
    /// # Example
    ///
    /// ``` rust, ignore
    /// let mut config = Config::read(Path::new("config.toml"))?;
    /// config.aware(&args)?;
    /// ```
    pub fn aware(&mut self, args: &CreateArgs) -> Result<&mut Self, ConfigError> {
        if let Some(lower) = args.lower {
            self.batching.lower_bound = lower;
        }
        if let Some(upper) = args.upper {
            self.batching.upper_bound = upper;
        }

        self.policy()?;

        Ok(self)
    }

    /// Get a metadata value or fail naming the missing key.
    pub fn get_metadata(&self, key: &str) -> Result<&str, ConfigError> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingKey { key: key.into() })
    }

    pub fn project(&self) -> &str {
        self.metadata.get(PROJECT).map_or("", String::as_str)
    }

    pub fn disease(&self) -> &str {
        self.metadata.get(DISEASE).map_or("", String::as_str)
    }

    pub fn app(&self) -> &str {
        self.metadata.get(APP).map_or("", String::as_str)
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.metadata.get(LOG_FILE).map(PathBuf::from)
    }

    pub fn policy(&self) -> Result<BatchingPolicy, BatchError> {
        BatchingPolicy::new(self.batching.lower_bound, self.batching.upper_bound)
    }

    pub fn categories(&self) -> &[String] {
        &self.batching.categories
    }

    pub fn manifest(&self) -> &Path {
        &self.tasks.manifest
    }

    pub fn ledger(&self) -> &Path {
        &self.tasks.ledger
    }

    pub fn max_per_run(&self) -> usize {
        self.tasks.max_per_run
    }

    /// Append a timestamped line to the configured log file, if any.
    ///
    /// Failing to write the log file is reported but never aborts the run.
    pub fn record(&self, level: log::Level, msg: &str) {
        let Some(path) = self.log_file() else {
            return;
        };

        let line = format!(
            "{} {} {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            level,
            msg
        );

        if let Err(e) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
        {
            log::warn!("WARN: could not write to {}: {}", path.display(), e);
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct BatchingSection {
    #[serde(default = "default_lower_bound")]
    pub lower_bound: f64,
    #[serde(default = "default_upper_bound")]
    pub upper_bound: f64,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
}

impl Default for BatchingSection {
    fn default() -> Self {
        Self {
            lower_bound: DEFAULT_LOWER_BOUND,
            upper_bound: DEFAULT_UPPER_BOUND,
            categories: default_categories(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct TaskSection {
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    #[serde(default = "default_ledger")]
    pub ledger: PathBuf,
    #[serde(default = "default_max_per_run")]
    pub max_per_run: usize,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub memory: Option<i64>,
}

impl Default for TaskSection {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            ledger: default_ledger(),
            max_per_run: DEFAULT_MAX_PER_RUN,
            queue: None,
            memory: None,
        }
    }
}

fn default_lower_bound() -> f64 {
    DEFAULT_LOWER_BOUND
}

fn default_upper_bound() -> f64 {
    DEFAULT_UPPER_BOUND
}

fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
}

fn default_manifest() -> PathBuf {
    PathBuf::from(DEFAULT_MANIFEST)
}

fn default_ledger() -> PathBuf {
    PathBuf::from(DEFAULT_LEDGER)
}

fn default_max_per_run() -> usize {
    DEFAULT_MAX_PER_RUN
}

/// App parameters shared by every task.
///
/// # Fields
///
/// * `values` - A HashMap containing app arguments.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct AppParams {
    #[serde(flatten)]
    values: HashMap<String, ParamValue>,
}

impl AppParams {
    /// Flatten the parameters into a single string for CLI execution.
    ///
    /// # Note
    ///
    /// All parameters with 2 or less characters are interpreted as short
    /// flags and will be prefixed with a single dash (`-`). Parameters with
    /// more than 2 characters will be prefixed with two dashes (`--`).
    /// Parameters in SPECIAL_PARAMETER are joined with an equal sign (`=`).
    /// Keys are emitted in sorted order.
    ///
    /// # Example
    ///
    /// ``` rust, ignore
    /// let flat = params.flat(Some(vec!["memory"]));
    ///
    /// assert_eq!(flat, "--threads 8 -x true");
    /// ```
    pub fn flat(&self, exclude: Option<Vec<&str>>) -> String {
        let exclude = exclude
            .unwrap_or_default()
            .into_iter()
            .collect::<HashSet<_>>();

        let mut keys = self
            .values
            .keys()
            .filter(|key| !exclude.contains(key.as_str()))
            .collect::<Vec<_>>();
        keys.sort_unstable();

        keys.into_iter()
            .map(|key| {
                let dashes = if key.len() > 2 { "--" } else { "-" };
                let sep = if SPECIAL_PARAMETER.contains(&key.as_str()) {
                    "="
                } else {
                    " "
                };

                format!("{}{}{}{}", dashes, key, sep, self.values[key])
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Represents a parameter value for the app
///
/// # Example
///
/// ``` rust, ignore
/// let value = ParamValue::Int(1);
///
/// assert_eq!(value.to_string(), "1");
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(flt) => write!(f, "{}", flt),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Str(s) => write!(f, "{}", s),
        }
    }
}
