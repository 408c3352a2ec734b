// src/config.rs
use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

pub use crate::engine::EngineKind;
use crate::period::ExtractionPeriod;

/// Default extraction-period token when none is configured.
pub const DEFAULT_PERIOD: &str = "2035_Jan_1";

/// Everything one pipeline run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding `all_extractions_<name>.csv` from previous runs.
    pub clean_dir: PathBuf,
    /// Directory holding this period's workbooks.
    pub extraction_dir: PathBuf,
    /// Where the accumulated tables are written.
    pub export_dir: PathBuf,
    pub engine: EngineKind,
    /// Extraction-period token, e.g. `2024_Jun_1`.
    pub period: String,
    /// Fail on workbooks whose category cannot be detected instead of skipping them.
    pub strict_categories: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clean_dir: PathBuf::from("data/linkedin/clean/concatenated_dataframes"),
            extraction_dir: PathBuf::from("data/linkedin/raw_unique_extraction"),
            export_dir: PathBuf::from("data/linkedin/clean/export"),
            engine: EngineKind::Duckdb,
            period: DEFAULT_PERIOD.to_string(),
            strict_categories: false,
        }
    }
}

impl Config {
    /// Read a YAML file; keys that are absent keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
        let cfg: Config = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing YAML config {:?}", path))?;
        Ok(cfg)
    }

    /// Parsed extraction period; fails on malformed tokens.
    pub fn extraction_period(&self) -> Result<ExtractionPeriod> {
        Ok(ExtractionPeriod::parse(&self.period)?)
    }
}

/// Command-line layer on top of the defaults and the optional YAML file.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory with previously accumulated tables
    #[arg(long)]
    pub clean_dir: Option<PathBuf>,

    /// Directory with this period's workbooks
    #[arg(long)]
    pub extraction_dir: Option<PathBuf>,

    /// Output directory for the accumulated tables
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    /// Execution engine
    #[arg(long, value_enum)]
    pub engine: Option<EngineKind>,

    /// Extraction period, e.g. 2024_Jun_1
    #[arg(long)]
    pub period: Option<String>,

    /// Abort on workbooks of unknown category
    #[arg(long)]
    pub strict_categories: bool,
}

impl ConfigArgs {
    /// Defaults, then the YAML file, then flags.
    pub fn resolve(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::from_yaml_file(path)?,
            None => Config::default(),
        };
        if let Some(d) = &self.clean_dir {
            cfg.clean_dir = d.clone();
        }
        if let Some(d) = &self.extraction_dir {
            cfg.extraction_dir = d.clone();
        }
        if let Some(d) = &self.export_dir {
            cfg.export_dir = d.clone();
        }
        if let Some(engine) = self.engine {
            cfg.engine = engine;
        }
        if let Some(p) = &self.period {
            cfg.period = p.clone();
        }
        cfg.strict_categories |= self.strict_categories;

        debug!(?cfg, "resolved configuration");
        Ok(cfg)
    }
}
