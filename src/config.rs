//! Pipeline configuration.
//!
//! Values come from, in increasing priority: built-in defaults, an optional
//! JSON file, environment variables, then command-line flags (applied by the
//! binary).
//!
//! Environment variables:
//! - `NESTPREP_CONFIG`: JSON configuration file (when `--config` is absent)
//! - `WORKER_CONCURRENCY`: files converted in parallel (default: 4)
//! - `NESTPREP_TIMEOUT_SECS`: per-backend timeout (default: 120)
//! - `NESTPREP_ADAPTERS`: comma-separated adapter order

use crate::backend::command::CommandAdapterSpec;
use crate::dxf_filter::DEFAULT_DROPPED_ENTITIES;
use crate::sanitize::DEFAULT_STROKE;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// How a converted document is brought to a non-negative origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMode {
    /// Rewrite every path so the geometry's minimum corner is (0,0).
    #[default]
    Geometry,
    /// Only move the viewBox, wrapping content in a translate group.
    ViewBox,
}

impl fmt::Display for NormalizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeMode::Geometry => write!(f, "geometry"),
            NormalizeMode::ViewBox => write!(f, "viewbox"),
        }
    }
}

impl FromStr for NormalizeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "geometry" => Ok(NormalizeMode::Geometry),
            "viewbox" => Ok(NormalizeMode::ViewBox),
            other => bail!("unknown normalization mode: {other} (expected geometry or viewbox)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Entity types removed from the drawing before conversion.
    pub dropped_entities: Vec<String>,
    /// Adapter ids, tried in order.
    pub adapters: Vec<String>,
    pub timeout_secs: u64,
    pub mode: NormalizeMode,
    pub promote_primitives: bool,
    pub stroke: String,
    pub concurrency: usize,
    /// Parent of all scratch directories; system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    pub commands: Vec<CommandAdapterSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dropped_entities: DEFAULT_DROPPED_ENTITIES.iter().map(|s| s.to_string()).collect(),
            adapters: ["native", "ezdxf", "oda-dxf2svg", "inkscape"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout_secs: 120,
            mode: NormalizeMode::Geometry,
            promote_primitives: true,
            stroke: DEFAULT_STROKE.to_string(),
            concurrency: 4,
            temp_dir: None,
            commands: vec![
                CommandAdapterSpec::ezdxf("dxf2svg_ezdxf.py"),
                CommandAdapterSpec::oda_dxf2svg("ODAFileConverter"),
                CommandAdapterSpec::inkscape(),
            ],
        }
    }
}

impl PipelineConfig {
    /// Loads the file (if any) and applies environment overrides.
    ///
    /// # Arguments
    ///
    /// * `path` - Explicit config file; falls back to `NESTPREP_CONFIG`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("NESTPREP_CONFIG").map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Applies environment-style overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("WORKER_CONCURRENCY") {
            self.concurrency = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid WORKER_CONCURRENCY: {value}"))?;
            debug!(concurrency = self.concurrency, "Concurrency overridden");
        }

        if let Some(value) = lookup("NESTPREP_TIMEOUT_SECS") {
            self.timeout_secs = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid NESTPREP_TIMEOUT_SECS: {value}"))?;
            debug!(timeout_secs = self.timeout_secs, "Timeout overridden");
        }

        if let Some(value) = lookup("NESTPREP_ADAPTERS") {
            self.adapters = parse_adapter_list(&value);
            debug!(adapters = ?self.adapters, "Adapter order overridden");
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.timeout_secs == 0 {
            bail!("timeout must be at least 1 second");
        }
        if self.adapters.is_empty() {
            bail!("adapter order is empty");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn work_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Splits `a, b,,c` into `["a", "b", "c"]`.
pub fn parse_adapter_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
