//! Ordered fallback chain over DXF to SVG conversion backends.

use crate::document::SvgDocument;
use crate::error::{AdapterError, AttemptFailure, ChainExhausted};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Inputs shared by every adapter attempt for one file.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    /// Filtered drawing to convert.
    pub input: PathBuf,
    /// Directory adapters create their scratch directories in.
    pub work_root: PathBuf,
    /// Unique per pipeline run; embedded in scratch names.
    pub run_token: String,
    pub timeout: Duration,
}

impl AttemptRequest {
    pub fn new(input: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            input: input.into(),
            work_root: std::env::temp_dir(),
            run_token: uuid::Uuid::new_v4().simple().to_string(),
            timeout,
        }
    }

    pub fn input_stem(&self) -> &str {
        self.input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("drawing")
    }

    /// Creates a scratch directory owned by the caller; removed on drop.
    pub fn scratch_dir(&self, adapter: &str) -> std::io::Result<tempfile::TempDir> {
        tempfile::Builder::new()
            .prefix(&format!("nest-prep-{}-{}-", adapter, self.run_token))
            .tempdir_in(&self.work_root)
    }
}

/// A single conversion backend.
///
/// Implementations check for their backend when called, so a missing tool is an
/// ordinary [`AdapterError::BackendUnavailable`]. Any scratch files they
/// create are removed before returning.
#[cfg_attr(test, mockall::automock)]
pub trait ConversionAdapter: Send + Sync {
    fn attempt(&self, request: &AttemptRequest) -> Result<SvgDocument, AdapterError>;
}

impl<F> ConversionAdapter for F
where
    F: Fn(&AttemptRequest) -> Result<SvgDocument, AdapterError> + Send + Sync,
{
    fn attempt(&self, request: &AttemptRequest) -> Result<SvgDocument, AdapterError> {
        self(request)
    }
}

/// Wraps a closure as an adapter, fixing its signature for inference.
pub fn adapter_fn<F>(f: F) -> F
where
    F: Fn(&AttemptRequest) -> Result<SvgDocument, AdapterError> + Send + Sync,
{
    f
}

struct ChainEntry {
    id: String,
    adapter: Box<dyn ConversionAdapter>,
}

/// Successful chain run.
#[derive(Debug)]
pub struct Converted {
    pub adapter: String,
    pub document: SvgDocument,
}

/// Tries adapters strictly in insertion order until one succeeds.
#[derive(Default)]
pub struct ConversionChain {
    entries: Vec<ChainEntry>,
}

impl fmt::Debug for ConversionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionChain")
            .field("adapters", &self.adapter_ids())
            .finish()
    }
}

impl ConversionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, id: impl Into<String>, adapter: impl ConversionAdapter + 'static) -> Self {
        self.push(id, Box::new(adapter));
        self
    }

    pub fn push(&mut self, id: impl Into<String>, adapter: Box<dyn ConversionAdapter>) {
        self.entries.push(ChainEntry { id: id.into(), adapter });
    }

    pub fn adapter_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs the chain. The first success short-circuits; if every adapter
    /// fails, all reasons are returned together.
    pub fn convert(&self, request: &AttemptRequest) -> Result<Converted, ChainExhausted> {
        let mut failures = Vec::new();

        for entry in &self.entries {
            info!(adapter = %entry.id, input = %request.input.display(), "Conversion attempt started");

            match entry.adapter.attempt(request) {
                Ok(document) => {
                    info!(
                        adapter = %entry.id,
                        input = %request.input.display(),
                        paths = document.paths().len(),
                        "Conversion attempt succeeded"
                    );
                    return Ok(Converted {
                        adapter: entry.id.clone(),
                        document,
                    });
                }
                Err(reason) => {
                    warn!(
                        adapter = %entry.id,
                        input = %request.input.display(),
                        reason = %reason,
                        "Conversion attempt failed"
                    );
                    failures.push(AttemptFailure {
                        adapter: entry.id.clone(),
                        reason,
                    });
                }
            }
        }

        Err(ChainExhausted { failures })
    }
}

/// Reads an SVG file produced by an external backend.
pub fn read_svg_output(path: &Path) -> Result<SvgDocument, AdapterError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AdapterError::BackendFailed(format!("no SVG produced at {}: {}", path.display(), e))
    })?;

    SvgDocument::parse(&text)
        .map_err(|e| AdapterError::BackendFailed(format!("unreadable SVG output: {e}")))
}
