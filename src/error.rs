//! Error types for the conversion pipeline.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to split a drawing token stream into group-code/value records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("group code on line {line} has no value line")]
    Truncated { line: usize },

    #[error("line {line} is not a group code: {text:?}")]
    InvalidGroupCode { line: usize, text: String },
}

/// Failure reported by a single conversion backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend failed: {0}")]
    BackendFailed(String),

    #[error("backend timed out after {0:?}")]
    TimedOut(Duration),
}

/// One adapter's failed attempt, kept for the aggregate diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub adapter: String,
    pub reason: AdapterError,
}

/// Every adapter in the chain failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ChainExhausted {
    pub failures: Vec<AttemptFailure>,
}

impl fmt::Display for ChainExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "no conversion backends configured");
        }

        write!(f, "all {} conversion backends failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.adapter, failure.reason)?;
        }
        Ok(())
    }
}

/// The converted output could not be read as an SVG document.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("root element is <{0}>, expected <svg>")]
    NotSvg(String),
}

/// Terminal failure for one input file.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("drawing stream is truncated or malformed: {0}")]
    StreamTruncated(#[from] StreamError),

    #[error("conversion failed: {0}")]
    ConversionFailed(#[from] ChainExhausted),

    #[error("no path geometry found in converted document")]
    NoGeometryFound,

    #[error("failed to read {path}: {source}")]
    ReadFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid SVG document: {0}")]
    Document(#[from] DocumentError),
}
