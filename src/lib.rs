//! nest-prep: DXF to packing-ready SVG conversion
//!
//! Turns CAD drawings into outline-only SVG documents anchored at the origin,
//! ready to be fed to a nesting engine. Conversion itself is delegated to an
//! ordered chain of backends; the first one that succeeds wins.
//!
//! ## Module Overview
//!
//! - `dxf_filter`: removes unwanted entities from the DXF token stream
//! - `converter`: adapter trait and the ordered fallback chain
//! - `backend`: in-process `dxf` backend and external command backends
//! - `geometry`: path parsing and global bounding box
//! - `normalize`: coordinate normalization and viewBox origin fixing
//! - `sanitize`: reduction to path-only content
//! - `pipeline`: the per-file stage sequence and atomic output write
//! - `batch`: concurrent multi-file runs and reports
//! - `telemetry`: OpenTelemetry integration and structured logging
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use nest_prep::{config::PipelineConfig, pipeline::Pipeline};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::new(PipelineConfig::load(None)?)?;
//!     let outcome = pipeline.process_file(Path::new("bracket.dxf"), Path::new("bracket.svg"))?;
//!     println!("converted by {}", outcome.adapter);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod batch;
pub mod config;
pub mod converter;
pub mod document;
pub mod dxf_filter;
pub mod error;
pub mod geometry;
pub mod job;
pub mod normalize;
pub mod pipeline;
pub mod process;
pub mod promote;
pub mod sanitize;
pub mod telemetry;
