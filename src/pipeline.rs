//! Per-file conversion: filter, convert, normalize, sanitize, write.
//!
//! Every stage runs in order on one document. The destination is only
//! touched by an atomic rename after all stages have succeeded, so a failed
//! or interrupted run never leaves a partial SVG behind.

use crate::backend::build_chain;
use crate::config::{NormalizeMode, PipelineConfig};
use crate::converter::{AttemptRequest, ConversionChain};
use crate::document::SvgDocument;
use crate::dxf_filter::{is_binary_dxf, EntityFilter};
use crate::error::PipelineError;
use crate::geometry::GeometryIndex;
use crate::normalize::{fix_origin, normalize_coordinates, Translation};
use crate::promote::promote_primitives;
use crate::sanitize::{sanitize, strip_disallowed, SanitizeReport};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// What happened to one successfully converted file.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub adapter: String,
    /// Entities removed by the stream filter, per type.
    pub dropped: BTreeMap<String, usize>,
    pub promoted: usize,
    pub shift: Translation,
    pub sanitize: SanitizeReport,
    pub paths: usize,
}

impl FileOutcome {
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    filter: EntityFilter,
    chain: ConversionChain,
}

impl Pipeline {
    /// Builds the pipeline with the adapter chain described by `config`.
    pub fn new(config: PipelineConfig) -> anyhow::Result<Self> {
        let chain = build_chain(&config)?;
        Ok(Self::with_chain(config, chain))
    }

    pub fn with_chain(config: PipelineConfig, chain: ConversionChain) -> Self {
        let filter = EntityFilter::new(&config.dropped_entities);
        Self { config, filter, chain }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn chain(&self) -> &ConversionChain {
        &self.chain
    }

    /// Converts `input` and writes the cleaned SVG to `output`.
    ///
    /// Blocks for as long as the backends run; call from a blocking context.
    ///
    /// # Arguments
    ///
    /// * `input` - DXF drawing (text or binary)
    /// * `output` - Destination SVG path; its directory must exist
    pub fn process_file(&self, input: &Path, output: &Path) -> Result<FileOutcome, PipelineError> {
        let bytes = std::fs::read(input).map_err(|source| PipelineError::ReadFailure {
            path: input.to_path_buf(),
            source,
        })?;

        let work_root = self.config.work_root();
        let run_token = uuid::Uuid::new_v4().simple().to_string();
        let scratch = tempfile::Builder::new()
            .prefix(&format!("nest-prep-run-{run_token}-"))
            .tempdir_in(&work_root)
            .map_err(|source| PipelineError::WriteFailure {
                path: work_root.clone(),
                source,
            })?;

        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("drawing");
        let staged = scratch.path().join(format!("{stem}.dxf"));

        let dropped = if is_binary_dxf(&bytes) {
            warn!(input = %input.display(), "Binary DXF, entity filter skipped");
            write_staged(&staged, &bytes)?;
            BTreeMap::new()
        } else {
            let filtered = self.filter.filter(&bytes)?;
            debug!(
                input = %input.display(),
                dropped = ?filtered.dropped,
                "Filtered drawing stream"
            );
            write_staged(&staged, &filtered.data)?;
            filtered.dropped
        };

        let request = AttemptRequest {
            input: staged,
            work_root,
            run_token,
            timeout: self.config.timeout(),
        };
        let converted = self.chain.convert(&request)?;
        drop(scratch);

        let mut doc = converted.document;
        let promoted = if self.config.promote_primitives {
            promote_primitives(&mut doc)
        } else {
            0
        };

        // Bounds are taken only over paths that survive sanitizing.
        let stripped = strip_disallowed(&mut doc);
        let shift = self.normalize(&mut doc)?;
        let mut report = sanitize(&mut doc, &self.config.stroke);
        report.removed_elements += stripped;
        let paths = doc.paths().len();
        if paths == 0 {
            return Err(PipelineError::NoGeometryFound);
        }

        write_atomic(output, &doc)?;

        info!(
            input = %input.display(),
            output = %output.display(),
            adapter = %converted.adapter,
            paths = paths,
            dx = shift.dx,
            dy = shift.dy,
            "File converted"
        );

        Ok(FileOutcome {
            adapter: converted.adapter,
            dropped,
            promoted,
            shift,
            sanitize: report,
            paths,
        })
    }

    fn normalize(&self, doc: &mut SvgDocument) -> Result<Translation, PipelineError> {
        match self.config.mode {
            NormalizeMode::Geometry => {
                let index = GeometryIndex::build(doc);
                normalize_coordinates(doc, &index)
            }
            NormalizeMode::ViewBox => Ok(fix_origin(doc)),
        }
    }
}

fn write_staged(path: &Path, data: &[u8]) -> Result<(), PipelineError> {
    std::fs::write(path, data).map_err(|source| PipelineError::WriteFailure {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes to a temporary file beside `output`, then renames it into place.
fn write_atomic(output: &Path, doc: &SvgDocument) -> Result<(), PipelineError> {
    let write_failure = |source| PipelineError::WriteFailure {
        path: output.to_path_buf(),
        source,
    };

    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir).map_err(write_failure)?;
    file.write_all(doc.to_xml().as_bytes()).map_err(write_failure)?;
    file.as_file().sync_all().map_err(write_failure)?;
    file.persist(output).map_err(|e| write_failure(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::adapter_fn;
    use crate::error::AdapterError;
    use pretty_assertions::assert_eq;

    const DRAWING: &str = "0\r\nSECTION\r\n2\r\nENTITIES\r\n0\r\nTEXT\r\n1\r\nLabel\r\n0\r\nLINE\r\n10\r\n0\r\n0\r\nENDSEC\r\n0\r\nEOF\r\n";

    fn svg(body: &str) -> SvgDocument {
        SvgDocument::parse(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="-50 -50 200 200">{body}</svg>"#
        ))
        .unwrap()
    }

    fn pipeline_with(chain: ConversionChain, mode: NormalizeMode) -> Pipeline {
        let config = PipelineConfig {
            mode,
            ..PipelineConfig::default()
        };
        Pipeline::with_chain(config, chain)
    }

    fn write_input(dir: &Path) -> std::path::PathBuf {
        let input = dir.join("part.dxf");
        std::fs::write(&input, DRAWING).unwrap();
        input
    }

    #[test]
    fn test_full_pipeline_geometry_mode() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        let output = dir.path().join("part.svg");

        let chain = ConversionChain::new()
            .with_adapter("broken", adapter_fn(|_| Err(AdapterError::BackendFailed("nope".to_string()))))
            .with_adapter(
                "fixture",
                adapter_fn(|r| {
                    let staged = std::fs::read_to_string(&r.input).unwrap();
                    assert!(!staged.contains("TEXT"));
                    assert!(staged.contains("LINE"));
                    Ok(svg(r#"<text>x</text><g id="layer"><path d="M10,10 L90,10 L90,90 L10,90 Z" fill="red"/></g><g id="empty"/>"#))
                }),
            );

        let outcome = pipeline_with(chain, NormalizeMode::Geometry)
            .process_file(&input, &output)
            .unwrap();

        assert_eq!(outcome.adapter, "fixture");
        assert_eq!(outcome.dropped.get("TEXT"), Some(&1));
        assert_eq!(outcome.paths, 1);

        let written = SvgDocument::parse(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written.root.attr("viewBox"), Some("0 0 80 80"));
        let path = written.paths()[0];
        assert_eq!(path.attr("d"), Some("M0,0 L80,0 L80,80 L0,80 Z"));
        assert_eq!(path.attr("fill"), Some("none"));
        assert_eq!(path.attr("stroke"), Some("black"));
        assert!(!written.to_xml().contains("<text"));
    }

    #[test]
    fn test_definition_paths_do_not_move_origin() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        let output = dir.path().join("part.svg");

        let chain = ConversionChain::new().with_adapter(
            "fixture",
            adapter_fn(|_| {
                Ok(svg(r#"<defs><path d="M-100,-100 L-90,-90"/></defs><path d="M10,10 L90,10 L90,90 L10,90 Z"/>"#))
            }),
        );

        let outcome = pipeline_with(chain, NormalizeMode::Geometry)
            .process_file(&input, &output)
            .unwrap();

        assert_eq!(outcome.shift, Translation { dx: -10.0, dy: -10.0 });
        let written = SvgDocument::parse(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written.root.attr("viewBox"), Some("0 0 80 80"));
        assert_eq!(written.paths().len(), 1);
        assert_eq!(written.paths()[0].attr("d"), Some("M0,0 L80,0 L80,80 L0,80 Z"));
    }

    #[test]
    fn test_code_page_drawing_reaches_backend_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("plate.dxf");
        // LINE on layer "Слой" (cp1251), nothing to drop.
        let drawing: &[u8] =
            b"0\r\nSECTION\r\n2\r\nENTITIES\r\n0\r\nLINE\r\n8\r\n\xD1\xEB\xEE\xE9\r\n0\r\nENDSEC\r\n0\r\nEOF\r\n";
        std::fs::write(&input, drawing).unwrap();

        let chain = ConversionChain::new().with_adapter(
            "fixture",
            adapter_fn(move |r| {
                assert_eq!(std::fs::read(&r.input).unwrap(), drawing);
                Ok(svg(r#"<path d="M0,0 L1,1"/>"#))
            }),
        );

        pipeline_with(chain, NormalizeMode::Geometry)
            .process_file(&input, &dir.path().join("plate.svg"))
            .unwrap();
    }

    #[test]
    fn test_viewbox_mode_wraps_content() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        let output = dir.path().join("part.svg");

        let chain = ConversionChain::new()
            .with_adapter("fixture", adapter_fn(|_| Ok(svg(r#"<path d="M-50,-50 L10,10"/>"#))));

        let outcome = pipeline_with(chain, NormalizeMode::ViewBox)
            .process_file(&input, &output)
            .unwrap();

        assert_eq!(outcome.shift, Translation { dx: 50.0, dy: 50.0 });
        let written = SvgDocument::parse(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written.root.attr("viewBox"), Some("0 0 250 250"));
        assert_eq!(written.paths()[0].attr("d"), Some("M-50,-50 L10,10"));
    }

    #[test]
    fn test_primitives_are_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        let output = dir.path().join("part.svg");

        let chain = ConversionChain::new().with_adapter(
            "fixture",
            adapter_fn(|_| Ok(svg(r#"<line x1="5" y1="5" x2="15" y2="25"/>"#))),
        );

        let outcome = pipeline_with(chain, NormalizeMode::Geometry)
            .process_file(&input, &output)
            .unwrap();

        assert_eq!(outcome.promoted, 1);
        let written = SvgDocument::parse(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written.root.attr("viewBox"), Some("0 0 10 20"));
    }

    #[test]
    fn test_empty_geometry_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        let output = dir.path().join("part.svg");

        let chain = ConversionChain::new()
            .with_adapter("fixture", adapter_fn(|_| Ok(svg("<text>only text</text>"))));

        let err = pipeline_with(chain, NormalizeMode::Geometry)
            .process_file(&input, &output)
            .unwrap_err();

        assert!(matches!(err, PipelineError::NoGeometryFound));
        assert!(!output.exists());
    }

    #[test]
    fn test_exhausted_chain_reports_every_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        let output = dir.path().join("part.svg");

        let chain = ConversionChain::new()
            .with_adapter("a", adapter_fn(|_| Err(AdapterError::BackendUnavailable("a".to_string()))))
            .with_adapter("b", adapter_fn(|_| Err(AdapterError::BackendFailed("b".to_string()))));

        let err = pipeline_with(chain, NormalizeMode::Geometry)
            .process_file(&input, &output)
            .unwrap_err();

        match err {
            PipelineError::ConversionFailed(exhausted) => assert_eq!(exhausted.failures.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!output.exists());
    }

    #[test]
    fn test_truncated_stream_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cut.dxf");
        std::fs::write(&input, "0\nSECTION\n2\nENTITIES\n0\nLINE\n10").unwrap();

        let chain = ConversionChain::new().with_adapter("fixture", adapter_fn(|_| Ok(svg("<path d=\"M0,0 L1,1\"/>"))));
        let err = pipeline_with(chain, NormalizeMode::Geometry)
            .process_file(&input, &dir.path().join("cut.svg"))
            .unwrap_err();

        assert!(matches!(err, PipelineError::StreamTruncated(_)));
    }

    #[test]
    fn test_missing_input_is_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ConversionChain::new();
        let err = pipeline_with(chain, NormalizeMode::Geometry)
            .process_file(&dir.path().join("absent.dxf"), &dir.path().join("absent.svg"))
            .unwrap_err();

        assert!(matches!(err, PipelineError::ReadFailure { .. }));
    }

    #[test]
    fn test_missing_output_dir_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        let output = dir.path().join("missing").join("part.svg");

        let chain = ConversionChain::new().with_adapter("fixture", adapter_fn(|_| Ok(svg("<path d=\"M0,0 L1,1\"/>"))));
        let err = pipeline_with(chain, NormalizeMode::Geometry)
            .process_file(&input, &output)
            .unwrap_err();

        assert!(matches!(err, PipelineError::WriteFailure { .. }));
    }

    #[test]
    fn test_scratch_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());

        let config = PipelineConfig {
            temp_dir: Some(work.path().to_path_buf()),
            ..PipelineConfig::default()
        };
        let chain = ConversionChain::new().with_adapter("fixture", adapter_fn(|_| Ok(svg("<path d=\"M0,0 L1,1\"/>"))));
        Pipeline::with_chain(config, chain)
            .process_file(&input, &dir.path().join("part.svg"))
            .unwrap();

        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }
}
