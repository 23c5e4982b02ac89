//! Backends driven by external programs.
//!
//! An adapter is a list of command steps run in a private scratch directory.
//! Arguments may use the placeholders `{input}`, `{output}`, `{work_dir}` and
//! `{stem}`. A step may name a file it produces as the `{input}` of the next
//! step, which is how a re-save through the ODA converter feeds a second
//! converter.

use crate::converter::{read_svg_output, AttemptRequest, ConversionAdapter};
use crate::document::SvgDocument;
use crate::error::AdapterError;
use crate::process::run_command;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStep {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory, relative to the scratch directory.
    #[serde(default)]
    pub current_dir: Option<String>,
    /// File this step produces that becomes `{input}` for the next step.
    #[serde(default)]
    pub next_input: Option<String>,
}

impl CommandStep {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            current_dir: None,
            next_input: None,
        }
    }

    pub fn in_dir(mut self, dir: &str) -> Self {
        self.current_dir = Some(dir.to_string());
        self
    }

    pub fn producing(mut self, next_input: &str) -> Self {
        self.next_input = Some(next_input.to_string());
        self
    }
}

/// Declarative definition of an external backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAdapterSpec {
    pub id: String,
    pub steps: Vec<CommandStep>,
    /// SVG the final step writes, relative to the scratch directory.
    pub output: String,
}

impl CommandAdapterSpec {
    /// `python dxf2svg_ezdxf.py {input} {output}`.
    pub fn ezdxf(script: &str) -> Self {
        Self {
            id: "ezdxf".to_string(),
            steps: vec![CommandStep::new("python", &[script, "{input}", "{output}"])],
            output: "{stem}.svg".to_string(),
        }
    }

    /// ODA File Converter re-save to R12, then `python -m dxf2svg`.
    pub fn oda_dxf2svg(oda_program: &str) -> Self {
        Self {
            id: "oda-dxf2svg".to_string(),
            steps: vec![
                CommandStep::new(
                    oda_program,
                    &["{work_dir}", "{work_dir}/r12", "ACAD12", "DXF", "0", "1", "*.dxf"],
                )
                .producing("r12/{stem}.dxf"),
                CommandStep::new("python", &["-m", "dxf2svg", "{stem}.dxf"]).in_dir("r12"),
            ],
            output: "r12/{stem}.svg".to_string(),
        }
    }

    /// `inkscape {input} --export-type=svg --export-filename {output}`.
    pub fn inkscape() -> Self {
        Self {
            id: "inkscape".to_string(),
            steps: vec![CommandStep::new(
                "inkscape",
                &["{input}", "--export-type=svg", "--export-filename", "{output}"],
            )],
            output: "{stem}.svg".to_string(),
        }
    }
}

struct Placeholders<'a> {
    input: &'a Path,
    output: &'a Path,
    work_dir: &'a Path,
    stem: &'a str,
}

impl Placeholders<'_> {
    fn expand(&self, template: &str) -> String {
        template
            .replace("{input}", &self.input.to_string_lossy())
            .replace("{output}", &self.output.to_string_lossy())
            .replace("{work_dir}", &self.work_dir.to_string_lossy())
            .replace("{stem}", self.stem)
    }
}

pub struct CommandAdapter {
    spec: CommandAdapterSpec,
}

impl CommandAdapter {
    pub fn new(spec: CommandAdapterSpec) -> Self {
        Self { spec }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    fn run_steps(&self, request: &AttemptRequest, work_dir: &Path) -> Result<SvgDocument, AdapterError> {
        let stem = request.input_stem();
        let staged = work_dir.join(format!("{stem}.dxf"));
        std::fs::copy(&request.input, &staged).map_err(|e| {
            AdapterError::BackendFailed(format!("failed to stage {}: {}", request.input.display(), e))
        })?;

        let output_template = Placeholders {
            input: &staged,
            output: Path::new(""),
            work_dir,
            stem,
        }
        .expand(&self.spec.output);
        let output = work_dir.join(output_template);

        let deadline = Instant::now() + request.timeout;
        let mut input: PathBuf = staged;

        for step in &self.spec.steps {
            let vars = Placeholders {
                input: &input,
                output: &output,
                work_dir,
                stem,
            };
            let args: Vec<String> = step.args.iter().map(|a| vars.expand(a)).collect();
            let current_dir = step.current_dir.as_deref().map(|d| work_dir.join(vars.expand(d)));
            let next_input = step.next_input.as_deref().map(|n| work_dir.join(vars.expand(n)));

            if let Some(parent) = next_input.as_deref().and_then(Path::parent) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AdapterError::BackendFailed(format!("failed to prepare {}: {}", parent.display(), e))
                })?;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AdapterError::TimedOut(request.timeout));
            }

            run_command(&step.program, &args, current_dir.as_deref(), remaining).map_err(|e| match e {
                AdapterError::TimedOut(_) => AdapterError::TimedOut(request.timeout),
                other => other,
            })?;

            if let Some(next) = next_input {
                if !next.exists() {
                    return Err(AdapterError::BackendFailed(format!(
                        "{} did not produce {}",
                        step.program,
                        next.display()
                    )));
                }
                input = next;
            }
        }

        read_svg_output(&output)
    }
}

impl ConversionAdapter for CommandAdapter {
    fn attempt(&self, request: &AttemptRequest) -> Result<SvgDocument, AdapterError> {
        let scratch = request.scratch_dir(&self.spec.id).map_err(|e| {
            AdapterError::BackendFailed(format!("failed to create scratch directory: {e}"))
        })?;
        debug!(adapter = %self.spec.id, work_dir = %scratch.path().display(), "Running command backend");

        let result = self.run_steps(request, scratch.path());

        if let Err(e) = scratch.close() {
            warn!(adapter = %self.spec.id, error = %e, "Failed to remove scratch directory");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request_in(root: &Path, input: &Path) -> AttemptRequest {
        let mut request = AttemptRequest::new(input, Duration::from_secs(10));
        request.work_root = root.to_path_buf();
        request
    }

    fn scratch_entries(root: &Path) -> usize {
        std::fs::read_dir(root)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().starts_with("nest-prep-"))
                    .unwrap_or(false)
            })
            .count()
    }

    #[test]
    fn test_placeholder_expansion() {
        let vars = Placeholders {
            input: Path::new("/w/part.dxf"),
            output: Path::new("/w/part.svg"),
            work_dir: Path::new("/w"),
            stem: "part",
        };
        assert_eq!(vars.expand("{work_dir}/r12/{stem}.dxf"), "/w/r12/part.dxf");
        assert_eq!(vars.expand("--in={input} --out={output}"), "--in=/w/part.dxf --out=/w/part.svg");
    }

    #[test]
    fn test_missing_program_is_unavailable_and_cleaned_up() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("part.dxf");
        std::fs::write(&input, "0\nEOF\n").unwrap();

        let adapter = CommandAdapter::new(CommandAdapterSpec {
            id: "ghost".to_string(),
            steps: vec![CommandStep::new("nest-prep-no-such-converter", &["{input}", "{output}"])],
            output: "{stem}.svg".to_string(),
        });

        let err = adapter.attempt(&request_in(root.path(), &input)).unwrap_err();
        assert!(matches!(err, AdapterError::BackendUnavailable(_)));
        assert_eq!(scratch_entries(root.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_backend_produces_svg() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("bracket.dxf");
        std::fs::write(&input, "0\nEOF\n").unwrap();

        let adapter = CommandAdapter::new(CommandAdapterSpec {
            id: "sh".to_string(),
            steps: vec![CommandStep::new(
                "sh",
                &[
                    "-c",
                    "printf '<svg xmlns=\"http://www.w3.org/2000/svg\"><path d=\"M0,0 L1,1\"/></svg>' > \"$1\"",
                    "sh",
                    "{output}",
                ],
            )],
            output: "{stem}.svg".to_string(),
        });

        let doc = adapter.attempt(&request_in(root.path(), &input)).unwrap();
        assert_eq!(doc.paths().len(), 1);
        assert_eq!(scratch_entries(root.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_intermediate_output_fails() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("part.dxf");
        std::fs::write(&input, "0\nEOF\n").unwrap();

        let adapter = CommandAdapter::new(CommandAdapterSpec {
            id: "resave".to_string(),
            steps: vec![CommandStep::new("true", &[]).producing("r12/{stem}.dxf")],
            output: "r12/{stem}.svg".to_string(),
        });

        let err = adapter.attempt(&request_in(root.path(), &input)).unwrap_err();
        match err {
            AdapterError::BackendFailed(reason) => assert!(reason.contains("did not produce")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_builtin_specs() {
        let oda = CommandAdapterSpec::oda_dxf2svg("ODAFileConverter");
        assert_eq!(oda.steps.len(), 2);
        assert_eq!(oda.steps[0].next_input.as_deref(), Some("r12/{stem}.dxf"));
        assert_eq!(CommandAdapterSpec::inkscape().id, "inkscape");
        assert_eq!(CommandAdapterSpec::ezdxf("dxf2svg_ezdxf.py").steps[0].program, "python");
    }
}
