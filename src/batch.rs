//! Multi-file conversion.
//!
//! Files are converted concurrently on blocking worker threads, bounded by a
//! semaphore. A failed file never stops the batch; the report lists every
//! failure at the end. Cancelling stops new files from starting while
//! in-flight ones finish.

use crate::job::{ConversionJob, JobStatus};
use crate::pipeline::Pipeline;
use crate::telemetry;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One input file and where its SVG goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Expands the command-line input/output pair into batch items.
///
/// A directory input yields every `*.dxf` file in it (extension matched
/// case-insensitively, sorted by name), each written as `<stem>.svg` under
/// the output directory, which is created if needed. A file input writes to
/// `output`, or to `output/<stem>.svg` when `output` is a directory.
pub fn discover_inputs(input: &Path, output: &Path) -> Result<Vec<BatchItem>> {
    if input.is_dir() {
        let mut inputs = Vec::new();
        for entry in std::fs::read_dir(input)
            .with_context(|| format!("Failed to list input directory {}", input.display()))?
        {
            let path = entry?.path();
            if path.is_file() && has_dxf_extension(&path) {
                inputs.push(path);
            }
        }
        inputs.sort();

        std::fs::create_dir_all(output)
            .with_context(|| format!("Failed to create output directory {}", output.display()))?;

        let items: Vec<BatchItem> = inputs
            .into_iter()
            .map(|input| {
                let output = output.join(svg_name(&input));
                BatchItem { input, output }
            })
            .collect();
        check_distinct_outputs(&items)?;
        return Ok(items);
    }

    if !input.is_file() {
        bail!("input not found: {}", input.display());
    }

    let output = if output.is_dir() {
        output.join(svg_name(input))
    } else {
        output.to_path_buf()
    };

    Ok(vec![BatchItem {
        input: input.to_path_buf(),
        output,
    }])
}

/// Fails when two inputs would write the same SVG, such as `part.dxf` and
/// `part.DXF`. Names are compared case-insensitively so the check holds on
/// case-insensitive output filesystems too.
fn check_distinct_outputs(items: &[BatchItem]) -> Result<()> {
    let mut seen: HashMap<String, &Path> = HashMap::new();
    for item in items {
        let key = item.output.to_string_lossy().to_lowercase();
        if let Some(first) = seen.insert(key, &item.input) {
            bail!(
                "{} and {} would both be written to {}",
                first.display(),
                item.input.display(),
                item.output.display()
            );
        }
    }
    Ok(())
}

fn has_dxf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("dxf"))
}

fn svg_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "drawing".to_string());
    format!("{stem}.svg")
}

/// Outcome of a batch run, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub jobs: Vec<ConversionJob>,
}

impl BatchReport {
    fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(JobStatus::Complete)
    }

    pub fn failed(&self) -> usize {
        self.count(JobStatus::Failed)
    }

    pub fn cancelled(&self) -> usize {
        self.count(JobStatus::Cancelled)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConversionJob> {
        self.jobs.iter().filter(|j| j.status == JobStatus::Failed)
    }

    /// True when every file was converted.
    pub fn is_success(&self) -> bool {
        self.jobs.iter().all(|j| j.status == JobStatus::Complete)
    }

    pub fn duration_ms(&self) -> i64 {
        self.finished_at
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    /// Human-readable summary: counts, then one line per failed file.
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{} file(s): {} converted, {} failed, {} cancelled",
            self.jobs.len(),
            self.succeeded(),
            self.failed(),
            self.cancelled()
        );
        for job in self.failures() {
            text.push_str(&format!(
                "\n  {}: {}",
                job.input_path.display(),
                job.error.as_deref().unwrap_or("unknown error")
            ));
        }
        text
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize batch report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write batch report {}", path.display()))?;
        Ok(())
    }
}

enum Slot {
    Running(JoinHandle<ConversionJob>, ConversionJob),
    Skipped(ConversionJob),
}

pub struct BatchRunner {
    pipeline: Arc<Pipeline>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(pipeline: Arc<Pipeline>, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops scheduling new files when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, items: Vec<BatchItem>) -> BatchReport {
        let started_at = Utc::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut slots = Vec::with_capacity(items.len());

        info!(files = items.len(), concurrency = self.concurrency, "Batch started");

        for item in items {
            let mut job = ConversionJob::new(item.input, item.output);

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                job.mark_cancelled();
                slots.push(Slot::Skipped(job));
                continue;
            };

            let pipeline = self.pipeline.clone();
            let pending = job.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let job = run_job(&pipeline, job);
                drop(permit);
                job
            });
            slots.push(Slot::Running(handle, pending));
        }

        let mut jobs = Vec::with_capacity(slots.len());
        for slot in slots {
            let job = match slot {
                Slot::Skipped(job) => {
                    warn!(job_id = %job.job_id, input = %job.input_path.display(), "File skipped, batch cancelled");
                    job
                }
                Slot::Running(handle, mut pending) => match handle.await {
                    Ok(job) => job,
                    Err(e) => {
                        error!(job_id = %pending.job_id, error = %e, "Conversion worker crashed");
                        pending.mark_failed(format!("conversion worker crashed: {e}"));
                        pending
                    }
                },
            };
            jobs.push(job);
        }

        let report = BatchReport {
            started_at,
            finished_at: Utc::now(),
            jobs,
        };

        info!(
            converted = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            duration_ms = report.duration_ms(),
            "Batch finished"
        );
        telemetry::record_batch_summary(&report);
        report
    }
}

fn run_job(pipeline: &Pipeline, mut job: ConversionJob) -> ConversionJob {
    info!(job_id = %job.job_id, input = %job.input_path.display(), "Processing file");
    job.start_processing();

    match pipeline.process_file(&job.input_path, &job.output_path) {
        Ok(outcome) => {
            job.dropped_entities = outcome.dropped_total();
            job.mark_complete(outcome.adapter);
        }
        Err(e) => {
            error!(job_id = %job.job_id, input = %job.input_path.display(), error = %e, "File failed");
            job.mark_failed(e.to_string());
        }
    }

    telemetry::record_job_telemetry(&job);
    job
}
