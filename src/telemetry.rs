//! OpenTelemetry spans and structured logs for conversion runs.

use crate::batch::BatchReport;
use crate::job::{ConversionJob, JobStatus};
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};

const TRACER_NAME: &str = "nest-prep";

/// Files taking longer than this are logged as slow.
const SLOW_FILE_MS: i64 = 30_000;

/// Records telemetry for a finished file.
///
/// Emits one `dxf_conversion_job` span with the job's status, adapter,
/// duration and error, plus a structured log line.
///
/// # Arguments
///
/// * `job` - The completed, failed or cancelled job
pub fn record_job_telemetry(job: &ConversionJob) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("dxf_conversion_job");

    for attribute in job_attributes(job) {
        span.set_attribute(attribute);
    }

    if let Some(duration_ms) = job.processing_duration_ms() {
        info!(
            job_id = %job.job_id,
            duration_ms = duration_ms,
            status = %job.status,
            adapter = job.adapter.as_deref().unwrap_or("-"),
            "Conversion job finished"
        );

        if duration_ms > SLOW_FILE_MS {
            warn!(
                job_id = %job.job_id,
                duration_ms = duration_ms,
                "Conversion exceeded performance threshold ({}ms)",
                SLOW_FILE_MS
            );
        }
    }

    span.end();
}

/// Span attributes for one job: status, adapter, duration and error.
fn job_attributes(job: &ConversionJob) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new("job_id", job.job_id.clone()),
        KeyValue::new("input", job.input_path.display().to_string()),
        KeyValue::new("status", job.status.to_string()),
        KeyValue::new("dropped_entities", job.dropped_entities as i64),
    ];

    if let Some(ref adapter) = job.adapter {
        attributes.push(KeyValue::new("adapter", adapter.clone()));
    }

    if let Some(duration_ms) = job.processing_duration_ms() {
        attributes.push(KeyValue::new("duration_ms", duration_ms));
    }

    if job.status == JobStatus::Failed {
        if let Some(ref error) = job.error {
            attributes.push(KeyValue::new("error", error.clone()));
        }
    }

    attributes
}

/// Records one span summarizing a batch run.
pub fn record_batch_summary(report: &BatchReport) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("dxf_conversion_batch");

    for attribute in batch_attributes(report) {
        span.set_attribute(attribute);
    }
    span.end();
}

fn batch_attributes(report: &BatchReport) -> Vec<KeyValue> {
    vec![
        KeyValue::new("files", report.jobs.len() as i64),
        KeyValue::new("converted", report.succeeded() as i64),
        KeyValue::new("failed", report.failed() as i64),
        KeyValue::new("cancelled", report.cancelled() as i64),
        KeyValue::new("duration_ms", report.duration_ms()),
    ]
}

/// Initializes OpenTelemetry with the OTLP exporter.
///
/// Call once at startup, inside the tokio runtime, and only when an
/// exporter endpoint is configured. Reads:
/// - `OTEL_EXPORTER_OTLP_ENDPOINT` - Collector endpoint (default: http://localhost:4317)
/// - `OTEL_SERVICE_NAME` - Service name (default: nest-prep)
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| TRACER_NAME.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    if let Some(provider) = tracer.provider() {
        global::set_tracer_provider(provider);
    }

    info!(endpoint = %endpoint, "Telemetry initialized");
    Ok(())
}

/// Flushes pending spans before exit.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
