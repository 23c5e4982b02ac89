//! nest-prep command line.
//!
//! Converts one DXF file, or every DXF file in a directory, into
//! outline-only SVG anchored at the origin.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `NESTPREP_CONFIG`: JSON configuration file
//! - `WORKER_CONCURRENCY`: Number of files converted in parallel (default: 4)
//! - `NESTPREP_TIMEOUT_SECS`: Per-backend timeout (default: 120)
//! - `NESTPREP_ADAPTERS`: Comma-separated adapter order
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint; telemetry is off when unset
//! - `RUST_LOG`: Log level (default: info)

use anyhow::{Context, Result};
use nest_prep::backend::native::CutMetrics;
use nest_prep::batch::{discover_inputs, BatchItem, BatchRunner};
use nest_prep::config::{parse_adapter_list, NormalizeMode, PipelineConfig};
use nest_prep::pipeline::Pipeline;
use nest_prep::telemetry;
use pico_args::Arguments;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
nest-prep converts DXF drawings into packing-ready SVG.

USAGE:
  nest-prep [OPTIONS] <input> <output>

OPTIONS:
  -h, --help                  Prints help information
  -V, --version               Prints version information

  --adapters LIST             Comma-separated adapter order
                              [default: native,ezdxf,oda-dxf2svg,inkscape]
  --config FILE               JSON configuration file
  --report FILE               Writes a JSON batch report
  --concurrency NUM           Files converted in parallel [default: 4]
  --timeout SECS              Per-backend timeout [default: 120]
  --mode MODE                 Origin normalization [default: geometry]
                              [possible values: geometry, viewbox]
  --metrics                   Prints cut length and piercing count as JSON
                              instead of converting
  --json-logs                 Emits logs as JSON

ARGS:
  <input>                     DXF file, or a directory of DXF files
  <output>                    SVG file, or a directory for <stem>.svg files
";

#[derive(Debug)]
struct Args {
    adapters: Option<Vec<String>>,
    config: Option<PathBuf>,
    report: Option<PathBuf>,
    concurrency: Option<usize>,
    timeout: Option<u64>,
    mode: Option<NormalizeMode>,
    metrics: bool,
    json_logs: bool,
    input: PathBuf,
    output: PathBuf,
}

fn collect_args() -> Result<Args, pico_args::Error> {
    let mut input = Arguments::from_env();

    if input.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    if input.contains(["-V", "--version"]) {
        println!("{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    let args = Args {
        adapters: input.opt_value_from_fn("--adapters", parse_adapters)?,
        config: input.opt_value_from_str("--config")?,
        report: input.opt_value_from_str("--report")?,
        concurrency: input.opt_value_from_str("--concurrency")?,
        timeout: input.opt_value_from_str("--timeout")?,
        mode: input.opt_value_from_str("--mode")?,
        metrics: input.contains("--metrics"),
        json_logs: input.contains("--json-logs"),
        input: input.free_from_str()?,
        output: input.free_from_str()?,
    };

    let remaining = input.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {:?}", remaining);
    }

    Ok(args)
}

fn parse_adapters(s: &str) -> Result<Vec<String>, String> {
    let adapters = parse_adapter_list(s);
    if adapters.is_empty() {
        return Err("adapter list is empty".to_string());
    }
    Ok(adapters)
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match collect_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}.", e);
            return ExitCode::from(2);
        }
    };

    init_logging(args.json_logs);

    let telemetry_enabled = std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT").is_some();
    if telemetry_enabled {
        if let Err(e) = telemetry::init_telemetry() {
            warn!("Failed to initialize telemetry: {}", e);
        }
    }

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    };

    if telemetry_enabled {
        telemetry::shutdown_telemetry();
    }
    code
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(adapters) = args.adapters {
        config.adapters = adapters;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    config.validate().context("Invalid configuration")?;

    let items = discover_inputs(&args.input, &args.output)?;
    if items.is_empty() {
        warn!(input = %args.input.display(), "No DXF files found");
        return Ok(ExitCode::SUCCESS);
    }

    if args.metrics {
        return Ok(print_metrics(&items));
    }

    info!(
        files = items.len(),
        adapters = ?config.adapters,
        mode = %config.mode,
        concurrency = config.concurrency,
        "Starting conversion"
    );

    let concurrency = config.concurrency;
    let pipeline = Arc::new(Pipeline::new(config).context("Failed to build conversion chain")?);
    let runner = BatchRunner::new(pipeline, concurrency);

    let token = runner.cancellation_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, finishing files in progress");
            token.cancel();
        }
    });

    let report = runner.run(items).await;
    eprintln!("{}", report.summary());

    if let Some(path) = args.report {
        report.write_json(&path)?;
        info!(path = %path.display(), "Batch report written");
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_metrics(items: &[BatchItem]) -> ExitCode {
    let mut failed = false;

    for item in items {
        match CutMetrics::from_file(&item.input) {
            Ok(metrics) => {
                let line = serde_json::json!({
                    "input": item.input.display().to_string(),
                    "metrics": metrics,
                });
                println!("{}", line);
            }
            Err(e) => {
                error!(input = %item.input.display(), error = %e, "Failed to measure drawing");
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
