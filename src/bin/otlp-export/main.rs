// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use opentelemetry::KeyValue;
use opentelemetry::trace::{SpanContext, SpanId, SpanKind, TraceFlags, TraceId, TraceState};
use otlp_exporter::export::metric::{
    Aggregation, Descriptor, InMemoryCheckpointSet, InstrumentKind, Number, NumberKind, Record,
};
use otlp_exporter::export::resource::{AttributeSet, Resource};
use otlp_exporter::export::trace::{InstrumentationLibrary, SpanSnapshot};
use otlp_exporter::exporters::otlp::context::ExportContext;
use otlp_exporter::exporters::otlp::exporter::Exporter;
use otlp_exporter::init::OTLPExporterArgs;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Export synthetic spans and metrics on an interval
    Run(Box<RunArgs>),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "otlp-export")]
#[command(bin_name = "otlp-export")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "OTLP_EXPORT_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    #[command(flatten)]
    exporter: OTLPExporterArgs,

    /// Time between export cycles
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Spans per export cycle
    #[arg(long, default_value = "10")]
    spans_per_batch: usize,

    /// Stop after this many cycles, run until interrupted if unset
    #[arg(long)]
    cycles: Option<u64>,

    /// service.name resource attribute
    #[arg(long, default_value = "otlp-export")]
    service_name: String,

    /// Bound on starting the exporter
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    start_timeout: Duration,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version());
            ExitCode::SUCCESS
        }
        Some(Commands::Run(run)) => {
            let _guard = match setup_logging(&opt.log_format) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = ?e, "Failed to build runtime");
                    return ExitCode::from(1);
                }
            };

            match runtime.block_on(run_exporter(*run)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = ?e, "Failed to run exporter.");
                    ExitCode::from(1)
                }
            }
        }
        None => ExitCode::from(2),
    }
}

async fn run_exporter(args: RunArgs) -> Result<(), BoxError> {
    let driver = args.exporter.build_driver()?;
    let start_ctx = ExportContext::background().with_timeout(args.start_timeout);
    let exporter = Exporter::new(&start_ctx, driver).await?;

    let resource = Arc::new(Resource::new(vec![
        KeyValue::new("service.name", args.service_name.clone()),
        KeyValue::new("process.pid", std::process::id() as i64),
    ]));
    let checkpoint = InMemoryCheckpointSet::default();
    let started = SystemTime::now();

    let mut interval = tokio::time::interval(args.interval);
    let mut cycle: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = interval.tick() => {}
        }

        cycle += 1;
        let ctx = ExportContext::background().with_timeout(args.interval);

        let spans = synthetic_spans(&resource, cycle, args.spans_per_batch);
        if let Err(e) = exporter.export_spans(&ctx, &spans).await {
            warn!(error = %e, retryable = e.is_retryable(), cycle, "Dropping span batch");
        }

        checkpoint.replace(synthetic_records(&resource, cycle, started));
        if let Err(e) = exporter.export(&ctx, &checkpoint).await {
            warn!(error = %e, retryable = e.is_retryable(), cycle, "Dropping metric batch");
        }

        if args.cycles.is_some_and(|max| cycle >= max) {
            break;
        }
    }

    let ctx = ExportContext::background().with_timeout(SHUTDOWN_TIMEOUT);
    exporter.shutdown(&ctx).await?;
    Ok(())
}

fn synthetic_spans(resource: &Arc<Resource>, cycle: u64, count: usize) -> Vec<SpanSnapshot> {
    let mut trace_id = [0u8; 16];
    trace_id[8..].copy_from_slice(&cycle.to_be_bytes());
    let library = InstrumentationLibrary::new("otlp-export").with_version(get_version());
    let now = SystemTime::now();

    (0..count)
        .map(|i| {
            let mut span_id = [0u8; 8];
            span_id[..4].copy_from_slice(&(cycle as u32).to_be_bytes());
            span_id[4..].copy_from_slice(&(i as u32 + 1).to_be_bytes());
            SpanSnapshot {
                span_context: SpanContext::new(
                    TraceId::from_bytes(trace_id),
                    SpanId::from_bytes(span_id),
                    TraceFlags::SAMPLED,
                    false,
                    TraceState::default(),
                ),
                span_kind: SpanKind::Internal,
                name: format!("cycle-{}-span-{}", cycle, i),
                start_time: now - Duration::from_millis(10),
                end_time: now,
                attributes: vec![KeyValue::new("cycle", cycle as i64)],
                resource: Some(resource.clone()),
                instrumentation_library: library.clone(),
                ..Default::default()
            }
        })
        .collect()
}

fn synthetic_records(resource: &Arc<Resource>, cycle: u64, started: SystemTime) -> Vec<Record> {
    let now = SystemTime::now();
    let cycles = Arc::new(
        Descriptor::new("export.cycles", InstrumentKind::Counter, NumberKind::I64)
            .with_description("Export cycles run by this process")
            .with_instrumentation("otlp-export", Some(get_version())),
    );
    let uptime = Arc::new(
        Descriptor::new("process.uptime", InstrumentKind::ValueObserver, NumberKind::F64)
            .with_unit("s")
            .with_instrumentation("otlp-export", Some(get_version())),
    );
    let uptime_secs = now
        .duration_since(started)
        .unwrap_or_default()
        .as_secs_f64();

    vec![
        Record::new(
            cycles,
            AttributeSet::default(),
            resource.clone(),
            Aggregation::Sum(Number::I64(cycle as i64)),
            started,
            now,
        ),
        Record::new(
            uptime,
            AttributeSet::default(),
            resource.clone(),
            Aggregation::LastValue {
                value: Number::F64(uptime_secs),
                timestamp: now,
            },
            started,
            now,
        ),
    ]
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("h2=warn".parse()?)
        .add_directive("tower=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io;
        use std::io::IsTerminal;

        // Skip color codes when not in a terminal
        let use_ansi = io::stdout().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
