use std::io::{self, IsTerminal};
use std::sync::OnceLock;
use std::time::Duration;

use indicatif::ProgressStyle;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use tracing::level_filters::LevelFilter;
use tracing::{Level, Metadata};
use tracing_indicatif::{IndicatifLayer, TickSettings};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, filter, fmt};

use crate::error::TelemetryError;

/// Backend crates that log every adapter event at debug level.
const QUIET_BACKENDS: &str = "btleplug=warn,bluez_async=warn";

/// Spans from these modules drive the terminal spinner.
const PROGRESS_TARGET: &str = "blerelay::cli::";

static TRACING_INITIALISED: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// Installs the tracing subscriber stack once per process.
///
/// An explicit `log_level` wins over `RUST_LOG`. Later calls return the outcome of
/// the first one.
pub(crate) fn initialise_tracing(
    service_name: &str,
    interactive_terminal: bool,
    log_level: Option<LevelFilter>,
) -> Result<(), &'static TelemetryError> {
    TRACING_INITIALISED
        .get_or_init(|| {
            let tracer = install_tracer_provider(service_name);
            let env_filter = log_filter(log_level);
            if interactive_terminal && io::stderr().is_terminal() {
                install_interactive(tracer, env_filter)
            } else {
                install_json(tracer, env_filter)
            }
        })
        .as_ref()
        .copied()
}

fn install_tracer_provider(service_name: &str) -> SdkTracer {
    let provider = SdkTracerProvider::builder().build();
    let tracer = provider.tracer(service_name.to_owned());
    global::set_tracer_provider(provider);
    tracer
}

/// Pretty events on stderr, routed through the progress layer so spinners
/// are not torn by log lines.
fn install_interactive(tracer: SdkTracer, env_filter: EnvFilter) -> Result<(), TelemetryError> {
    let progress = IndicatifLayer::new()
        .with_progress_style(spinner_style())
        .with_tick_settings(TickSettings {
            default_tick_interval: Some(Duration::from_millis(90)),
            ..TickSettings::default()
        });
    let events = fmt::layer()
        .pretty()
        .with_target(false)
        .with_writer(progress.get_stderr_writer())
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(events)
        .with(progress.with_filter(filter::filter_fn(is_progress_span)))
        .with(OpenTelemetryLayer::new(tracer))
        .try_init()?;
    Ok(())
}

fn install_json(tracer: SdkTracer, env_filter: EnvFilter) -> Result<(), TelemetryError> {
    let events = fmt::layer()
        .json()
        .with_target(false)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(events)
        .with(OpenTelemetryLayer::new(tracer))
        .try_init()?;
    Ok(())
}

fn log_filter(log_level: Option<LevelFilter>) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::new(format!("{level},{QUIET_BACKENDS}")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan.bold} {msg}")
        .unwrap_or_else(|_error| ProgressStyle::default_spinner())
}

fn is_progress_span(metadata: &Metadata<'_>) -> bool {
    metadata.is_span()
        && metadata.target().starts_with(PROGRESS_TARGET)
        && *metadata.level() <= Level::INFO
}
