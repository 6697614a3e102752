use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::{instrument, warn};

use crate::central::{
    AlwaysGranted, Central, CentralConfig, CentralHandle, Peripheral, SnapshotFilter,
    platform_scan_permission,
};
use crate::cli::OutputFormat;
use crate::cli::command::parse_duration;
use crate::error::CentralError;
use crate::radio::RadioTransport;
use crate::terminal::TerminalClient;

use super::ui::{Painter, PeripheralTable, ScanProgress, write_json_line};

/// Arguments for the `scan` command.
#[derive(Debug, Default, Args)]
pub struct ScanArgs {
    /// Scan duration (e.g. `3s`); defaults to five seconds.
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,
    /// Only report advertisers of this service UUID. Repeatable.
    #[arg(long = "service")]
    services: Vec<String>,
}

impl ScanArgs {
    /// Creates scan arguments with an explicit duration.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            services: Vec::new(),
        }
    }

    /// Restricts the scan to advertisers of one more service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services.push(service.into());
        self
    }

    pub(crate) fn central_config(&self) -> CentralConfig {
        CentralConfig::builder()
            .maybe_scan_timeout(self.timeout)
            .scan_filters(self.services.clone())
            .maybe_scan_permission(platform_scan_permission())
            .build()
    }
}

#[derive(Debug, Serialize)]
struct ScanResult {
    generation: u64,
    paired: Vec<Peripheral>,
    available: Vec<Peripheral>,
}

/// Executes the `scan` command.
#[instrument(skip(radio, args, out, terminal_client), level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    radio: Arc<dyn RadioTransport>,
    args: &ScanArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let central = Central::activate(radio, Arc::new(AlwaysGranted), args.central_config()).await?;
    let progress = ScanProgress::new(terminal_client.stderr_is_terminal());

    let scan_result = scan_once(&central, &progress).await;
    let result = ScanResult {
        generation: scan_result.as_ref().copied().unwrap_or_default(),
        paired: central.snapshot(SnapshotFilter::Connected).to_vec(),
        available: central.snapshot(SnapshotFilter::NotConnected).to_vec(),
    };
    let teardown = central.shutdown().await;
    if !teardown.is_clean() {
        warn!(failures = ?teardown.failures(), "listener teardown was incomplete");
    }
    scan_result?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", painter.heading("Paired peripherals:"))?;
            writeln!(out, "{}", PeripheralTable::new(&result.paired, &painter))?;
            writeln!(out)?;
            writeln!(out, "{}", painter.heading("Available peripherals:"))?;
            writeln!(out, "{}", PeripheralTable::new(&result.available, &painter))?;
        }
        OutputFormat::Json => write_json_line(out, &result)?,
    }
    Ok(())
}

async fn scan_once(central: &CentralHandle, progress: &ScanProgress) -> Result<u64, CentralError> {
    let generation = central.start_scan(None).await?;
    progress.track(central).await?;
    Ok(generation)
}
