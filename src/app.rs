use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::instrument;

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::radio::{BtleplugRadio, FakeRadio, RadioTransport};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Creates a radio backed by the system BLE adapter.
#[must_use]
pub fn real_radio() -> Arc<dyn RadioTransport> {
    Arc::new(BtleplugRadio::new())
}

/// Creates a radio backed by fake fixtures.
#[must_use]
pub fn fake_radio(fake_args: FakeArgs) -> Arc<dyn RadioTransport> {
    tracing::info!("using fake radio");
    Arc::new(FakeRadio::new(fake_args.into_radio_config()))
}

/// Runs the CLI command against the given radio.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = blerelay::Args::try_parse_from([
///     "blerelay",
///     "--fake",
///     "--fake-scan",
///     "AA:BB|HR Strap|-43",
///     "scan",
///     "--timeout",
///     "10ms",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let radio = match maybe_fake_args {
///     Some(fake_args) => blerelay::fake_radio(fake_args),
///     None => blerelay::real_radio(),
/// };
/// let mut out = Vec::new();
/// blerelay::run(command, &mut out, radio).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run<W>(command: Command, out: &mut W, radio: Arc<dyn RadioTransport>) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, radio, None, OutputFormat::Pretty).await
}

/// Runs the CLI command with an explicit log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    radio: Arc<dyn RadioTransport>,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(
        command,
        out,
        &SystemTerminalClient,
        radio,
        log_level,
        output_format,
    )
    .await
}

/// Runs the CLI command with an injected terminal client.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    radio: Arc<dyn RadioTransport>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, out, terminal_client, radio, None, output_format)
        .await
}

/// Runs the CLI command with injected clients and a log-level override.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
///
/// impl blerelay::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool {
///         false
///     }
///
///     fn stderr_is_terminal(&self) -> bool {
///         false
///     }
/// }
///
/// let args = blerelay::Args::try_parse_from([
///     "blerelay",
///     "--fake",
///     "--fake-scan",
///     "AA:BB|HR Strap|-43",
///     "scan",
///     "--timeout",
///     "10ms",
/// ])?;
/// let log_level = args.log_level();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let radio = match maybe_fake_args {
///     Some(fake_args) => blerelay::fake_radio(fake_args),
///     None => blerelay::real_radio(),
/// };
/// let mut out = Vec::new();
/// blerelay::run_with_clients_and_log_level(
///     command,
///     &mut out,
///     &FakeTerminal,
///     radio,
///     log_level,
///     blerelay::OutputFormat::Json,
/// ).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
#[instrument(
    skip(out, terminal_client, radio),
    level = "info",
    fields(command = %command.name(), ?log_level)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    radio: Arc<dyn RadioTransport>,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "blerelay",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    match command {
        Command::Scan(args) => {
            crate::cli::scan::run(radio, &args, out, terminal_client, output_format).await
        }
        Command::Watch(args) => {
            crate::cli::watch::run(radio, &args, out, terminal_client, output_format).await
        }
    }
}
