use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use clap::Args;
use serde::Serialize;
use serde_with::SerializeDisplay;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::central::{
    AlwaysGranted, Central, CentralConfig, CentralHandle, CharacteristicKey, ConnectionState,
    CorrelationToken, Notification, Observer, Peripheral, PeripheralId, platform_scan_permission,
};
use crate::cli::OutputFormat;
use crate::cli::command::parse_duration;
use crate::error::CentralError;
use crate::radio::RadioTransport;
use crate::terminal::TerminalClient;

use super::ui::{NotificationView, Painter, WatchReadyView, WatchSummaryView, write_json_line};

const WATCH_TOKEN: u64 = 1;

/// Arguments for the `watch` command.
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Peripheral id as reported by `scan`.
    id: String,
    /// Service UUID that owns the characteristic.
    #[arg(long)]
    service: String,
    /// Characteristic UUID to subscribe to.
    #[arg(long)]
    characteristic: String,
    /// Stop after this many notifications. If omitted, watch until Ctrl+C.
    #[arg(long)]
    max_notifications: Option<usize>,
    /// How long to wait for the connection to settle.
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    connect_timeout: Duration,
}

impl WatchArgs {
    /// Creates watch arguments for one characteristic.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        characteristic: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            characteristic: characteristic.into(),
            max_notifications: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_max_notifications(mut self, max_notifications: usize) -> Self {
        self.max_notifications = Some(max_notifications);
        self
    }

    fn key(&self) -> CharacteristicKey {
        CharacteristicKey::new(
            self.id.as_str(),
            self.service.as_str(),
            self.characteristic.as_str(),
        )
    }
}

/// Why a watch session ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, SerializeDisplay)]
pub(crate) enum WatchStopReason {
    #[display("reached notification limit ({_0})")]
    ReachedLimit(usize),
    #[display("interrupted")]
    Interrupted,
    #[display("peripheral disconnected")]
    PeripheralDisconnected,
}

#[derive(Debug, Serialize)]
pub(crate) struct WatchSummary {
    pub(crate) key: CharacteristicKey,
    pub(crate) received: usize,
    pub(crate) stop_reason: WatchStopReason,
}

/// Executes the `watch` command.
#[instrument(
    skip(radio, args, out, terminal_client),
    level = "info",
    fields(id = %args.id, ?output_format)
)]
pub(crate) async fn run<W>(
    radio: Arc<dyn RadioTransport>,
    args: &WatchArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let config = CentralConfig::builder()
        .maybe_scan_permission(platform_scan_permission())
        .build();
    let central = Central::activate(radio, Arc::new(AlwaysGranted), config).await?;
    let painter = Painter::new(terminal_client.stdout_is_terminal());

    let command_result = watch_with_central(&central, args, out, &painter, output_format).await;
    let teardown = central.shutdown().await;
    if !teardown.is_clean() {
        warn!(failures = ?teardown.failures(), "listener teardown was incomplete");
    }

    command_result
}

async fn watch_with_central<W>(
    central: &CentralHandle,
    args: &WatchArgs,
    out: &mut W,
    painter: &Painter,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let key = args.key();
    let id = key.peripheral.clone();
    locate(central, &id).await?;
    let peripheral = connect(central, &id, args.connect_timeout).await?;

    let (sender, mut notifications) = mpsc::unbounded_channel();
    central
        .subscribe(
            key.clone(),
            CorrelationToken::from(WATCH_TOKEN),
            Observer::channel(sender),
        )
        .await
        .with_context(|| format!("failed to subscribe to {key}"))?;
    if output_format == OutputFormat::Pretty {
        writeln!(out, "{}", WatchReadyView::new(&peripheral, &key, painter))?;
    }

    let mut changes = central.changes();
    let mut received = 0usize;
    let stop_reason = loop {
        if let Some(limit) = args.max_notifications
            && received >= limit
        {
            break WatchStopReason::ReachedLimit(limit);
        }

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                break WatchStopReason::Interrupted;
            }
            notification = notifications.recv() => match notification {
                Some(notification) => {
                    received += 1;
                    write_notification(out, received, &notification, painter, output_format)?;
                }
                None => break WatchStopReason::PeripheralDisconnected,
            },
            changed = changes.changed() => {
                let still_connected = changed.is_ok()
                    && changes
                        .borrow_and_update()
                        .peripheral(&id)
                        .is_some_and(Peripheral::is_connected);
                if !still_connected {
                    break WatchStopReason::PeripheralDisconnected;
                }
            }
        }
    };
    info!(received, %stop_reason, "watch finished");

    if central.unsubscribe(key.clone()).await? {
        debug!(%key, "subscription removed");
    }
    if stop_reason != WatchStopReason::PeripheralDisconnected {
        let outcome = central.disconnect(id).await?;
        debug!(?outcome, "disconnect requested");
    }

    let summary = WatchSummary {
        key,
        received,
        stop_reason,
    };
    match output_format {
        OutputFormat::Pretty => {
            writeln!(out)?;
            writeln!(out, "{}", WatchSummaryView::new(&summary, painter))?;
        }
        OutputFormat::Json => write_json_line(out, &summary)?,
    }
    Ok(())
}

/// Scans for the peripheral unless the registry already knows it.
#[instrument(skip(central), level = "debug", fields(%id))]
async fn locate(central: &CentralHandle, id: &PeripheralId) -> Result<()> {
    if central.get(id).is_some() {
        return Ok(());
    }

    central.start_scan(None).await?;
    let found = {
        let mut changes = central.changes();
        let view = changes
            .wait_for(|view| {
                !view.is_running() || !view.is_scanning() || view.peripheral(id).is_some()
            })
            .await
            .map_err(|_closed| CentralError::Stopped)?;
        view.peripheral(id).is_some()
    };
    if central.is_scanning() {
        central.stop_scan().await?;
    }

    ensure!(found, "peripheral `{id}` was not found during the scan");
    Ok(())
}

#[instrument(skip(central), level = "debug", fields(%id))]
async fn connect(
    central: &CentralHandle,
    id: &PeripheralId,
    connect_timeout: Duration,
) -> Result<Peripheral> {
    let outcome = central.connect(id.clone()).await?;
    debug!(?outcome, "connect requested");

    let settled = central.wait_for_state(id, |state| {
        matches!(state, ConnectionState::Connected | ConnectionState::Failed)
    });
    let state = timeout(connect_timeout, settled)
        .await
        .map_err(|_elapsed| anyhow!("timed out connecting to `{id}`"))??;
    ensure!(state.is_connected(), "failed to connect to `{id}`");

    central
        .get(id)
        .ok_or_else(|| anyhow!("peripheral `{id}` disappeared after connecting"))
}

fn write_notification<W>(
    out: &mut W,
    index: usize,
    notification: &Notification,
    painter: &Painter,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    match output_format {
        OutputFormat::Pretty => {
            writeln!(out, "{}", NotificationView::new(index, notification, painter))?;
        }
        OutputFormat::Json => write_json_line(out, notification)?,
    }
    Ok(())
}
