use std::fmt::{self, Display, Formatter};

use crate::central::{CharacteristicKey, Notification, Peripheral};
use crate::cli::watch::{WatchStopReason, WatchSummary};
use crate::utils::format_hex;

use super::painter::Painter;
use super::peripheral_view::PeripheralView;
use super::table::Table;

/// Renders the connected peripheral and the watched characteristic.
pub(crate) struct WatchReadyView<'a> {
    peripheral: &'a Peripheral,
    key: &'a CharacteristicKey,
    painter: &'a Painter,
}

impl<'a> WatchReadyView<'a> {
    pub(crate) fn new(
        peripheral: &'a Peripheral,
        key: &'a CharacteristicKey,
        painter: &'a Painter,
    ) -> Self {
        Self {
            peripheral,
            key,
            painter,
        }
    }
}

impl Display for WatchReadyView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let subscription = Table::key_value(
            self.painter,
            vec![
                ("service", self.painter.value(self.key.service.as_str())),
                (
                    "characteristic",
                    self.painter.value(self.key.characteristic.as_str()),
                ),
            ],
        );

        write!(f, "{}", self.painter.heading("Connected peripheral:"))?;
        write!(f, "\n{}", PeripheralView::new(self.peripheral, self.painter))?;
        writeln!(f)?;
        write!(f, "\n{}", self.painter.heading("Watching:"))?;
        write!(f, "\n{subscription}")
    }
}

/// Renders a single notification line.
pub(crate) struct NotificationView<'a> {
    index: usize,
    notification: &'a Notification,
    painter: &'a Painter,
}

impl<'a> NotificationView<'a> {
    pub(crate) fn new(index: usize, notification: &'a Notification, painter: &'a Painter) -> Self {
        Self {
            index,
            notification,
            painter,
        }
    }
}

impl Display for NotificationView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let index_label = self.painter.muted(format!("[{:04}]", self.index));
        write!(
            f,
            "{index_label} {} {}",
            self.painter.value(format_hex(&self.notification.value)),
            self.painter
                .muted(format!("token={}", self.notification.token))
        )
    }
}

/// Renders the end-of-watch summary.
pub(crate) struct WatchSummaryView<'a> {
    summary: &'a WatchSummary,
    painter: &'a Painter,
}

impl<'a> WatchSummaryView<'a> {
    pub(crate) fn new(summary: &'a WatchSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for WatchSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let stop_reason = match self.summary.stop_reason {
            WatchStopReason::ReachedLimit(_) => {
                self.painter.success(self.summary.stop_reason.to_string())
            }
            WatchStopReason::Interrupted | WatchStopReason::PeripheralDisconnected => {
                self.painter.warning(self.summary.stop_reason.to_string())
            }
        };
        write!(
            f,
            "{} {} notification(s) from {}; {}",
            self.painter.heading("Watch finished:"),
            self.painter.value(self.summary.received.to_string()),
            self.painter.value(self.summary.key.to_string()),
            stop_reason
        )
    }
}
