mod painter;
mod peripheral_view;
mod progress;
mod table;
mod watch_view;

use std::io;

use serde::Serialize;

pub(crate) use self::painter::Painter;
pub(crate) use self::peripheral_view::PeripheralTable;
pub(crate) use self::progress::ScanProgress;
pub(crate) use self::watch_view::{NotificationView, WatchReadyView, WatchSummaryView};

/// Writes one pretty-printed JSON document followed by a newline.
pub(crate) fn write_json_line(out: &mut impl io::Write, value: &impl Serialize) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
