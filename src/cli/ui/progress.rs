use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::central::{CentralHandle, SnapshotFilter};
use crate::error::CentralError;

/// Spinner that follows a running scan and reports how many peripherals it found.
#[derive(Debug)]
pub(crate) struct ScanProgress {
    enabled: bool,
}

impl ScanProgress {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Waits for the current scan to end, rendering progress when enabled.
    pub(crate) async fn track(&self, central: &CentralHandle) -> Result<(), CentralError> {
        if !self.enabled {
            return central.wait_for_scan_end().await;
        }

        let spinner = new_spinner();
        let mut changes = central.changes();
        let result = loop {
            let scanning = {
                let view = changes.borrow_and_update();
                if !view.is_running() {
                    break Err(CentralError::Stopped);
                }
                let found = view.snapshot(SnapshotFilter::All).len();
                spinner.set_message(format!("Scanning: {found} peripheral(s) found"));
                view.is_scanning()
            };
            if !scanning {
                break Ok(());
            }
            if changes.changed().await.is_err() {
                break Err(CentralError::Stopped);
            }
        };
        spinner.finish_and_clear();
        result
    }
}

fn new_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(spinner_style());
    spinner.enable_steady_tick(Duration::from_millis(90));
    spinner
}

fn spinner_style() -> ProgressStyle {
    let base_style = ProgressStyle::default_spinner();
    let templated =
        ProgressStyle::with_template("{spinner:.cyan.bold} {msg}").unwrap_or(base_style);
    templated.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}
