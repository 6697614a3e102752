use std::time::Duration;

use bon::Builder;

use super::permission::PermissionKind;

/// Scan timeout used when a caller does not pass one.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings applied when activating a central.
#[derive(Debug, Clone, Builder)]
pub struct CentralConfig {
    #[builder(default = DEFAULT_SCAN_TIMEOUT)]
    scan_timeout: Duration,
    /// Service UUID filters; empty reports every advertiser.
    #[builder(default)]
    scan_filters: Vec<String>,
    #[builder(default = true)]
    allow_duplicates: bool,
    #[builder(default)]
    show_alert: bool,
    /// Permission that gates scanning on platforms that require one.
    scan_permission: Option<PermissionKind>,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self::builder()
            .maybe_scan_permission(platform_scan_permission())
            .build()
    }
}

impl CentralConfig {
    #[must_use]
    pub fn scan_timeout(&self) -> Duration {
        self.scan_timeout
    }

    #[must_use]
    pub fn scan_filters(&self) -> &[String] {
        &self.scan_filters
    }

    #[must_use]
    pub fn allow_duplicates(&self) -> bool {
        self.allow_duplicates
    }

    #[must_use]
    pub fn show_alert(&self) -> bool {
        self.show_alert
    }

    #[must_use]
    pub fn scan_permission(&self) -> Option<PermissionKind> {
        self.scan_permission
    }
}

/// Permission that gates scanning on the build target.
pub(crate) fn platform_scan_permission() -> Option<PermissionKind> {
    if cfg!(target_os = "android") {
        Some(PermissionKind::FineLocation)
    } else {
        None
    }
}
