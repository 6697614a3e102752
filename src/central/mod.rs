//! Central-role BLE state: the peripheral registry, connection and scan
//! bookkeeping, and notification subscriptions, all owned by one task.

mod config;
mod connection;
mod dispatcher;
pub(crate) mod peripheral;
mod permission;
mod registry;
mod scan;
mod subscription;
mod task;

pub(crate) use self::config::platform_scan_permission;
pub use self::config::{CentralConfig, DEFAULT_SCAN_TIMEOUT};
pub use self::connection::CommandOutcome;
pub use self::task::{Central, CentralHandle, CentralView};
pub use self::dispatcher::{ListenerReleaseFailure, TeardownReport};
pub use self::peripheral::{ConnectionState, Peripheral, PeripheralFields, PeripheralId};
pub use self::permission::{AlwaysGranted, FixedPermission, PermissionGate, PermissionKind, PermissionStatus};
pub use self::registry::{Registry, Snapshot, SnapshotFilter};
pub use self::subscription::{
    CharacteristicId, CharacteristicKey, CorrelationToken, Notification, Observer, ServiceId,
    SubscriptionInfo,
};
