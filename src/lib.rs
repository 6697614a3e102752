//! BLE central-role state management: a peripheral registry, a connection and
//! notification state machine, scan control, and a scoped radio listener
//! group, all driven by one task.

mod app;
mod central;
mod cli;
mod error;
mod radio;
mod telemetry;
mod terminal;
mod utils;

pub use app::{
    fake_radio, real_radio, run, run_with_clients, run_with_clients_and_log_level,
    run_with_log_level,
};
pub use central::{
    AlwaysGranted, Central, CentralConfig, CentralHandle, CentralView, CharacteristicId,
    CharacteristicKey, CommandOutcome, ConnectionState, CorrelationToken, DEFAULT_SCAN_TIMEOUT,
    FixedPermission, ListenerReleaseFailure, Notification, Observer, Peripheral, PeripheralFields,
    PeripheralId, PermissionGate, PermissionKind, PermissionStatus, Registry, ServiceId, Snapshot,
    SnapshotFilter, SubscriptionInfo, TeardownReport,
};
pub use cli::{Args, Command, FakeArgs, LogLevel, OutputFormat, ScanArgs, WatchArgs};
pub use error::{CentralError, FixtureError, TransportError};
pub use radio::{
    Advertisement, BtleplugRadio, EventKind, EventSink, FakeOperation, FakeRadio,
    FakeRadioConfig, ListenerId, NotificationPayloads, RadioEvent, RadioTransport, ScanFixture,
    ScanRequest, SessionConfig,
};
pub use terminal::TerminalClient;
