use thiserror::Error;

use crate::central::{CharacteristicKey, ConnectionState, PeripheralId, PermissionKind};
use crate::radio::{EventKind, ListenerId};

/// Errors returned by central commands.
#[derive(Debug, Error)]
pub enum CentralError {
    #[error("peripheral `{id}` is not known to the registry")]
    UnknownPeripheral { id: PeripheralId },
    #[error("a scan session is already in progress")]
    AlreadyScanning,
    #[error("notifications for {key} are already subscribed")]
    AlreadySubscribed { key: CharacteristicKey },
    #[error("peripheral `{id}` is not connected (state: {state})")]
    NotConnected {
        id: PeripheralId,
        state: ConnectionState,
    },
    #[error("{kind} permission was denied")]
    PermissionDenied { kind: PermissionKind },
    #[error("radio transport operation failed")]
    TransportFailure(#[from] TransportError),
    #[error("the central has been shut down")]
    Stopped,
}

/// Errors reported by radio backends.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("the radio session has not been started")]
    SessionNotStarted,
    #[error("peripheral `{id}` is unknown to the radio backend")]
    UnknownPeripheral { id: PeripheralId },
    #[error("characteristic {key} was not found on the peripheral")]
    UnknownCharacteristic { key: CharacteristicKey },
    #[error("invalid UUID `{value}`")]
    InvalidUuid { value: String, source: uuid::Error },
    #[error("the radio rejected `{operation}`")]
    Rejected { operation: String },
    #[error("failed to release {kind} listener {listener}")]
    ListenerRelease { kind: EventKind, listener: ListenerId },
    #[error("listener {listener} is not registered")]
    UnknownListener { listener: ListenerId },
}

/// Errors returned when parsing fake radio fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot have an empty peripheral id")]
    EmptyPeripheralId,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("notification payload is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
