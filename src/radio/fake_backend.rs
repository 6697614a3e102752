use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use strum_macros::{Display, EnumIter};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::transport::{
    Advertisement, EventKind, EventSink, ListenerId, ListenerTable, RadioEvent, RadioTransport,
    ScanRequest, SessionConfig,
};
use crate::central::{CharacteristicKey, PeripheralId};
use crate::error::{FixtureError, TransportError};

const DEFAULT_NOTIFICATIONS: [[u8; 2]; 3] = [[0x06, 0x48], [0x06, 0x4a], [0x06, 0x4c]];

/// Parsed fake discovery fixture records.
///
/// Records are `id|name|rssi` separated by `;`, with `-` for a missing name or
/// RSSI.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct ScanFixture {
    advertisements: Vec<Advertisement>,
}

impl ScanFixture {
    #[must_use]
    pub fn new(advertisements: Vec<Advertisement>) -> Self {
        Self { advertisements }
    }
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let advertisements = parse_scan_fixture(value)?;
        Ok(Self { advertisements })
    }
}

/// Parsed fake notification payloads, comma-separated hex.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl NotificationPayloads {
    #[must_use]
    pub fn new(payloads: Vec<Vec<u8>>) -> Self {
        Self { payloads }
    }
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payloads = parse_notifications(value)?;
        Ok(Self { payloads })
    }
}

/// Radio primitives tracked by the fake backend.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum FakeOperation {
    EnableRadio,
    StartSession,
    Scan,
    StopScan,
    Connect,
    Disconnect,
    StartNotification,
    StopNotification,
    BondedPeripherals,
    AddListener,
    RemoveListener,
}

/// Settings for constructing a fake radio.
#[derive(Debug, Builder)]
pub struct FakeRadioConfig {
    scan_fixture: Option<ScanFixture>,
    bonded: Option<ScanFixture>,
    notifications: Option<NotificationPayloads>,
    /// Acknowledge connect and disconnect requests with link events.
    #[builder(default = true)]
    auto_ack: bool,
    #[builder(default)]
    discovery_delay: Duration,
}

#[derive(Debug, Default)]
struct FakeState {
    session_started: bool,
    calls: HashMap<FakeOperation, usize>,
    fail_next: HashSet<FakeOperation>,
    fail_listeners: HashSet<EventKind>,
    fail_releases: HashSet<EventKind>,
    refused: HashSet<PeripheralId>,
    scan: Option<(u64, CancellationToken)>,
    notifying: Vec<CharacteristicKey>,
}

/// In-memory radio used in tests and non-hardware environments.
///
/// Primitives emit their follow-up events through registered listeners, the
/// same way a platform radio would.
#[derive(Debug)]
pub struct FakeRadio {
    advertisements: Vec<Advertisement>,
    bonded: Vec<Advertisement>,
    notifications: Vec<Vec<u8>>,
    auto_ack: bool,
    discovery_delay: Duration,
    listeners: ListenerTable,
    state: Mutex<FakeState>,
}

impl FakeRadio {
    #[must_use]
    pub fn new(config: FakeRadioConfig) -> Self {
        let notifications = config.notifications.map_or_else(
            || DEFAULT_NOTIFICATIONS.map(Vec::from).to_vec(),
            Into::into,
        );

        Self {
            advertisements: config.scan_fixture.map(Into::into).unwrap_or_default(),
            bonded: config.bonded.map(Into::into).unwrap_or_default(),
            notifications,
            auto_ack: config.auto_ack,
            discovery_delay: config.discovery_delay,
            listeners: ListenerTable::default(),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts the call and consumes a pending injected failure.
    fn record(&self, operation: FakeOperation) -> Result<(), TransportError> {
        let mut state = self.state();
        *state.calls.entry(operation).or_default() += 1;
        if state.fail_next.remove(&operation) {
            return Err(TransportError::Rejected {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Number of times a primitive has been invoked.
    #[must_use]
    pub fn calls(&self, operation: FakeOperation) -> usize {
        self.state().calls.get(&operation).copied().unwrap_or_default()
    }

    /// Makes the next call of `operation` fail synchronously.
    pub fn fail_next(&self, operation: FakeOperation) {
        self.state().fail_next.insert(operation);
    }

    /// Makes listener registration for `kind` fail.
    pub fn fail_listener(&self, kind: EventKind) {
        self.state().fail_listeners.insert(kind);
    }

    /// Makes releasing listeners of `kind` fail; they stay registered.
    pub fn fail_release(&self, kind: EventKind) {
        self.state().fail_releases.insert(kind);
    }

    /// Answers future connect requests for `id` with `ConnectFailed`.
    pub fn refuse_connection(&self, id: impl Into<PeripheralId>) {
        self.state().refused.insert(id.into());
    }

    /// Injects an event as if the platform had produced it.
    pub fn emit(&self, event: RadioEvent) {
        self.listeners.emit(event);
    }

    #[must_use]
    pub fn active_listeners(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_notifying(&self, key: &CharacteristicKey) -> bool {
        self.state().notifying.contains(key)
    }

    fn ensure_session(&self) -> Result<(), TransportError> {
        if self.state().session_started {
            Ok(())
        } else {
            Err(TransportError::SessionNotStarted)
        }
    }
}

#[async_trait]
impl RadioTransport for FakeRadio {
    async fn enable_radio(&self) -> Result<(), TransportError> {
        self.record(FakeOperation::EnableRadio)
    }

    async fn start_session(&self, config: &SessionConfig) -> Result<(), TransportError> {
        self.record(FakeOperation::StartSession)?;
        debug!(show_alert = config.show_alert, "fake radio session started");
        self.state().session_started = true;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn scan(&self, request: &ScanRequest) -> Result<(), TransportError> {
        self.record(FakeOperation::Scan)?;
        self.ensure_session()?;

        let cancel = CancellationToken::new();
        let previous = self
            .state()
            .scan
            .replace((request.generation, cancel.clone()));
        if let Some((_generation, previous)) = previous {
            previous.cancel();
        }

        let advertisements = self.advertisements.clone();
        if self.discovery_delay.is_zero() {
            for advertisement in advertisements {
                self.listeners
                    .emit(RadioEvent::PeripheralDiscovered(advertisement));
            }
        } else {
            let listeners = self.listeners.clone();
            let delay = self.discovery_delay;
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = sleep(delay) => {
                        for advertisement in advertisements {
                            listeners.emit(RadioEvent::PeripheralDiscovered(advertisement));
                        }
                    }
                }
            });
        }

        let listeners = self.listeners.clone();
        let timeout = request.timeout;
        let generation = request.generation;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = sleep(timeout) => listeners.emit(RadioEvent::ScanStopped { generation }),
            }
        });
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.record(FakeOperation::StopScan)?;
        let running = self.state().scan.take();
        if let Some((generation, cancel)) = running {
            cancel.cancel();
            self.listeners.emit(RadioEvent::ScanStopped { generation });
        }
        Ok(())
    }

    async fn connect(&self, id: &PeripheralId) -> Result<(), TransportError> {
        self.record(FakeOperation::Connect)?;
        self.ensure_session()?;

        let refused = self.state().refused.contains(id);
        if refused {
            self.listeners.emit(RadioEvent::ConnectFailed {
                id: id.clone(),
                reason: "peripheral refused the connection".to_string(),
            });
        } else if self.auto_ack {
            self.listeners
                .emit(RadioEvent::PeripheralConnected { id: id.clone() });
        }
        Ok(())
    }

    async fn disconnect(&self, id: &PeripheralId) -> Result<(), TransportError> {
        self.record(FakeOperation::Disconnect)?;
        self.state()
            .notifying
            .retain(|key| &key.peripheral != id);
        if self.auto_ack {
            self.listeners
                .emit(RadioEvent::PeripheralDisconnected { id: id.clone() });
        }
        Ok(())
    }

    async fn start_notification(&self, key: &CharacteristicKey) -> Result<(), TransportError> {
        self.record(FakeOperation::StartNotification)?;
        self.state().notifying.push(key.clone());
        for value in &self.notifications {
            self.listeners.emit(RadioEvent::ValueUpdated {
                key: key.clone(),
                value: value.clone(),
            });
        }
        Ok(())
    }

    async fn stop_notification(&self, key: &CharacteristicKey) -> Result<(), TransportError> {
        self.record(FakeOperation::StopNotification)?;
        let mut state = self.state();
        let before = state.notifying.len();
        state.notifying.retain(|active| active != key);
        if state.notifying.len() == before {
            return Err(TransportError::UnknownCharacteristic { key: key.clone() });
        }
        Ok(())
    }

    async fn bonded_peripherals(&self) -> Result<Vec<Advertisement>, TransportError> {
        self.record(FakeOperation::BondedPeripherals)?;
        Ok(self.bonded.clone())
    }

    fn add_listener(&self, kind: EventKind, sink: EventSink) -> Result<ListenerId, TransportError> {
        self.record(FakeOperation::AddListener)?;
        if self.state().fail_listeners.contains(&kind) {
            return Err(TransportError::Rejected {
                operation: format!("add {kind} listener"),
            });
        }
        Ok(self.listeners.add(kind, sink))
    }

    fn remove_listener(&self, listener: ListenerId) -> Result<(), TransportError> {
        self.record(FakeOperation::RemoveListener)?;
        let kind = self
            .listeners
            .kind_of(listener)
            .ok_or(TransportError::UnknownListener { listener })?;
        if self.state().fail_releases.contains(&kind) {
            return Err(TransportError::ListenerRelease { kind, listener });
        }
        self.listeners.remove(listener)
    }
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<Advertisement>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .filter(|record| !record.trim().is_empty())
        .map(parse_scan_record)
        .collect()
}

fn parse_scan_record(raw_record: &str) -> Result<Advertisement, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [id, name, rssi] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if id.is_empty() {
        return Err(FixtureError::EmptyPeripheralId);
    }

    let local_name = match *name {
        "-" | "" => None,
        name => Some(name.to_string()),
    };
    let rssi = match *rssi {
        "-" | "" => None,
        rssi => Some(rssi.parse::<i16>()?),
    };

    Ok(Advertisement::new(*id, local_name, rssi))
}

fn parse_notifications(raw_value: &str) -> Result<Vec<Vec<u8>>, FixtureError> {
    if raw_value.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw_value.split(',').map(parse_hex).collect()
}

fn parse_hex(raw_value: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(hex::decode(cleaned)?)
}
