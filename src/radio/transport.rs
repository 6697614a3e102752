use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use strum_macros::{Display, EnumIter};
use tracing::trace;

use crate::central::{CharacteristicKey, PeripheralId};
use crate::error::TransportError;

/// Kinds of asynchronous events emitted by a radio backend.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumIter, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PeripheralDiscovered,
    PeripheralConnected,
    ConnectFailed,
    PeripheralDisconnected,
    ValueUpdated,
    ScanStopped,
}

/// One scan sighting of a peripheral.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Advertisement {
    pub id: PeripheralId,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Creates a sighting record.
    #[must_use]
    pub fn new(id: impl Into<PeripheralId>, local_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            id: id.into(),
            local_name,
            rssi,
        }
    }
}

/// Events delivered by a radio backend to registered listeners.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RadioEvent {
    PeripheralDiscovered(Advertisement),
    PeripheralConnected { id: PeripheralId },
    ConnectFailed { id: PeripheralId, reason: String },
    PeripheralDisconnected { id: PeripheralId },
    /// Tagged with the generation of the scan request that produced it.
    ScanStopped { generation: u64 },
    ValueUpdated {
        key: CharacteristicKey,
        value: Vec<u8>,
    },
}

impl RadioEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PeripheralDiscovered(_) => EventKind::PeripheralDiscovered,
            Self::PeripheralConnected { .. } => EventKind::PeripheralConnected,
            Self::ConnectFailed { .. } => EventKind::ConnectFailed,
            Self::PeripheralDisconnected { .. } => EventKind::PeripheralDisconnected,
            Self::ScanStopped { .. } => EventKind::ScanStopped,
            Self::ValueUpdated { .. } => EventKind::ValueUpdated,
        }
    }
}

/// Parameters for one scan session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScanRequest {
    /// Service UUID filters; empty means every advertiser.
    pub filters: Vec<String>,
    pub timeout: Duration,
    pub allow_duplicates: bool,
    pub generation: u64,
}

/// One-time session settings passed to `start_session`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct SessionConfig {
    pub show_alert: bool,
}

/// Handle identifying one registered event listener.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display, Serialize)]
#[display("#{_0}")]
pub struct ListenerId(u64);

/// Destination for radio events.
///
/// Delivery returns `false` once the receiving side has gone away.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(RadioEvent) -> bool + Send + Sync>,
}

impl EventSink {
    /// Wraps a delivery callback.
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(RadioEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Delivers one event, returning whether the receiver is still alive.
    pub fn deliver(&self, event: RadioEvent) -> bool {
        (self.deliver)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// The radio service consumed by the central.
///
/// Every primitive acknowledges *invocation* only; final outcomes arrive later
/// as [`RadioEvent`]s delivered to listeners.
#[async_trait]
pub trait RadioTransport: Send + Sync + fmt::Debug {
    /// Powers the radio on where the platform allows it.
    async fn enable_radio(&self) -> Result<(), TransportError>;

    /// Performs one-time backend activation.
    async fn start_session(&self, config: &SessionConfig) -> Result<(), TransportError>;

    /// Starts a bounded scan. The backend must emit `ScanStopped` with the
    /// request's generation when the session ends.
    async fn scan(&self, request: &ScanRequest) -> Result<(), TransportError>;

    /// Stops the running scan early.
    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(&self, id: &PeripheralId) -> Result<(), TransportError>;

    async fn disconnect(&self, id: &PeripheralId) -> Result<(), TransportError>;

    async fn start_notification(&self, key: &CharacteristicKey) -> Result<(), TransportError>;

    async fn stop_notification(&self, key: &CharacteristicKey) -> Result<(), TransportError>;

    /// Lists peripherals that are already bonded and connected at the OS level.
    async fn bonded_peripherals(&self) -> Result<Vec<Advertisement>, TransportError>;

    /// Registers a listener for one event kind.
    fn add_listener(&self, kind: EventKind, sink: EventSink) -> Result<ListenerId, TransportError>;

    /// Releases a listener previously returned by `add_listener`.
    fn remove_listener(&self, listener: ListenerId) -> Result<(), TransportError>;
}

#[derive(Debug)]
struct ListenerEntry {
    id: ListenerId,
    kind: EventKind,
    sink: EventSink,
}

#[derive(Debug, Default)]
struct ListenerSlots {
    next_id: u64,
    entries: Vec<ListenerEntry>,
}

/// Listener bookkeeping shared by radio backends and their background tasks.
#[derive(Debug, Clone, Default)]
pub(crate) struct ListenerTable {
    slots: Arc<Mutex<ListenerSlots>>,
}

impl ListenerTable {
    pub(crate) fn add(&self, kind: EventKind, sink: EventSink) -> ListenerId {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.next_id += 1;
        let id = ListenerId(slots.next_id);
        slots.entries.push(ListenerEntry { id, kind, sink });
        id
    }

    pub(crate) fn kind_of(&self, listener: ListenerId) -> Option<EventKind> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entries
            .iter()
            .find(|entry| entry.id == listener)
            .map(|entry| entry.kind)
    }

    pub(crate) fn remove(&self, listener: ListenerId) -> Result<(), TransportError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(position) = slots.entries.iter().position(|entry| entry.id == listener) else {
            return Err(TransportError::UnknownListener { listener });
        };
        slots.entries.remove(position);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Delivers an event to every listener registered for its kind.
    pub(crate) fn emit(&self, event: RadioEvent) {
        let kind = event.kind();
        let sinks: Vec<EventSink> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots
                .entries
                .iter()
                .filter(|entry| entry.kind == kind)
                .map(|entry| entry.sink.clone())
                .collect()
        };

        if sinks.is_empty() {
            trace!(%kind, "no listener registered for radio event");
            return;
        }
        for sink in sinks {
            if !sink.deliver(event.clone()) {
                trace!(%kind, "listener receiver has gone away");
            }
        }
    }
}
