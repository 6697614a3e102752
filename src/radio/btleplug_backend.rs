use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification,
};
use btleplug::platform::{self, Adapter, Manager, Peripheral};
use tokio::sync::OnceCell;
use tokio::time::sleep;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::transport::{
    Advertisement, EventKind, EventSink, ListenerId, ListenerTable, RadioEvent, RadioTransport,
    ScanRequest, SessionConfig,
};
use crate::central::{CharacteristicKey, PeripheralId};
use crate::error::TransportError;

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;
type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

#[derive(Debug)]
struct RadioSession {
    _manager: Manager,
    adapter: Adapter,
}

/// Subscribed keys by the characteristic UUID the platform reports.
type Routes = Arc<Mutex<HashMap<Uuid, CharacteristicKey>>>;

/// Routes notifications of one peripheral back to characteristic keys.
///
/// A cancelled token marks a forwarder whose task has exited.
#[derive(Debug)]
struct Forwarder {
    cancel: CancellationToken,
    routes: Routes,
}

type Forwarders = Arc<Mutex<HashMap<PeripheralId, Forwarder>>>;

/// Peripherals seen by the adapter, keyed by their platform id string.
type KnownPeripherals = Arc<Mutex<HashMap<PeripheralId, Peripheral>>>;

/// Radio transport backed by `btleplug` on the first system adapter.
#[derive(Debug)]
pub struct BtleplugRadio {
    session: OnceCell<RadioSession>,
    listeners: ListenerTable,
    known: KnownPeripherals,
    report_updates: Arc<AtomicBool>,
    scan: Mutex<Option<(u64, CancellationToken)>>,
    forwarders: Forwarders,
    pump_started: AtomicBool,
    shutdown: CancellationToken,
}

impl Default for BtleplugRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl BtleplugRadio {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: OnceCell::new(),
            listeners: ListenerTable::default(),
            known: Arc::default(),
            report_updates: Arc::new(AtomicBool::new(true)),
            scan: Mutex::new(None),
            forwarders: Arc::default(),
            pump_started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    fn adapter(&self) -> Result<&Adapter, TransportError> {
        self.session
            .get()
            .map(|session| &session.adapter)
            .ok_or(TransportError::SessionNotStarted)
    }

    fn known_peripheral(&self, id: &PeripheralId) -> Result<Peripheral, TransportError> {
        lock(&self.known)
            .get(id)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeripheral { id: id.clone() })
    }

    /// True for the first caller only; the adapter event pump runs once per radio.
    fn claim_event_pump(&self) -> bool {
        !self.pump_started.swap(true, Ordering::AcqRel)
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl RadioTransport for BtleplugRadio {
    async fn enable_radio(&self) -> Result<(), TransportError> {
        debug!("btleplug cannot change adapter power; assuming the radio is on");
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_session(&self, config: &SessionConfig) -> Result<(), TransportError> {
        if config.show_alert {
            debug!("power alerts are not supported by btleplug");
        }

        let session = self
            .session
            .get_or_try_init(|| async {
                let manager = Manager::new().await?;
                let adapter = manager
                    .adapters()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(TransportError::NoAdapters)?;
                let adapter_info = adapter.adapter_info().await?;
                info!(adapter = %adapter_info, "BLE adapter selected");
                Ok::<_, TransportError>(RadioSession {
                    _manager: manager,
                    adapter,
                })
            })
            .await?;

        if !self.claim_event_pump() {
            debug!("adapter event pump already running");
            return Ok(());
        }
        let events = match session.adapter.events().await {
            Ok(events) => events,
            Err(error) => {
                self.pump_started.store(false, Ordering::Release);
                return Err(error.into());
            }
        };
        tokio::spawn(pump_adapter_events(
            session.adapter.clone(),
            events,
            self.listeners.clone(),
            Arc::clone(&self.known),
            Arc::clone(&self.forwarders),
            Arc::clone(&self.report_updates),
            self.shutdown.child_token(),
        ));
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(generation = request.generation))]
    async fn scan(&self, request: &ScanRequest) -> Result<(), TransportError> {
        let adapter = self.adapter()?;
        let services = request
            .filters
            .iter()
            .map(|value| parse_uuid(value))
            .collect::<Result<Vec<_>, _>>()?;

        self.report_updates
            .store(request.allow_duplicates, Ordering::Relaxed);
        adapter.start_scan(ScanFilter { services }).await?;

        let cancel = self.shutdown.child_token();
        if let Some((_generation, previous)) =
            lock(&self.scan).replace((request.generation, cancel.clone()))
        {
            previous.cancel();
        }

        let adapter = adapter.clone();
        let listeners = self.listeners.clone();
        let timeout = request.timeout;
        let generation = request.generation;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = sleep(timeout) => {
                    if let Err(error) = adapter.stop_scan().await {
                        warn!(?error, "failed to stop scan after timeout");
                    }
                    listeners.emit(RadioEvent::ScanStopped { generation });
                }
            }
        });
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let adapter = self.adapter()?;
        let running = lock(&self.scan).take();
        let Some((generation, cancel)) = running else {
            return Ok(());
        };
        cancel.cancel();
        adapter.stop_scan().await?;
        self.listeners.emit(RadioEvent::ScanStopped { generation });
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%id))]
    async fn connect(&self, id: &PeripheralId) -> Result<(), TransportError> {
        self.adapter()?;
        let peripheral = self.known_peripheral(id)?;
        let listeners = self.listeners.clone();
        let id = id.clone();

        tokio::spawn(async move {
            let connected = async {
                if !peripheral.is_connected().await? {
                    peripheral.connect().await?;
                }
                peripheral.discover_services().await
            }
            .await;

            match connected {
                Ok(()) => listeners.emit(RadioEvent::PeripheralConnected { id }),
                Err(error) => listeners.emit(RadioEvent::ConnectFailed {
                    id,
                    reason: error.to_string(),
                }),
            }
        });
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%id))]
    async fn disconnect(&self, id: &PeripheralId) -> Result<(), TransportError> {
        let peripheral = self.known_peripheral(id)?;
        retire_forwarder(&self.forwarders, id);
        peripheral.disconnect().await?;
        self.listeners
            .emit(RadioEvent::PeripheralDisconnected { id: id.clone() });
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%key))]
    async fn start_notification(&self, key: &CharacteristicKey) -> Result<(), TransportError> {
        let peripheral = self.known_peripheral(&key.peripheral)?;
        let characteristic = find_characteristic(&peripheral, key)?;
        peripheral.subscribe(&characteristic).await?;

        let routes = match live_routes(&self.forwarders, &key.peripheral) {
            Some(routes) => routes,
            None => {
                let notifications = peripheral.notifications().await?;
                let forwarder = Forwarder {
                    cancel: self.shutdown.child_token(),
                    routes: Arc::default(),
                };
                tokio::spawn(forward_notifications(
                    key.peripheral.clone(),
                    notifications,
                    Arc::clone(&forwarder.routes),
                    self.listeners.clone(),
                    forwarder.cancel.clone(),
                ));
                let routes = Arc::clone(&forwarder.routes);
                lock(&self.forwarders).insert(key.peripheral.clone(), forwarder);
                routes
            }
        };
        lock(&routes).insert(characteristic.uuid, key.clone());
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%key))]
    async fn stop_notification(&self, key: &CharacteristicKey) -> Result<(), TransportError> {
        let peripheral = self.known_peripheral(&key.peripheral)?;
        let characteristic = find_characteristic(&peripheral, key)?;
        if let Some(routes) = live_routes(&self.forwarders, &key.peripheral) {
            lock(&routes).remove(&characteristic.uuid);
        }
        peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn bonded_peripherals(&self) -> Result<Vec<Advertisement>, TransportError> {
        let adapter = self.adapter()?;
        let mut bonded = Vec::new();
        for peripheral in adapter.peripherals().await? {
            if !peripheral.is_connected().await? {
                continue;
            }
            let advertisement = advertisement_for(&peripheral).await?;
            lock(&self.known).insert(advertisement.id.clone(), peripheral);
            bonded.push(advertisement);
        }
        Ok(bonded)
    }

    fn add_listener(&self, kind: EventKind, sink: EventSink) -> Result<ListenerId, TransportError> {
        Ok(self.listeners.add(kind, sink))
    }

    fn remove_listener(&self, listener: ListenerId) -> Result<(), TransportError> {
        self.listeners.remove(listener)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancels and forgets the forwarder of `id`, if any.
fn retire_forwarder(forwarders: &Forwarders, id: &PeripheralId) {
    if let Some(forwarder) = lock(forwarders).remove(id) {
        forwarder.cancel.cancel();
    }
}

/// Routes of the running forwarder for `id`. An exited forwarder is dropped
/// so the caller starts a fresh one.
fn live_routes(forwarders: &Forwarders, id: &PeripheralId) -> Option<Routes> {
    let mut forwarders = lock(forwarders);
    if forwarders
        .get(id)
        .is_some_and(|forwarder| forwarder.cancel.is_cancelled())
    {
        forwarders.remove(id);
    }
    forwarders
        .get(id)
        .map(|forwarder| Arc::clone(&forwarder.routes))
}

fn route_notification(routes: &Routes, uuid: &Uuid, value: Vec<u8>) -> Option<RadioEvent> {
    let key = lock(routes).get(uuid).cloned()?;
    Some(RadioEvent::ValueUpdated { key, value })
}

fn parse_uuid(value: &str) -> Result<Uuid, TransportError> {
    Uuid::parse_str(value).map_err(|source| TransportError::InvalidUuid {
        value: value.to_string(),
        source,
    })
}

fn find_characteristic(
    peripheral: &Peripheral,
    key: &CharacteristicKey,
) -> Result<Characteristic, TransportError> {
    let service = parse_uuid(key.service.as_str())?;
    let characteristic = parse_uuid(key.characteristic.as_str())?;
    peripheral
        .characteristics()
        .into_iter()
        .find(|candidate| candidate.service_uuid == service && candidate.uuid == characteristic)
        .ok_or_else(|| TransportError::UnknownCharacteristic { key: key.clone() })
}

fn peripheral_id(id: &platform::PeripheralId) -> PeripheralId {
    PeripheralId::new(id.to_string())
}

async fn advertisement_for(peripheral: &Peripheral) -> Result<Advertisement, TransportError> {
    let properties = peripheral.properties().await?.unwrap_or_default();
    Ok(Advertisement::new(
        peripheral_id(&peripheral.id()),
        properties.local_name,
        properties.rssi,
    ))
}

#[instrument(skip_all, level = "debug")]
async fn pump_adapter_events(
    adapter: Adapter,
    mut events: EventStream,
    listeners: ListenerTable,
    known: KnownPeripherals,
    forwarders: Forwarders,
    report_updates: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            CentralEvent::DeviceDiscovered(id) => {
                report_sighting(&adapter, &id, &listeners, &known).await;
            }
            CentralEvent::DeviceUpdated(id) if report_updates.load(Ordering::Relaxed) => {
                report_sighting(&adapter, &id, &listeners, &known).await;
            }
            CentralEvent::DeviceDisconnected(id) => {
                let id = peripheral_id(&id);
                retire_forwarder(&forwarders, &id);
                listeners.emit(RadioEvent::PeripheralDisconnected { id });
            }
            other => trace!(?other, "ignoring adapter event"),
        }
    }
    debug!("adapter event stream closed");
}

async fn report_sighting(
    adapter: &Adapter,
    id: &platform::PeripheralId,
    listeners: &ListenerTable,
    known: &KnownPeripherals,
) {
    let sighting = async {
        let peripheral = adapter.peripheral(id).await?;
        let advertisement = advertisement_for(&peripheral).await?;
        Ok::<_, TransportError>((peripheral, advertisement))
    }
    .await;

    match sighting {
        Ok((peripheral, advertisement)) => {
            lock(known).insert(advertisement.id.clone(), peripheral);
            listeners.emit(RadioEvent::PeripheralDiscovered(advertisement));
        }
        Err(error) => debug!(?error, %id, "failed to read advertised properties"),
    }
}

#[instrument(skip_all, level = "debug", fields(%peripheral))]
async fn forward_notifications(
    peripheral: PeripheralId,
    mut notifications: NotificationStream,
    routes: Routes,
    listeners: ListenerTable,
    cancel: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            () = cancel.cancelled() => break,
            notification = notifications.next() => match notification {
                Some(notification) => notification,
                None => break,
            },
        };

        let uuid = notification.uuid;
        match route_notification(&routes, &uuid, notification.value) {
            Some(event) => listeners.emit(event),
            None => trace!(%uuid, "dropping unrouted notification"),
        }
    }
    cancel.cancel();
    debug!("notification stream closed");
}
