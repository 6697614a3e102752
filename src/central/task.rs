use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, instrument, trace, warn};

use super::config::CentralConfig;
use super::connection::{
    CommandOutcome, CommandStep, ConnectionCommand, LinkEvent, on_command, on_link_event,
};
use super::dispatcher::{ListenerGroup, TeardownReport};
use super::peripheral::{ConnectionState, Peripheral, PeripheralFields, PeripheralId};
use super::permission::{PermissionGate, ensure_granted};
use super::registry::{Registry, Snapshot, SnapshotFilter};
use super::scan::ScanController;
use super::subscription::{
    CharacteristicKey, CorrelationToken, Observer, SubscriptionInfo, SubscriptionTable,
};
use crate::error::CentralError;
use crate::radio::{Advertisement, EventSink, RadioEvent, RadioTransport, ScanRequest, SessionConfig};

/// Immutable state published after every mutation.
#[derive(Debug, Clone)]
pub struct CentralView {
    revision: u64,
    running: bool,
    scanning: bool,
    scan_generation: u64,
    peripherals: Arc<[Peripheral]>,
    subscriptions: Arc<[SubscriptionInfo]>,
}

impl CentralView {
    fn initial() -> Self {
        Self {
            revision: 0,
            running: true,
            scanning: false,
            scan_generation: 0,
            peripherals: Arc::from(Vec::new()),
            subscriptions: Arc::from(Vec::new()),
        }
    }

    /// Increases on every registry, subscription or scan mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    #[must_use]
    pub fn scan_generation(&self) -> u64 {
        self.scan_generation
    }

    #[must_use]
    pub fn snapshot(&self, filter: SnapshotFilter) -> Snapshot {
        Snapshot::new(Arc::clone(&self.peripherals), filter)
    }

    #[must_use]
    pub fn peripheral(&self, id: &PeripheralId) -> Option<&Peripheral> {
        self.peripherals.iter().find(|peripheral| peripheral.id() == id)
    }

    #[must_use]
    pub fn subscriptions(&self) -> &[SubscriptionInfo] {
        &self.subscriptions
    }
}

type Reply<T> = oneshot::Sender<Result<T, CentralError>>;

#[derive(Debug)]
enum Command {
    StartScan {
        timeout: Option<Duration>,
        reply: Reply<u64>,
    },
    StopScan {
        reply: Reply<()>,
    },
    Connect {
        id: PeripheralId,
        reply: Reply<CommandOutcome>,
    },
    Disconnect {
        id: PeripheralId,
        reply: Reply<CommandOutcome>,
    },
    Subscribe {
        key: CharacteristicKey,
        token: CorrelationToken,
        observer: Observer,
        reply: Reply<()>,
    },
    Unsubscribe {
        key: CharacteristicKey,
        reply: oneshot::Sender<bool>,
    },
}

/// The single queue consumed by the central task.
#[derive(Debug)]
enum CoreInput {
    Command(Command),
    Event(RadioEvent),
    Shutdown(oneshot::Sender<TeardownReport>),
}

/// Entry point for activating a central.
#[derive(Debug)]
pub struct Central;

impl Central {
    /// Enables the radio, starts the backend session, acquires one listener
    /// per event kind, loads bonded peripherals and spawns the central task.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend session cannot be started or listeners
    /// cannot be acquired.
    #[instrument(skip_all, level = "info")]
    pub async fn activate(
        transport: Arc<dyn RadioTransport>,
        permissions: Arc<dyn PermissionGate>,
        config: CentralConfig,
    ) -> Result<CentralHandle, CentralError> {
        match transport.enable_radio().await {
            Ok(()) => info!("radio enabled"),
            Err(error) => warn!(?error, "failed to enable radio; continuing with activation"),
        }
        transport
            .start_session(&SessionConfig {
                show_alert: config.show_alert(),
            })
            .await?;

        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let weak_inputs = inputs_tx.downgrade();
        let sink = EventSink::new(move |event| {
            weak_inputs
                .upgrade()
                .is_some_and(|inputs| inputs.send(CoreInput::Event(event)).is_ok())
        });
        let listeners = ListenerGroup::acquire(Arc::clone(&transport), &sink)?;
        let (view_tx, view_rx) = watch::channel(CentralView::initial());

        let mut core = CentralCore {
            transport,
            permissions,
            config,
            listeners,
            registry: Registry::new(),
            scan: ScanController::default(),
            subscriptions: SubscriptionTable::default(),
            view: view_tx,
            revision: 0,
        };
        core.load_bonded().await;
        info!(listeners = core.listeners.len(), "central activated");
        tokio::spawn(core.run(inputs_rx));

        Ok(CentralHandle {
            inputs: inputs_tx,
            view: view_rx,
        })
    }
}

/// Cloneable command surface for a running central.
///
/// Command results confirm that a request was accepted; final connection
/// states are observed through [`CentralHandle::changes`] or
/// [`CentralHandle::wait_for_state`].
#[derive(Debug, Clone)]
pub struct CentralHandle {
    inputs: mpsc::UnboundedSender<CoreInput>,
    view: watch::Receiver<CentralView>,
}

impl CentralHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CentralError> {
        self.send_input(|reply| CoreInput::Command(build(reply))).await
    }

    async fn send_input<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoreInput,
    ) -> Result<T, CentralError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inputs
            .send(build(reply_tx))
            .map_err(|_closed| CentralError::Stopped)?;
        reply_rx.await.map_err(|_closed| CentralError::Stopped)
    }

    /// Starts a scan session and returns its generation. `None` uses the
    /// configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyScanning`, `PermissionDenied`, `TransportFailure` or
    /// `Stopped`.
    pub async fn start_scan(&self, timeout: Option<Duration>) -> Result<u64, CentralError> {
        self.request(|reply| Command::StartScan { timeout, reply })
            .await?
    }

    /// Stops the running scan early; no-op when idle.
    ///
    /// # Errors
    ///
    /// Returns `TransportFailure` or `Stopped`.
    pub async fn stop_scan(&self) -> Result<(), CentralError> {
        self.request(|reply| Command::StopScan { reply }).await?
    }

    /// Requests a connection.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeripheral`, `TransportFailure` or `Stopped`.
    pub async fn connect(&self, id: impl Into<PeripheralId>) -> Result<CommandOutcome, CentralError> {
        let id = id.into();
        self.request(|reply| Command::Connect { id, reply }).await?
    }

    /// Requests a disconnection. Subscriptions of the peripheral are dropped
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeripheral`, `TransportFailure` or `Stopped`.
    pub async fn disconnect(
        &self,
        id: impl Into<PeripheralId>,
    ) -> Result<CommandOutcome, CentralError> {
        let id = id.into();
        self.request(|reply| Command::Disconnect { id, reply }).await?
    }

    /// Subscribes `observer` to value updates of one characteristic.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeripheral`, `NotConnected`, `AlreadySubscribed`,
    /// `TransportFailure` or `Stopped`.
    pub async fn subscribe(
        &self,
        key: CharacteristicKey,
        token: CorrelationToken,
        observer: Observer,
    ) -> Result<(), CentralError> {
        self.request(|reply| Command::Subscribe {
            key,
            token,
            observer,
            reply,
        })
        .await?
    }

    /// Removes a subscription, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns `Stopped` once the central has been torn down.
    pub async fn unsubscribe(&self, key: CharacteristicKey) -> Result<bool, CentralError> {
        self.request(|reply| Command::Unsubscribe { key, reply }).await
    }

    #[must_use]
    pub fn snapshot(&self, filter: SnapshotFilter) -> Snapshot {
        self.view.borrow().snapshot(filter)
    }

    #[must_use]
    pub fn get(&self, id: &PeripheralId) -> Option<Peripheral> {
        self.view.borrow().peripheral(id).cloned()
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.view.borrow().is_scanning()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.view.borrow().subscriptions().to_vec()
    }

    /// Change notifications; a new value is published on every mutation.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<CentralView> {
        self.view.clone()
    }

    /// Waits until the peripheral's state satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns `Stopped` if the central is torn down first.
    pub async fn wait_for_state<F>(
        &self,
        id: &PeripheralId,
        predicate: F,
    ) -> Result<ConnectionState, CentralError>
    where
        F: Fn(ConnectionState) -> bool,
    {
        let mut changes = self.view.clone();
        let view = changes
            .wait_for(|view| {
                !view.is_running()
                    || view
                        .peripheral(id)
                        .is_some_and(|peripheral| predicate(peripheral.state()))
            })
            .await
            .map_err(|_closed| CentralError::Stopped)?;

        match view.peripheral(id) {
            Some(peripheral) if view.is_running() && predicate(peripheral.state()) => {
                Ok(peripheral.state())
            }
            _ => Err(CentralError::Stopped),
        }
    }

    /// Waits until the current scan session has ended.
    ///
    /// # Errors
    ///
    /// Returns `Stopped` if the central is torn down first.
    pub async fn wait_for_scan_end(&self) -> Result<(), CentralError> {
        let mut changes = self.view.clone();
        let view = changes
            .wait_for(|view| !view.is_running() || !view.is_scanning())
            .await
            .map_err(|_closed| CentralError::Stopped)?;
        if view.is_running() {
            Ok(())
        } else {
            Err(CentralError::Stopped)
        }
    }

    /// Releases every radio listener and clears all state. Calling this again
    /// returns an empty report.
    pub async fn shutdown(&self) -> TeardownReport {
        self.send_input(CoreInput::Shutdown).await.unwrap_or_default()
    }
}

/// State owned exclusively by the central task.
#[derive(Debug)]
struct CentralCore {
    transport: Arc<dyn RadioTransport>,
    permissions: Arc<dyn PermissionGate>,
    config: CentralConfig,
    listeners: ListenerGroup,
    registry: Registry,
    scan: ScanController,
    subscriptions: SubscriptionTable,
    view: watch::Sender<CentralView>,
    revision: u64,
}

impl CentralCore {
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<CoreInput>) {
        while let Some(input) = inputs.recv().await {
            match input {
                CoreInput::Event(event) => self.apply_event(event),
                CoreInput::Shutdown(reply) => {
                    let report = self.teardown();
                    let _ = reply.send(report);
                    return;
                }
                CoreInput::Command(command) => self.execute(command).await,
            }
        }

        debug!("every central handle dropped; tearing down");
        let _report = self.teardown();
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::StartScan { timeout, reply } => {
                let _ = reply.send(self.start_scan(timeout).await);
            }
            Command::StopScan { reply } => {
                let _ = reply.send(self.stop_scan().await);
            }
            Command::Connect { id, reply } => {
                let _ = reply.send(self.connect(id).await);
            }
            Command::Disconnect { id, reply } => {
                let _ = reply.send(self.disconnect(id).await);
            }
            Command::Subscribe {
                key,
                token,
                observer,
                reply,
            } => {
                let _ = reply.send(self.subscribe(key, token, observer).await);
            }
            Command::Unsubscribe { key, reply } => {
                let _ = reply.send(self.unsubscribe(&key).await);
            }
        }
    }

    async fn load_bonded(&mut self) {
        let bonded = match self.transport.bonded_peripherals().await {
            Ok(bonded) => bonded,
            Err(error) => {
                warn!(?error, "failed to query bonded peripherals");
                return;
            }
        };

        for advertisement in bonded {
            let id = advertisement.id.clone();
            self.record_sighting(advertisement);
            self.registry.set_state(&id, ConnectionState::Connected);
            debug!(%id, "bonded peripheral loaded as connected");
        }
        self.publish();
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&mut self, timeout: Option<Duration>) -> Result<u64, CentralError> {
        if self.scan.is_active() {
            return Err(CentralError::AlreadyScanning);
        }
        if let Some(kind) = self.config.scan_permission() {
            ensure_granted(self.permissions.as_ref(), kind).await?;
        }

        let generation = self.scan.reserve()?;
        let request = ScanRequest {
            filters: self.config.scan_filters().to_vec(),
            timeout: timeout.unwrap_or(self.config.scan_timeout()),
            allow_duplicates: self.config.allow_duplicates(),
            generation,
        };
        self.transport.scan(&request).await?;
        self.scan.mark_active(generation);
        info!(generation, timeout = ?request.timeout, "scan started");
        self.publish();
        Ok(generation)
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&mut self) -> Result<(), CentralError> {
        if !self.scan.is_active() {
            return Ok(());
        }
        self.transport.stop_scan().await?;
        Ok(())
    }

    fn state_of(&self, id: &PeripheralId) -> Result<ConnectionState, CentralError> {
        self.registry
            .get(id)
            .map(Peripheral::state)
            .ok_or_else(|| CentralError::UnknownPeripheral { id: id.clone() })
    }

    #[instrument(skip(self), level = "debug", fields(%id))]
    async fn connect(&mut self, id: PeripheralId) -> Result<CommandOutcome, CentralError> {
        let state = self.state_of(&id)?;
        let next = match on_command(state, ConnectionCommand::Connect) {
            CommandStep::Begin(next) => next,
            CommandStep::Skip(outcome) => {
                debug!(%state, ?outcome, "connect skipped");
                return Ok(outcome);
            }
        };

        self.set_state(&id, next);
        match self.transport.connect(&id).await {
            Ok(()) => Ok(CommandOutcome::Accepted),
            Err(error) => {
                warn!(?error, "connect primitive failed");
                self.set_state(&id, ConnectionState::Failed);
                Err(error.into())
            }
        }
    }

    #[instrument(skip(self), level = "debug", fields(%id))]
    async fn disconnect(&mut self, id: PeripheralId) -> Result<CommandOutcome, CentralError> {
        let state = self.state_of(&id)?;
        let next = match on_command(state, ConnectionCommand::Disconnect) {
            CommandStep::Begin(next) => next,
            CommandStep::Skip(outcome) => {
                debug!(%state, ?outcome, "disconnect skipped");
                return Ok(outcome);
            }
        };

        self.set_state(&id, next);
        match self.transport.disconnect(&id).await {
            Ok(()) => Ok(CommandOutcome::Accepted),
            Err(error) => {
                warn!(?error, "disconnect primitive failed; restoring previous state");
                self.set_state(&id, state);
                Err(error.into())
            }
        }
    }

    #[instrument(skip(self, observer), level = "debug", fields(%key, %token))]
    async fn subscribe(
        &mut self,
        key: CharacteristicKey,
        token: CorrelationToken,
        observer: Observer,
    ) -> Result<(), CentralError> {
        let state = self.state_of(&key.peripheral)?;
        if !state.is_connected() {
            return Err(CentralError::NotConnected {
                id: key.peripheral,
                state,
            });
        }

        self.subscriptions.insert(key.clone(), token, observer)?;
        if let Err(error) = self.transport.start_notification(&key).await {
            warn!(?error, "start-notification primitive failed; rolling back");
            self.subscriptions.remove(&key);
            return Err(error.into());
        }
        self.publish();
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%key))]
    async fn unsubscribe(&mut self, key: &CharacteristicKey) -> bool {
        if !self.subscriptions.remove(key) {
            return false;
        }
        self.publish();

        let still_connected = self
            .registry
            .get(&key.peripheral)
            .is_some_and(Peripheral::is_connected);
        if still_connected && let Err(error) = self.transport.stop_notification(key).await {
            warn!(?error, "stop-notification primitive failed");
        }
        true
    }

    fn apply_event(&mut self, event: RadioEvent) {
        trace!(kind = %event.kind(), "applying radio event");
        match event {
            RadioEvent::PeripheralDiscovered(advertisement) => {
                self.record_sighting(advertisement);
                self.publish();
            }
            RadioEvent::PeripheralConnected { id } => self.apply_link(&id, LinkEvent::Established),
            RadioEvent::ConnectFailed { id, reason } => {
                warn!(%id, %reason, "connection attempt failed");
                self.apply_link(&id, LinkEvent::Failed);
            }
            RadioEvent::PeripheralDisconnected { id } => self.apply_link(&id, LinkEvent::Lost),
            RadioEvent::ScanStopped { generation } => {
                if self.scan.on_stopped(generation) {
                    info!(generation, "scan stopped");
                    self.publish();
                } else {
                    debug!(
                        generation,
                        current = self.scan.generation(),
                        "discarding stale scan-stopped event"
                    );
                }
            }
            RadioEvent::ValueUpdated { key, value } => {
                let delivered = self.subscriptions.deliver(&key, &value);
                if delivered == 0 {
                    debug!(%key, "dropping value update without active subscription");
                }
            }
        }
    }

    fn record_sighting(&mut self, advertisement: Advertisement) {
        let Advertisement {
            id,
            local_name,
            rssi,
        } = advertisement;
        let fields = PeripheralFields::new(local_name, rssi, OffsetDateTime::now_utc());
        self.registry.upsert(id, fields);
    }

    fn apply_link(&mut self, id: &PeripheralId, event: LinkEvent) {
        let Some(state) = self.registry.get(id).map(Peripheral::state) else {
            debug!(%id, ?event, "dropping link event for unknown peripheral");
            return;
        };

        match on_link_event(state, event) {
            Some(next) => {
                info!(%id, from = %state, to = %next, "connection state changed");
                self.set_state(id, next);
            }
            None => debug!(%id, %state, ?event, "ignoring stale link event"),
        }
    }

    fn set_state(&mut self, id: &PeripheralId, state: ConnectionState) {
        self.registry.set_state(id, state);
        if state.invalidates_subscriptions() {
            let removed = self.subscriptions.invalidate_peripheral(id);
            if !removed.is_empty() {
                debug!(%id, count = removed.len(), "subscriptions invalidated");
            }
        }
        self.publish();
    }

    fn publish(&mut self) {
        self.revision += 1;
        let view = CentralView {
            revision: self.revision,
            running: true,
            scanning: self.scan.is_active(),
            scan_generation: self.scan.generation(),
            peripherals: self.registry.shared(),
            subscriptions: self.subscriptions.infos(),
        };
        self.view.send_replace(view);
    }

    fn teardown(&mut self) -> TeardownReport {
        let report = self.listeners.release_all();
        self.registry.clear();
        self.subscriptions.clear();
        self.scan.reset();
        self.revision += 1;
        self.view.send_replace(CentralView {
            revision: self.revision,
            running: false,
            ..CentralView::initial()
        });
        info!(
            released = report.released(),
            failures = report.failures().len(),
            "central torn down"
        );
        report
    }
}
