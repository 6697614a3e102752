use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use strum::IntoEnumIterator;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use blerelay::{
    Advertisement, AlwaysGranted, Central, CentralConfig, CentralError, CentralHandle,
    CharacteristicKey, CommandOutcome, ConnectionState, CorrelationToken, EventKind,
    FakeOperation, FakeRadio, FakeRadioConfig, FixedPermission, Notification,
    NotificationPayloads, Observer, PeripheralId, PermissionGate, PermissionKind,
    PermissionStatus, RadioEvent, ScanFixture, SnapshotFilter, TransportError,
};

const SERVICE: &str = "0000180d-0000-1000-8000-00805f9b34fb";
const CHARACTERISTIC: &str = "00002a37-0000-1000-8000-00805f9b34fb";

fn manual_radio() -> Arc<FakeRadio> {
    Arc::new(FakeRadio::new(
        FakeRadioConfig::builder()
            .auto_ack(false)
            .notifications(NotificationPayloads::default())
            .build(),
    ))
}

fn acking_radio() -> Arc<FakeRadio> {
    Arc::new(FakeRadio::new(
        FakeRadioConfig::builder()
            .notifications(NotificationPayloads::default())
            .build(),
    ))
}

async fn activate(radio: &Arc<FakeRadio>) -> CentralHandle {
    activate_with(radio, Arc::new(AlwaysGranted), CentralConfig::builder().build()).await
}

async fn activate_with(
    radio: &Arc<FakeRadio>,
    permissions: Arc<dyn PermissionGate>,
    config: CentralConfig,
) -> CentralHandle {
    Central::activate(radio.clone(), permissions, config)
        .await
        .expect("fake radio should activate")
}

async fn settled<F: Future>(future: F) -> F::Output {
    timeout(Duration::from_secs(5), future)
        .await
        .expect("central should settle")
}

/// Round-trips a no-op command so every event emitted before it is applied.
async fn drain(central: &CentralHandle) {
    let removed = central
        .unsubscribe(CharacteristicKey::new("00:00", SERVICE, CHARACTERISTIC))
        .await
        .expect("central should still be running");
    assert!(!removed);
}

fn discovered(id: &str, name: Option<&str>, rssi: Option<i16>) -> RadioEvent {
    RadioEvent::PeripheralDiscovered(Advertisement::new(id, name.map(String::from), rssi))
}

async fn discover(radio: &FakeRadio, central: &CentralHandle, id: &str) -> PeripheralId {
    radio.emit(discovered(id, Some("Sensor1"), Some(-60)));
    drain(central).await;
    PeripheralId::from(id)
}

async fn connected(radio: &FakeRadio, central: &CentralHandle, id: &str) -> PeripheralId {
    let id = discover(radio, central, id).await;
    central.connect(id.clone()).await.expect("connect should be accepted");
    settled(central.wait_for_state(&id, ConnectionState::is_connected))
        .await
        .expect("peripheral should connect");
    id
}

fn heart_rate(id: &str) -> CharacteristicKey {
    CharacteristicKey::new(id, SERVICE, CHARACTERISTIC)
}

#[tokio::test]
async fn sensor_lifecycle_delivers_until_disconnect() {
    let radio = manual_radio();
    let central = activate(&radio).await;
    let id = PeripheralId::from("AA:BB");
    let key = heart_rate("AA:BB");

    radio.emit(discovered("AA:BB", Some("Sensor1"), Some(-60)));
    drain(&central).await;
    let peripheral = central.get(&id).expect("discovery should register the peripheral");
    assert_eq!(ConnectionState::Discovered, peripheral.state());
    assert_eq!(Some("Sensor1"), peripheral.local_name());
    assert_eq!(Some(-60), peripheral.rssi());

    assert_eq!(
        CommandOutcome::Accepted,
        central.connect(id.clone()).await.expect("connect should be accepted")
    );
    assert_eq!(
        Some(ConnectionState::Connecting),
        central.get(&id).map(|peripheral| peripheral.state())
    );
    assert_eq!(1, radio.calls(FakeOperation::Connect));

    radio.emit(RadioEvent::PeripheralConnected { id: id.clone() });
    assert_eq!(
        ConnectionState::Connected,
        settled(central.wait_for_state(&id, ConnectionState::is_connected))
            .await
            .expect("peripheral should connect")
    );

    let (sender, mut notifications) = mpsc::unbounded_channel();
    central
        .subscribe(key.clone(), CorrelationToken::from(7), Observer::channel(sender))
        .await
        .expect("subscribe should succeed on a connected peripheral");
    assert!(radio.is_notifying(&key));

    radio.emit(RadioEvent::ValueUpdated {
        key: key.clone(),
        value: vec![0x06, 0x48],
    });
    drain(&central).await;
    assert_eq!(
        Ok(Notification {
            key: key.clone(),
            token: CorrelationToken::from(7),
            value: vec![0x06, 0x48],
        }),
        notifications.try_recv()
    );
    assert!(notifications.try_recv().is_err());

    assert_eq!(
        CommandOutcome::Accepted,
        central.disconnect(id.clone()).await.expect("disconnect should be accepted")
    );
    assert_eq!(
        Some(ConnectionState::Disconnecting),
        central.get(&id).map(|peripheral| peripheral.state())
    );
    assert!(central.subscriptions().is_empty());

    radio.emit(RadioEvent::PeripheralDisconnected { id: id.clone() });
    settled(central.wait_for_state(&id, |state| state == ConnectionState::Disconnected))
        .await
        .expect("peripheral should disconnect");

    radio.emit(RadioEvent::ValueUpdated {
        key,
        value: vec![0x06, 0x4a],
    });
    drain(&central).await;
    assert_eq!(None, notifications.recv().await);
}

#[tokio::test]
async fn repeated_discovery_keeps_one_entry_with_latest_values() {
    let radio = manual_radio();
    let central = activate(&radio).await;

    radio.emit(discovered("AA:BB", Some("Sensor1"), Some(-60)));
    radio.emit(discovered("CC:DD", None, Some(-80)));
    radio.emit(discovered("AA:BB", None, Some(-52)));
    radio.emit(discovered("AA:BB", Some("Sensor1b"), None));
    drain(&central).await;

    let snapshot = central.snapshot(SnapshotFilter::All);
    let ids: Vec<&str> = snapshot.iter().map(|peripheral| peripheral.id().as_str()).collect();
    assert_eq!(vec!["AA:BB", "CC:DD"], ids);

    let sensor = central.get(&"AA:BB".into()).expect("peripheral should be registered");
    assert_eq!(Some("Sensor1b"), sensor.local_name());
    assert_eq!(Some(-52), sensor.rssi());
}

#[tokio::test]
async fn snapshot_is_isolated_from_later_mutations() {
    let radio = manual_radio();
    let central = activate(&radio).await;
    discover(&radio, &central, "AA:BB").await;

    let before = central.snapshot(SnapshotFilter::All);
    discover(&radio, &central, "CC:DD").await;

    assert_eq!(1, before.len());
    assert_eq!(2, central.snapshot(SnapshotFilter::All).len());
}

#[tokio::test]
async fn connect_is_idempotent_once_connected() {
    let radio = acking_radio();
    let central = activate(&radio).await;
    let id = connected(&radio, &central, "AA:BB").await;

    let outcome = central.connect(id).await.expect("connect should not fail");

    assert_eq!(CommandOutcome::AlreadyConnected, outcome);
    assert_eq!(1, radio.calls(FakeOperation::Connect));
}

#[tokio::test]
async fn duplicate_connect_while_connecting_is_in_flight() {
    let radio = manual_radio();
    let central = activate(&radio).await;
    let id = discover(&radio, &central, "AA:BB").await;

    central.connect(id.clone()).await.expect("connect should be accepted");
    let duplicate = central.connect(id.clone()).await.expect("connect should not fail");
    let disconnect = central.disconnect(id).await.expect("disconnect should not fail");

    assert_eq!(CommandOutcome::InFlight, duplicate);
    assert_eq!(CommandOutcome::InFlight, disconnect);
    assert_eq!(1, radio.calls(FakeOperation::Connect));
    assert_eq!(0, radio.calls(FakeOperation::Disconnect));
}

#[tokio::test]
async fn disconnect_without_connection_is_a_no_op() {
    let radio = manual_radio();
    let central = activate(&radio).await;
    let id = discover(&radio, &central, "AA:BB").await;

    let outcome = central.disconnect(id).await.expect("disconnect should not fail");

    assert_eq!(CommandOutcome::AlreadyDisconnected, outcome);
    assert_eq!(0, radio.calls(FakeOperation::Disconnect));
}

#[tokio::test]
async fn commands_on_unknown_peripheral_fail() {
    let radio = manual_radio();
    let central = activate(&radio).await;

    assert_matches!(
        central.connect("EE:FF").await,
        Err(CentralError::UnknownPeripheral { id }) if id.as_str() == "EE:FF"
    );
    assert_matches!(
        central
            .subscribe(
                heart_rate("EE:FF"),
                CorrelationToken::default(),
                Observer::from_fn(|_notification| {}),
            )
            .await,
        Err(CentralError::UnknownPeripheral { .. })
    );
}

#[tokio::test]
async fn subscribe_on_discovered_peripheral_fails_not_connected() {
    let radio = manual_radio();
    let central = activate(&radio).await;
    discover(&radio, &central, "AA:BB").await;

    let result = central
        .subscribe(
            heart_rate("AA:BB"),
            CorrelationToken::default(),
            Observer::from_fn(|_notification| {}),
        )
        .await;

    assert_matches!(
        result,
        Err(CentralError::NotConnected {
            state: ConnectionState::Discovered,
            ..
        })
    );
    assert_eq!(0, radio.calls(FakeOperation::StartNotification));
}

#[tokio::test]
async fn duplicate_subscription_is_rejected() {
    let radio = acking_radio();
    let central = activate(&radio).await;
    connected(&radio, &central, "AA:BB").await;
    let observer = Observer::from_fn(|_notification| {});

    central
        .subscribe(heart_rate("AA:BB"), CorrelationToken::default(), observer.clone())
        .await
        .expect("first subscription should succeed");
    let duplicate = central
        .subscribe(heart_rate("AA:BB"), CorrelationToken::default(), observer)
        .await;

    assert_matches!(duplicate, Err(CentralError::AlreadySubscribed { .. }));
    assert_eq!(1, central.subscriptions().len());
}

#[tokio::test]
async fn failed_start_notification_rolls_back_subscription() {
    let radio = acking_radio();
    let central = activate(&radio).await;
    connected(&radio, &central, "AA:BB").await;
    radio.fail_next(FakeOperation::StartNotification);

    let result = central
        .subscribe(
            heart_rate("AA:BB"),
            CorrelationToken::default(),
            Observer::from_fn(|_notification| {}),
        )
        .await;

    assert_matches!(
        result,
        Err(CentralError::TransportFailure(TransportError::Rejected { .. }))
    );
    assert!(central.subscriptions().is_empty());
}

#[tokio::test]
async fn unsubscribe_stops_notifications_on_connected_peripheral() {
    let radio = acking_radio();
    let central = activate(&radio).await;
    connected(&radio, &central, "AA:BB").await;
    let key = heart_rate("AA:BB");
    central
        .subscribe(key.clone(), CorrelationToken::default(), Observer::from_fn(|_n| {}))
        .await
        .expect("subscription should succeed");

    assert!(central.unsubscribe(key.clone()).await.expect("central should run"));
    assert!(!central.unsubscribe(key.clone()).await.expect("central should run"));
    assert!(!radio.is_notifying(&key));
    assert_eq!(1, radio.calls(FakeOperation::StopNotification));
}

#[tokio::test]
async fn stale_scan_stop_keeps_current_scan_active() {
    let radio = manual_radio();
    let central = activate(&radio).await;

    let first = central
        .start_scan(Some(Duration::from_secs(60)))
        .await
        .expect("scan should start");
    radio.emit(RadioEvent::ScanStopped {
        generation: first - 1,
    });
    drain(&central).await;

    assert!(central.is_scanning());
    assert_matches!(
        central.start_scan(None).await,
        Err(CentralError::AlreadyScanning)
    );

    central.stop_scan().await.expect("stop should succeed");
    settled(central.wait_for_scan_end())
        .await
        .expect("scan should end");
    assert!(!central.is_scanning());

    let second = central
        .start_scan(Some(Duration::from_secs(60)))
        .await
        .expect("a new scan should start");
    assert!(second > first);
    radio.emit(RadioEvent::ScanStopped { generation: first });
    drain(&central).await;
    assert!(central.is_scanning());
}

#[tokio::test]
async fn timed_scan_discovers_fixture_then_ends() {
    let fixture: ScanFixture = "AA:BB|Sensor1|-60;CC:DD|-|-"
        .parse()
        .expect("fixture should parse");
    let radio = Arc::new(FakeRadio::new(
        FakeRadioConfig::builder().scan_fixture(fixture).build(),
    ));
    let central = activate(&radio).await;

    central
        .start_scan(Some(Duration::from_millis(20)))
        .await
        .expect("scan should start");
    settled(central.wait_for_scan_end())
        .await
        .expect("scan should end after its timeout");

    assert_eq!(2, central.snapshot(SnapshotFilter::All).len());
    assert_eq!(
        2,
        central
            .snapshot(SnapshotFilter::State(ConnectionState::Discovered))
            .len()
    );
}

#[tokio::test]
async fn failed_scan_primitive_leaves_scan_inactive() {
    let radio = manual_radio();
    let central = activate(&radio).await;
    radio.fail_next(FakeOperation::Scan);

    assert_matches!(
        central.start_scan(None).await,
        Err(CentralError::TransportFailure(_))
    );
    assert!(!central.is_scanning());
    central.start_scan(None).await.expect("next scan should start");
}

#[tokio::test]
async fn denied_permission_blocks_scan_but_not_connect() {
    let bonded: ScanFixture = "AA:BB|Watch|-40".parse().expect("fixture should parse");
    let radio = Arc::new(FakeRadio::new(
        FakeRadioConfig::builder()
            .bonded(bonded)
            .notifications(NotificationPayloads::default())
            .build(),
    ));
    let config = CentralConfig::builder()
        .scan_permission(PermissionKind::FineLocation)
        .build();
    let central = activate_with(&radio, Arc::new(FixedPermission::denied()), config).await;

    assert_matches!(
        central.start_scan(None).await,
        Err(CentralError::PermissionDenied {
            kind: PermissionKind::FineLocation
        })
    );
    assert!(!central.is_scanning());
    assert_eq!(0, radio.calls(FakeOperation::Scan));

    let outcome = central.disconnect("AA:BB").await.expect("disconnect should work");
    assert_eq!(CommandOutcome::Accepted, outcome);
}

#[tokio::test]
async fn permission_granted_on_request_allows_scan() {
    let radio = manual_radio();
    let config = CentralConfig::builder()
        .scan_permission(PermissionKind::FineLocation)
        .build();
    let gate = FixedPermission::new(PermissionStatus::Denied, PermissionStatus::Granted);
    let central = activate_with(&radio, Arc::new(gate), config).await;

    central.start_scan(None).await.expect("scan should start after prompt");
    assert!(central.is_scanning());
}

#[tokio::test]
async fn connect_transport_failure_marks_failed_and_core_keeps_running() {
    let radio = acking_radio();
    let central = activate(&radio).await;
    let id = discover(&radio, &central, "AA:BB").await;
    radio.fail_next(FakeOperation::Connect);

    assert_matches!(
        central.connect(id.clone()).await,
        Err(CentralError::TransportFailure(TransportError::Rejected { .. }))
    );
    assert_eq!(
        Some(ConnectionState::Failed),
        central.get(&id).map(|peripheral| peripheral.state())
    );

    assert_eq!(
        CommandOutcome::Accepted,
        central.connect(id.clone()).await.expect("retry should be accepted")
    );
    settled(central.wait_for_state(&id, ConnectionState::is_connected))
        .await
        .expect("retry should connect");
}

#[tokio::test]
async fn refused_connection_ends_in_failed() {
    let radio = acking_radio();
    radio.refuse_connection("AA:BB");
    let central = activate(&radio).await;
    let id = discover(&radio, &central, "AA:BB").await;

    central.connect(id.clone()).await.expect("connect should be accepted");

    assert_eq!(
        ConnectionState::Failed,
        settled(central.wait_for_state(&id, |state| state == ConnectionState::Failed))
            .await
            .expect("peripheral should fail")
    );
}

#[tokio::test]
async fn link_loss_invalidates_subscriptions() {
    let radio = acking_radio();
    let central = activate(&radio).await;
    let id = connected(&radio, &central, "AA:BB").await;
    central
        .subscribe(heart_rate("AA:BB"), CorrelationToken::default(), Observer::from_fn(|_n| {}))
        .await
        .expect("subscription should succeed");

    radio.emit(RadioEvent::PeripheralDisconnected { id: id.clone() });
    settled(central.wait_for_state(&id, |state| state == ConnectionState::Disconnected))
        .await
        .expect("peripheral should disconnect");

    assert!(central.subscriptions().is_empty());
}

#[tokio::test]
async fn disconnect_transport_failure_restores_connected_state() {
    let radio = acking_radio();
    let central = activate(&radio).await;
    let id = connected(&radio, &central, "AA:BB").await;
    central
        .subscribe(heart_rate("AA:BB"), CorrelationToken::default(), Observer::from_fn(|_n| {}))
        .await
        .expect("subscription should succeed");
    radio.fail_next(FakeOperation::Disconnect);

    assert_matches!(
        central.disconnect(id.clone()).await,
        Err(CentralError::TransportFailure(TransportError::Rejected { .. }))
    );
    assert_eq!(
        Some(ConnectionState::Connected),
        central.get(&id).map(|peripheral| peripheral.state())
    );
    assert!(central.subscriptions().is_empty());
    assert_eq!(1, radio.calls(FakeOperation::Disconnect));

    assert_eq!(
        CommandOutcome::Accepted,
        central.disconnect(id.clone()).await.expect("retry should be accepted")
    );
    settled(central.wait_for_state(&id, |state| state == ConnectionState::Disconnected))
        .await
        .expect("peripheral should disconnect");
}

#[tokio::test]
async fn bonded_peripherals_load_as_connected() {
    let bonded: ScanFixture = "AA:BB|Watch|-40;CC:DD|-|-".parse().expect("fixture should parse");
    let radio = Arc::new(FakeRadio::new(FakeRadioConfig::builder().bonded(bonded).build()));
    let central = activate(&radio).await;

    assert_eq!(2, central.snapshot(SnapshotFilter::Connected).len());
    assert!(central.snapshot(SnapshotFilter::NotConnected).is_empty());
    assert_eq!(1, radio.calls(FakeOperation::BondedPeripherals));
}

#[tokio::test]
async fn bonded_query_failure_is_not_fatal() {
    let radio = manual_radio();
    radio.fail_next(FakeOperation::BondedPeripherals);

    let central = activate(&radio).await;

    assert!(central.snapshot(SnapshotFilter::All).is_empty());
}

#[tokio::test]
async fn enable_radio_failure_does_not_abort_activation() {
    let radio = manual_radio();
    radio.fail_next(FakeOperation::EnableRadio);

    let central = activate(&radio).await;

    assert_eq!(EventKind::iter().len(), radio.active_listeners());
    drain(&central).await;
}

#[tokio::test]
async fn session_failure_aborts_activation() {
    let radio = manual_radio();
    radio.fail_next(FakeOperation::StartSession);

    let result =
        Central::activate(radio.clone(), Arc::new(AlwaysGranted), CentralConfig::default()).await;

    assert_matches!(result, Err(CentralError::TransportFailure(_)));
    assert_eq!(0, radio.active_listeners());
}

#[tokio::test]
async fn listener_failure_rolls_back_activation() {
    let radio = manual_radio();
    radio.fail_listener(EventKind::ScanStopped);

    let result =
        Central::activate(radio.clone(), Arc::new(AlwaysGranted), CentralConfig::default()).await;

    assert_matches!(
        result,
        Err(CentralError::TransportFailure(TransportError::Rejected { .. }))
    );
    assert_eq!(0, radio.active_listeners());
}

#[tokio::test]
async fn shutdown_releases_listeners_and_stops_handle() {
    let radio = acking_radio();
    let central = activate(&radio).await;
    connected(&radio, &central, "AA:BB").await;

    let report = central.shutdown().await;

    assert!(report.is_clean());
    assert_eq!(EventKind::iter().len(), report.released());
    assert_eq!(0, radio.active_listeners());
    assert!(central.snapshot(SnapshotFilter::All).is_empty());
    assert_matches!(central.connect("AA:BB").await, Err(CentralError::Stopped));
    assert_eq!(blerelay::TeardownReport::default(), central.shutdown().await);
}

#[tokio::test]
async fn concurrent_shutdowns_release_listeners_once() {
    let radio = manual_radio();
    let central = activate(&radio).await;
    let other = central.clone();

    let (first, second) = tokio::join!(central.shutdown(), other.shutdown());

    assert_eq!(EventKind::iter().len(), first.released() + second.released());
    assert!(first.released() == 0 || second.released() == 0);
    assert_eq!(0, radio.active_listeners());
}

#[tokio::test]
async fn shutdown_reports_listener_release_failure() {
    let radio = manual_radio();
    let central = activate(&radio).await;
    radio.fail_release(EventKind::ValueUpdated);

    let report = central.shutdown().await;

    assert_eq!(EventKind::iter().len() - 1, report.released());
    assert_eq!(1, report.failures().len());
    assert_eq!(EventKind::ValueUpdated, report.failures()[0].kind);
}

#[tokio::test]
async fn waiters_observe_shutdown() {
    let radio = manual_radio();
    let central = activate(&radio).await;
    let id = discover(&radio, &central, "AA:BB").await;
    let waiter = central.clone();

    let waiting = tokio::spawn(async move {
        waiter
            .wait_for_state(&id, ConnectionState::is_connected)
            .await
    });
    central.shutdown().await;

    assert_matches!(
        settled(waiting).await.expect("waiter should not panic"),
        Err(CentralError::Stopped)
    );
}

#[tokio::test]
async fn dropping_every_handle_tears_down() {
    let radio = manual_radio();
    let central = activate(&radio).await;
    assert_eq!(EventKind::iter().len(), radio.active_listeners());

    drop(central);

    settled(async {
        while radio.active_listeners() > 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn revision_increases_on_every_mutation() {
    let radio = manual_radio();
    let central = activate(&radio).await;
    let changes = central.changes();
    let before = changes.borrow().revision();

    discover(&radio, &central, "AA:BB").await;
    let after_discovery = central.changes().borrow().revision();
    central.connect("AA:BB").await.expect("connect should be accepted");
    let after_connect = central.changes().borrow().revision();

    assert!(after_discovery > before);
    assert!(after_connect > after_discovery);
}
