use serde::Serialize;
use serde_with::SerializeDisplay;
use time::OffsetDateTime;

/// Stable hardware identifier of a peripheral.
#[derive(
    Debug,
    Clone,
    Eq,
    PartialEq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
    Serialize,
)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Connection lifecycle state of one peripheral.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display, SerializeDisplay)]
pub enum ConnectionState {
    #[display("discovered")]
    Discovered,
    #[display("connecting")]
    Connecting,
    #[display("connected")]
    Connected,
    #[display("disconnecting")]
    Disconnecting,
    #[display("disconnected")]
    Disconnected,
    #[display("failed")]
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns whether a radio operation is in flight for the peripheral.
    #[must_use]
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    /// States in which no subscription may stay active.
    pub(crate) fn invalidates_subscriptions(self) -> bool {
        matches!(self, Self::Disconnecting | Self::Disconnected | Self::Failed)
    }
}

/// Scan-derived attributes merged into the registry on every sighting.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PeripheralFields {
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub seen_at: OffsetDateTime,
}

impl PeripheralFields {
    #[must_use]
    pub fn new(local_name: Option<String>, rssi: Option<i16>, seen_at: OffsetDateTime) -> Self {
        Self {
            local_name,
            rssi,
            seen_at,
        }
    }
}

/// A known peripheral as recorded in the registry.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Peripheral {
    id: PeripheralId,
    local_name: Option<String>,
    rssi: Option<i16>,
    state: ConnectionState,
    #[serde(with = "time::serde::rfc3339")]
    last_seen: OffsetDateTime,
}

impl Peripheral {
    pub(crate) fn discovered(id: PeripheralId, fields: PeripheralFields) -> Self {
        Self {
            id,
            local_name: fields.local_name,
            rssi: fields.rssi,
            state: ConnectionState::Discovered,
            last_seen: fields.seen_at,
        }
    }

    /// Merges a new sighting; a sighting without a name keeps the known name.
    pub(crate) fn merge(&mut self, fields: PeripheralFields) {
        if fields.local_name.is_some() {
            self.local_name = fields.local_name;
        }
        if fields.rssi.is_some() {
            self.rssi = fields.rssi;
        }
        self.last_seen = fields.seen_at;
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    #[must_use]
    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn last_seen(&self) -> OffsetDateTime {
        self.last_seen
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn merge_keeps_known_name_when_sighting_is_anonymous() {
        let mut peripheral = Peripheral::discovered(
            "AA:BB".into(),
            PeripheralFields::new(
                Some("Sensor1".into()),
                Some(-60),
                datetime!(2026-01-01 10:00 UTC),
            ),
        );

        peripheral.merge(PeripheralFields::new(
            None,
            Some(-48),
            datetime!(2026-01-01 10:01 UTC),
        ));

        assert_eq!(Some("Sensor1"), peripheral.local_name());
        assert_eq!(Some(-48), peripheral.rssi());
        assert_eq!(datetime!(2026-01-01 10:01 UTC), peripheral.last_seen());
    }

    #[rstest]
    #[case(ConnectionState::Discovered, false)]
    #[case(ConnectionState::Connecting, false)]
    #[case(ConnectionState::Connected, false)]
    #[case(ConnectionState::Disconnecting, true)]
    #[case(ConnectionState::Disconnected, true)]
    #[case(ConnectionState::Failed, true)]
    fn invalidating_states(#[case] state: ConnectionState, #[case] expected: bool) {
        assert_eq!(expected, state.invalidates_subscriptions());
    }

    #[test]
    fn state_serialises_as_display_label() {
        let encoded = serde_json::to_string(&ConnectionState::Disconnecting)
            .expect("state should serialise");
        assert_eq!("\"disconnecting\"", encoded);
    }
}
