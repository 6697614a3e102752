use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use super::peripheral::PeripheralId;
use crate::error::CentralError;

/// Lower-cased service UUID.
#[derive(Debug, Clone, Eq, PartialEq, Hash, derive_more::Display, Serialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    #[must_use]
    pub fn new(value: &str) -> Self {
        Self(value.to_ascii_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServiceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lower-cased characteristic UUID.
#[derive(Debug, Clone, Eq, PartialEq, Hash, derive_more::Display, Serialize)]
#[serde(transparent)]
pub struct CharacteristicId(String);

impl CharacteristicId {
    #[must_use]
    pub fn new(value: &str) -> Self {
        Self(value.to_ascii_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CharacteristicId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identity of one notifiable characteristic on one peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Hash, derive_more::Display, Serialize)]
#[display("{peripheral}/{service}/{characteristic}")]
pub struct CharacteristicKey {
    pub peripheral: PeripheralId,
    pub service: ServiceId,
    pub characteristic: CharacteristicId,
}

impl CharacteristicKey {
    #[must_use]
    pub fn new(
        peripheral: impl Into<PeripheralId>,
        service: impl Into<ServiceId>,
        characteristic: impl Into<CharacteristicId>,
    ) -> Self {
        Self {
            peripheral: peripheral.into(),
            service: service.into(),
            characteristic: characteristic.into(),
        }
    }
}

/// Opaque caller token echoed back with every delivered notification.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Default, derive_more::Display, derive_more::From, Serialize,
)]
#[serde(transparent)]
pub struct CorrelationToken(u64);

/// A value update delivered to an observer.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Notification {
    pub key: CharacteristicKey,
    pub token: CorrelationToken,
    #[serde(with = "hex::serde")]
    pub value: Vec<u8>,
}

/// Receiver of characteristic notifications.
#[derive(Clone)]
pub struct Observer {
    notify: Arc<dyn Fn(&Notification) + Send + Sync>,
}

impl Observer {
    /// Wraps a callback invoked on the central task for every notification.
    pub fn from_fn<F>(notify: F) -> Self
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        Self {
            notify: Arc::new(notify),
        }
    }

    /// Forwards notifications into an unbounded channel.
    #[must_use]
    pub fn channel(sender: mpsc::UnboundedSender<Notification>) -> Self {
        Self::from_fn(move |notification| {
            let _ = sender.send(notification.clone());
        })
    }

    fn notify(&self, notification: &Notification) {
        (self.notify)(notification);
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").finish_non_exhaustive()
    }
}

/// Public description of an active subscription.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub key: CharacteristicKey,
    pub token: CorrelationToken,
}

#[derive(Debug)]
struct Subscription {
    key: CharacteristicKey,
    token: CorrelationToken,
    observer: Observer,
}

/// Active notification subscriptions in registration order.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionTable {
    entries: Vec<Subscription>,
}

impl SubscriptionTable {
    pub(crate) fn is_active(&self, key: &CharacteristicKey) -> bool {
        self.entries.iter().any(|entry| &entry.key == key)
    }

    pub(crate) fn insert(
        &mut self,
        key: CharacteristicKey,
        token: CorrelationToken,
        observer: Observer,
    ) -> Result<(), CentralError> {
        if self.is_active(&key) {
            return Err(CentralError::AlreadySubscribed { key });
        }
        self.entries.push(Subscription {
            key,
            token,
            observer,
        });
        Ok(())
    }

    /// Removes the subscription for `key`, returning whether one existed.
    pub(crate) fn remove(&mut self, key: &CharacteristicKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| &entry.key != key);
        self.entries.len() != before
    }

    /// Drops every subscription of a peripheral and returns the removed keys.
    pub(crate) fn invalidate_peripheral(&mut self, id: &PeripheralId) -> Vec<CharacteristicKey> {
        let mut removed = Vec::new();
        self.entries.retain(|entry| {
            if &entry.key.peripheral == id {
                removed.push(entry.key.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Delivers a value to every observer registered for `key`, in order.
    pub(crate) fn deliver(&self, key: &CharacteristicKey, value: &[u8]) -> usize {
        let mut delivered = 0usize;
        for entry in self.entries.iter().filter(|entry| &entry.key == key) {
            let notification = Notification {
                key: entry.key.clone(),
                token: entry.token,
                value: value.to_vec(),
            };
            entry.observer.notify(&notification);
            delivered += 1;
        }
        delivered
    }

    pub(crate) fn infos(&self) -> Arc<[SubscriptionInfo]> {
        self.entries
            .iter()
            .map(|entry| SubscriptionInfo {
                key: entry.key.clone(),
                token: entry.token,
            })
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
