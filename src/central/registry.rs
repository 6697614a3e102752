use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::peripheral::{ConnectionState, Peripheral, PeripheralFields, PeripheralId};

/// Predicate applied when taking a registry snapshot.
#[derive(Clone, Default)]
pub enum SnapshotFilter {
    #[default]
    All,
    Connected,
    NotConnected,
    State(ConnectionState),
    Custom(Arc<dyn Fn(&Peripheral) -> bool + Send + Sync>),
}

impl SnapshotFilter {
    /// Builds a filter from an arbitrary predicate.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Peripheral) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    #[must_use]
    pub fn matches(&self, peripheral: &Peripheral) -> bool {
        match self {
            Self::All => true,
            Self::Connected => peripheral.is_connected(),
            Self::NotConnected => !peripheral.is_connected(),
            Self::State(state) => peripheral.state() == *state,
            Self::Custom(predicate) => predicate(peripheral),
        }
    }
}

impl fmt::Debug for SnapshotFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::Connected => write!(f, "Connected"),
            Self::NotConnected => write!(f, "NotConnected"),
            Self::State(state) => f.debug_tuple("State").field(state).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Immutable, insertion-ordered view of the registry.
///
/// Filtering happens lazily on each call to [`Snapshot::iter`], which may be
/// called any number of times; later registry mutations are never observed.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: Arc<[Peripheral]>,
    filter: SnapshotFilter,
}

impl Snapshot {
    pub(crate) fn new(entries: Arc<[Peripheral]>, filter: SnapshotFilter) -> Self {
        Self { entries, filter }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peripheral> + '_ {
        self.entries
            .iter()
            .filter(|peripheral| self.filter.matches(peripheral))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Peripheral> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Peripheral;
    type IntoIter = Box<dyn Iterator<Item = &'a Peripheral> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Insertion-ordered store of known peripherals keyed by hardware identifier.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Peripheral>,
    index: HashMap<PeripheralId, usize>,
    shared: Option<Arc<[Peripheral]>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new `Discovered` entry or merges scan fields into an existing
    /// one. Connection state is never touched.
    pub fn upsert(&mut self, id: PeripheralId, fields: PeripheralFields) -> Peripheral {
        self.shared = None;
        if let Some(&position) = self.index.get(&id) {
            let entry = &mut self.entries[position];
            entry.merge(fields);
            return entry.clone();
        }

        let entry = Peripheral::discovered(id.clone(), fields);
        self.index.insert(id, self.entries.len());
        self.entries.push(entry.clone());
        entry
    }

    #[must_use]
    pub fn get(&self, id: &PeripheralId) -> Option<&Peripheral> {
        self.index
            .get(id)
            .and_then(|position| self.entries.get(*position))
    }

    /// Returns a copy-on-read snapshot filtered by `filter`.
    #[must_use]
    pub fn snapshot(&mut self, filter: SnapshotFilter) -> Snapshot {
        Snapshot::new(self.shared(), filter)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets the connection state, returning the previous one.
    pub(crate) fn set_state(
        &mut self,
        id: &PeripheralId,
        state: ConnectionState,
    ) -> Option<ConnectionState> {
        let position = *self.index.get(id)?;
        let entry = self.entries.get_mut(position)?;
        let previous = entry.state();
        entry.set_state(state);
        self.shared = None;
        Some(previous)
    }

    /// Shared copy of all entries, rebuilt only after a mutation.
    pub(crate) fn shared(&mut self) -> Arc<[Peripheral]> {
        match &self.shared {
            Some(shared) => Arc::clone(shared),
            None => {
                let shared: Arc<[Peripheral]> = self.entries.clone().into();
                self.shared = Some(Arc::clone(&shared));
                shared
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.shared = None;
    }
}
