use std::sync::Arc;

use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{debug, instrument, warn};

use crate::error::TransportError;
use crate::radio::{EventKind, EventSink, ListenerId, RadioTransport};

/// One listener that could not be released during teardown.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ListenerReleaseFailure {
    pub kind: EventKind,
    pub listener: ListenerId,
    pub message: String,
}

/// Outcome of releasing the listener group.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct TeardownReport {
    released: usize,
    failures: Vec<ListenerReleaseFailure>,
}

impl TeardownReport {
    #[must_use]
    pub fn released(&self) -> usize {
        self.released
    }

    #[must_use]
    pub fn failures(&self) -> &[ListenerReleaseFailure] {
        &self.failures
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Radio listeners acquired together at activation and released as a group.
#[derive(Debug)]
pub(crate) struct ListenerGroup {
    transport: Arc<dyn RadioTransport>,
    listeners: Vec<(EventKind, ListenerId)>,
}

impl ListenerGroup {
    /// Registers one listener per event kind. If any registration fails, the
    /// listeners acquired so far are released before returning the error.
    #[instrument(skip_all, level = "debug")]
    pub(crate) fn acquire(
        transport: Arc<dyn RadioTransport>,
        sink: &EventSink,
    ) -> Result<Self, TransportError> {
        let mut group = Self {
            transport,
            listeners: Vec::with_capacity(EventKind::iter().len()),
        };

        for kind in EventKind::iter() {
            match group.transport.add_listener(kind, sink.clone()) {
                Ok(listener) => {
                    debug!(%kind, %listener, "radio listener acquired");
                    group.listeners.push((kind, listener));
                }
                Err(error) => {
                    warn!(%kind, ?error, "failed to acquire radio listener; rolling back");
                    let report = group.release_all();
                    debug!(released = report.released(), "rolled back partial listener group");
                    return Err(error);
                }
            }
        }

        Ok(group)
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Attempts to release every remaining listener. Failures are logged and
    /// collected; they never stop the remaining releases. Calling this again
    /// after a full release is a no-op.
    #[instrument(skip(self), level = "debug", fields(listeners = self.listeners.len()))]
    pub(crate) fn release_all(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        for (kind, listener) in self.listeners.drain(..) {
            match self.transport.remove_listener(listener) {
                Ok(()) => report.released += 1,
                Err(error) => {
                    warn!(%kind, %listener, ?error, "failed to release radio listener");
                    report.failures.push(ListenerReleaseFailure {
                        kind,
                        listener,
                        message: error.to_string(),
                    });
                }
            }
        }
        report
    }
}

impl Drop for ListenerGroup {
    fn drop(&mut self) {
        if !self.listeners.is_empty() {
            let _report = self.release_all();
        }
    }
}
