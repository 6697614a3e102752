use serde::Serialize;

use super::peripheral::ConnectionState;

/// Caller-issued connection commands.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum ConnectionCommand {
    Connect,
    Disconnect,
}

/// Link events reported by the radio.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum LinkEvent {
    Established,
    Failed,
    Lost,
}

/// Result of a connect or disconnect command that was accepted by the central.
///
/// Only [`CommandOutcome::Accepted`] invoked the radio; the others are benign
/// no-ops. Acceptance confirms the request, never the final state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Accepted,
    AlreadyConnected,
    AlreadyDisconnected,
    InFlight,
}

/// What the central must do for a command.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum CommandStep {
    /// Move to the transitional state, then invoke the radio primitive.
    Begin(ConnectionState),
    Skip(CommandOutcome),
}

pub(crate) fn on_command(state: ConnectionState, command: ConnectionCommand) -> CommandStep {
    use ConnectionState::{Connected, Connecting, Disconnected, Disconnecting, Discovered, Failed};

    match (command, state) {
        (ConnectionCommand::Connect, Discovered | Disconnected | Failed) => {
            CommandStep::Begin(Connecting)
        }
        (ConnectionCommand::Connect, Connected) => {
            CommandStep::Skip(CommandOutcome::AlreadyConnected)
        }
        (ConnectionCommand::Disconnect, Connected) => CommandStep::Begin(Disconnecting),
        (ConnectionCommand::Disconnect, Discovered | Disconnected | Failed) => {
            CommandStep::Skip(CommandOutcome::AlreadyDisconnected)
        }
        // The radio has no cancellation primitive, so nothing interrupts an
        // operation in flight.
        (_, Connecting | Disconnecting) => CommandStep::Skip(CommandOutcome::InFlight),
    }
}

/// Returns the next state for a link event, or `None` when the event is stale.
pub(crate) fn on_link_event(state: ConnectionState, event: LinkEvent) -> Option<ConnectionState> {
    use ConnectionState::{Connected, Connecting, Disconnected, Disconnecting, Discovered, Failed};

    match (event, state) {
        (LinkEvent::Established, Connecting | Discovered | Disconnected | Failed) => {
            Some(Connected)
        }
        (LinkEvent::Established, Connected | Disconnecting) => None,
        (LinkEvent::Failed, Connecting) => Some(Failed),
        (LinkEvent::Failed, _) => None,
        (LinkEvent::Lost, Disconnecting | Connected) => Some(Disconnected),
        (LinkEvent::Lost, Connecting) => Some(Failed),
        (LinkEvent::Lost, Discovered | Disconnected | Failed) => None,
    }
}
