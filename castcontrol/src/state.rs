//! Device lifecycle state machine.
//!
//! All lifecycle mutations funnel through [`transition`], which encodes the
//! legal moves as an explicit table. An illegal (state, event) pair is
//! rejected and logged, and the caller keeps the current state; nothing
//! panics on out-of-order network events.

use thiserror::Error;
use tracing::warn;

use crate::model::DeviceLifecycleState as S;

/// Inputs that move a device through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// SSDP search response or alive NOTIFY seen.
    Advertised,
    /// Description document fetched and parsed.
    DescriptionValidated,
    /// A control session was opened on the device.
    SessionOpened,
    /// Periodic poll succeeded while connected.
    Heartbeat,
    /// ssdp:byebye received.
    ByeBye,
    /// Advertisement max-age or poll silence ran out.
    Expired,
    /// Consecutive action failures exhausted the circuit breaker.
    FatalError,
    /// Host asked to forget the device.
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal lifecycle transition: {from} on {event:?}")]
pub struct IllegalTransition {
    pub from: S,
    pub event: LifecycleEvent,
}

/// Compute the successor state for an event.
///
/// `Connected` + `Heartbeat` is the only self-transition; `Removed` is
/// terminal.
pub fn transition(current: S, event: LifecycleEvent) -> Result<S, IllegalTransition> {
    use LifecycleEvent as E;

    let next = match (current, event) {
        (S::Unknown, E::Advertised) => S::Discovered,
        (S::Discovered, E::DescriptionValidated) => S::Validated,
        (S::Validated, E::SessionOpened) => S::Connected,

        // Heartbeat keeps a connected device connected; the sole no-op.
        (S::Connected, E::Heartbeat) => S::Connected,

        // Departure, graceful or silent.
        (S::Discovered, E::ByeBye | E::Expired)
        | (S::Validated, E::ByeBye | E::Expired)
        | (S::Connected, E::ByeBye | E::Expired) => S::Lost,

        // A lost or errored device comes back through rediscovery.
        (S::Lost, E::Advertised) | (S::Error, E::Advertised) => S::Discovered,

        (S::Validated, E::FatalError) | (S::Connected, E::FatalError) => S::Error,

        (
            S::Unknown | S::Discovered | S::Validated | S::Connected | S::Lost | S::Error,
            E::Remove,
        ) => S::Removed,

        (from, event) => {
            warn!(%from, ?event, "illegal lifecycle transition rejected");
            return Err(IllegalTransition { from, event });
        }
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [S; 7] = [
        S::Unknown,
        S::Discovered,
        S::Validated,
        S::Connected,
        S::Lost,
        S::Error,
        S::Removed,
    ];

    const ALL_EVENTS: [LifecycleEvent; 8] = [
        LifecycleEvent::Advertised,
        LifecycleEvent::DescriptionValidated,
        LifecycleEvent::SessionOpened,
        LifecycleEvent::Heartbeat,
        LifecycleEvent::ByeBye,
        LifecycleEvent::Expired,
        LifecycleEvent::FatalError,
        LifecycleEvent::Remove,
    ];

    #[test]
    fn happy_path_to_connected() {
        let s = transition(S::Unknown, LifecycleEvent::Advertised).unwrap();
        let s = transition(s, LifecycleEvent::DescriptionValidated).unwrap();
        let s = transition(s, LifecycleEvent::SessionOpened).unwrap();
        assert_eq!(s, S::Connected);
        assert_eq!(transition(s, LifecycleEvent::Heartbeat).unwrap(), S::Connected);
    }

    #[test]
    fn heartbeat_is_the_only_self_transition() {
        for state in ALL_STATES {
            for event in ALL_EVENTS {
                if let Ok(next) = transition(state, event) {
                    if next == state {
                        assert_eq!(state, S::Connected);
                        assert_eq!(event, LifecycleEvent::Heartbeat);
                    }
                }
            }
        }
    }

    #[test]
    fn removed_is_terminal() {
        for event in ALL_EVENTS {
            assert!(transition(S::Removed, event).is_err());
        }
    }

    #[test]
    fn illegal_transitions_return_err_and_identify_themselves() {
        let err = transition(S::Unknown, LifecycleEvent::SessionOpened).unwrap_err();
        assert_eq!(err.from, S::Unknown);
        assert_eq!(err.event, LifecycleEvent::SessionOpened);

        // Skipping validation is not allowed.
        assert!(transition(S::Discovered, LifecycleEvent::SessionOpened).is_err());
        // A lost device must be rediscovered before reconnecting.
        assert!(transition(S::Lost, LifecycleEvent::SessionOpened).is_err());
    }

    #[test]
    fn lost_and_error_recover_through_rediscovery() {
        assert_eq!(transition(S::Lost, LifecycleEvent::Advertised).unwrap(), S::Discovered);
        assert_eq!(transition(S::Error, LifecycleEvent::Advertised).unwrap(), S::Discovered);
    }

    #[test]
    fn every_live_state_can_be_removed() {
        for state in ALL_STATES {
            if state != S::Removed {
                assert_eq!(transition(state, LifecycleEvent::Remove).unwrap(), S::Removed);
            }
        }
    }
}
