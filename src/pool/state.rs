//! Pool lifecycle states and the legal transitions between them.
use std::fmt;

/// The lifecycle state of a connection pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolState {
    Disconnected,
    Connecting,
    Connected,
    Destroying,
    Destroyed,
}

impl PoolState {
    /// Returns whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: PoolState) -> bool {
        use self::PoolState::*;

        match self {
            Disconnected => match next {
                Disconnected | Connecting | Destroying => true,
                _ => false,
            },
            Connecting => match next {
                Connecting | Connected | Disconnected | Destroying => true,
                _ => false,
            },
            Connected => match next {
                Connected | Disconnected | Destroying => true,
                _ => false,
            },
            Destroying => match next {
                Destroying | Destroyed => true,
                _ => false,
            },
            Destroyed => next == Destroyed,
        }
    }

    /// Destroying or destroyed.
    pub fn is_terminal(self) -> bool {
        self == PoolState::Destroying || self == PoolState::Destroyed
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            PoolState::Disconnected => "disconnected",
            PoolState::Connecting => "connecting",
            PoolState::Connected => "connected",
            PoolState::Destroying => "destroying",
            PoolState::Destroyed => "destroyed",
        })
    }
}
