//! Device connection lifecycle as an explicit state machine.
//!
//! ```text
//! Idle ──► Provisioning ──► Connecting ──► Connected
//!   │            ▲   │          │  │           │
//!   └────────────┼───┼──────────┘  │           │
//!                │   ▼             ▼           ▼
//!                └── Disconnected ◄────────────┘
//! ```
//!
//! `Connecting → Provisioning` is the hub failover edge.

use serde::Serialize;

use crate::error::DeviceError;

/// Where a device is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created, never connected.
    #[default]
    Idle,
    /// Waiting for the provisioning service to assign a hub.
    Provisioning,
    /// Opening a transport session.
    Connecting,
    /// A session is open.
    Connected,
    /// The last connect failed, or the session was closed.
    Disconnected,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Idle, Provisioning};

        matches!(
            (self, next),
            (Idle | Disconnected, Provisioning | Connecting)
                | (Provisioning, Connecting | Disconnected)
                | (Connecting, Connected | Disconnected | Provisioning)
                | (Connected, Disconnected)
        )
    }

    /// Move to `next`, rejecting illegal transitions.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::IllegalTransition`] when `next` is not reachable
    /// from the current state; the state is left unchanged.
    pub fn transition(&mut self, next: Self) -> Result<(), DeviceError> {
        if !self.can_transition_to(next) {
            return Err(DeviceError::IllegalTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    /// A connect attempt owns the device while it is provisioning or connecting.
    #[must_use]
    pub fn is_connecting(self) -> bool {
        matches!(self, Self::Provisioning | Self::Connecting)
    }

    /// Whether a session is open.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}
