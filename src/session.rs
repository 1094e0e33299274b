//! Session lifecycle.
//!
//! A session exists once two independent preconditions are met, in either
//! order: the host supplied a credential, and the playback client signalled
//! that it has loaded. From there the session connects and follows the
//! device's readiness:
//!
//! ```text
//! Uninitialized -> AwaitingBoth -> Created -> Connecting -> Ready <-> NotReady
//!                                     ^                       |
//!                                     +---- (refused) --------+
//!
//! any live state -> Fatal    (initialization, authentication, account error)
//! any state      -> Disposed (terminal)
//! ```
//!
//! Whether the device is playing or paused is not engine state; it travels
//! inside the canonical playback state.

use std::fmt;

use crate::state::Volume;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    AwaitingBoth { credential: bool, client: bool },
    Created,
    Connecting,
    Ready,
    NotReady,
    Fatal,
    Disposed,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::AwaitingBoth { credential, client } => write!(
                f,
                "awaiting {}",
                match (credential, client) {
                    (false, false) => "credential and client",
                    (true, false) => "client",
                    (false, true) => "credential",
                    (true, true) => "nothing",
                }
            ),
            Self::Created => write!(f, "created"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
            Self::NotReady => write!(f, "not ready"),
            Self::Fatal => write!(f, "fatal"),
            Self::Disposed => write!(f, "disposed"),
        }
    }
}

/// The connected device and the engine's authoritative local memory of it.
#[derive(Clone, Debug)]
pub struct Session {
    lifecycle: Lifecycle,
    credential_supplied: bool,
    client_loaded: bool,

    device_id: Option<String>,

    /// The client does not reliably report volume back, so the last volume
    /// set through the engine is authoritative.
    cached_volume: Volume,
}

impl Session {
    #[must_use]
    pub fn new(initial_volume: Volume) -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            credential_supplied: false,
            client_loaded: false,
            device_id: None,
            cached_volume: initial_volume,
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Records that the host supplied a credential.
    ///
    /// Returns `true` if this created the session. A credential supplied
    /// to a live or failed session re-creates it, which is how the host
    /// re-authenticates.
    pub fn supply_credential(&mut self) -> bool {
        self.credential_supplied = true;
        if self.lifecycle == Lifecycle::Fatal || self.has_client() {
            self.device_id = None;
            self.transition(Lifecycle::AwaitingBoth {
                credential: true,
                client: self.client_loaded,
            });
        }
        self.advance()
    }

    /// Records that the playback client has loaded.
    ///
    /// Returns `true` if this created the session.
    pub fn client_loaded(&mut self) -> bool {
        self.client_loaded = true;
        self.advance()
    }

    /// Moves towards `Created` once both preconditions hold.
    fn advance(&mut self) -> bool {
        match self.lifecycle {
            Lifecycle::Uninitialized | Lifecycle::AwaitingBoth { .. } => {
                if self.credential_supplied && self.client_loaded {
                    self.transition(Lifecycle::Created);
                    true
                } else {
                    self.transition(Lifecycle::AwaitingBoth {
                        credential: self.credential_supplied,
                        client: self.client_loaded,
                    });
                    false
                }
            }
            _ => false,
        }
    }

    /// Marks a connection attempt. Returns `false` if there is nothing to
    /// connect, or the session is already connecting or connected.
    pub fn connecting(&mut self) -> bool {
        if self.lifecycle == Lifecycle::Created {
            self.transition(Lifecycle::Connecting);
            true
        } else {
            false
        }
    }

    /// Marks a refused connection attempt.
    pub fn connect_refused(&mut self) {
        if self.lifecycle == Lifecycle::Connecting {
            self.transition(Lifecycle::Created);
        }
    }

    /// Marks the device ready. Ignored unless a client instance exists.
    pub fn ready(&mut self, device_id: String) -> bool {
        if !self.has_client() {
            return false;
        }

        self.device_id = Some(device_id);
        self.transition(Lifecycle::Ready);
        true
    }

    /// Marks the device not ready. The device id is kept for diagnostics.
    pub fn not_ready(&mut self, device_id: String) -> bool {
        if !self.has_client() {
            return false;
        }

        self.device_id = Some(device_id);
        self.transition(Lifecycle::NotReady);
        true
    }

    /// Tears the session down after an unrecoverable client error.
    pub fn fail(&mut self) {
        if self.lifecycle != Lifecycle::Disposed {
            self.transition(Lifecycle::Fatal);
        }
    }

    pub fn dispose(&mut self) {
        self.transition(Lifecycle::Disposed);
    }

    /// Whether commands can be sent to the device.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lifecycle == Lifecycle::Ready && self.device_id.is_some()
    }

    /// Whether a client player instance exists.
    #[must_use]
    pub fn has_client(&self) -> bool {
        matches!(
            self.lifecycle,
            Lifecycle::Created | Lifecycle::Connecting | Lifecycle::Ready | Lifecycle::NotReady
        )
    }

    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    #[must_use]
    pub fn cached_volume(&self) -> Volume {
        self.cached_volume
    }

    pub fn set_cached_volume(&mut self, volume: Volume) {
        self.cached_volume = volume;
    }

    fn transition(&mut self, to: Lifecycle) {
        if self.lifecycle != to {
            info!("session {} -> {to}", self.lifecycle);
            self.lifecycle = to;
        }
    }
}
