//! Notifications pushed by the playback client.
//!
//! The playback client delivers these on an unbounded channel handed to the
//! engine at construction. They can be used to:
//! * Track the readiness of the playback device
//! * Observe playback state changes as they happen
//! * Surface client failures to the host
//!
//! # Example
//!
//! ```rust
//! use playsync::events::ClientEvent;
//!
//! fn describe(event: &ClientEvent) -> &'static str {
//!     match event {
//!         ClientEvent::Ready { .. } => "device ready",
//!         ClientEvent::PlayerStateChanged(_) => "state changed",
//!         _ => "other event",
//!     }
//! }
//! ```

use crate::{bridge::ErrorCategory, client::NativeState};

/// Events that can be emitted by the playback client.
///
/// # Events
///
/// Events fall into three categories:
///
/// Lifecycle Events:
/// * [`Loaded`](Self::Loaded) - The client itself is available
/// * [`Ready`](Self::Ready) - The device can play
/// * [`NotReady`](Self::NotReady) - The device went offline
///
/// Playback Events:
/// * [`PlayerStateChanged`](Self::PlayerStateChanged) - Playback state changed
///
/// Error Events:
/// * [`InitializationError`](Self::InitializationError),
///   [`AuthenticationError`](Self::AuthenticationError) and
///   [`AccountError`](Self::AccountError) - fatal to the session
/// * [`PlaybackError`](Self::PlaybackError) - transient
#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum ClientEvent {
    /// The playback client has loaded and can create player instances.
    ///
    /// One of the two preconditions of a session; the other is a credential
    /// from the host.
    Loaded,

    /// The device has connected and is ready to play.
    Ready { device_id: String },

    /// The device has gone offline.
    NotReady { device_id: String },

    /// Playback state changed.
    ///
    /// `None` means the client no longer has an active playback session,
    /// for example after playback was transferred to another device.
    PlayerStateChanged(Option<NativeState>),

    /// The client failed to initialize, e.g. on an unsupported platform.
    InitializationError(String),

    /// The credential was rejected or expired.
    AuthenticationError(String),

    /// The account cannot be used for playback.
    AccountError(String),

    /// Some item could not be played.
    PlaybackError(String),
}

impl ClientEvent {
    /// Returns the error category and message of error events.
    #[must_use]
    pub fn as_error(&self) -> Option<(ErrorCategory, &str)> {
        match self {
            Self::InitializationError(message) => Some((ErrorCategory::Initialization, message)),
            Self::AuthenticationError(message) => Some((ErrorCategory::Authentication, message)),
            Self::AccountError(message) => Some((ErrorCategory::Account, message)),
            Self::PlaybackError(message) => Some((ErrorCategory::Playback, message)),
            _ => None,
        }
    }
}
