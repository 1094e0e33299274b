//! Outbound messages and the single funnel that carries them to the host.
//!
//! Both the notification path and the poll path, as well as lifecycle
//! changes, end up in one [`Bridge`]. Messages are forwarded in submission
//! order; once the bridge is closed nothing further reaches the host.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::state::CanonicalPlaybackState;

/// Messages sent from the engine to the host.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    Ready { device_id: String },

    #[serde(rename_all = "camelCase")]
    NotReady { device_id: String },

    /// `None` when the client reports no active playback session.
    State {
        state: Option<CanonicalPlaybackState>,
    },

    Error {
        category: ErrorCategory,
        message: String,
    },
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready { device_id } => write!(f, "ready {device_id}"),
            Self::NotReady { device_id } => write!(f, "not ready {device_id}"),
            Self::State { state: Some(state) } => write!(f, "state {state}"),
            Self::State { state: None } => write!(f, "state <none>"),
            Self::Error { category, message } => write!(f, "{category} error: {message}"),
        }
    }
}

/// Categories of errors reported to the host.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    Initialization,
    Authentication,
    Account,
    Playback,
}

impl ErrorCategory {
    /// Whether errors of this category end the session.
    ///
    /// Only playback errors are transient.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        !matches!(self, Self::Playback)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialization => write!(f, "initialization"),
            Self::Authentication => write!(f, "authentication"),
            Self::Account => write!(f, "account"),
            Self::Playback => write!(f, "playback"),
        }
    }
}

/// The funnel from the engine to the host.
#[derive(Debug)]
pub struct Bridge {
    tx: mpsc::UnboundedSender<Message>,
    closed: bool,
}

impl Bridge {
    /// Creates a bridge and the receiving end the host reads from.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, closed: false }, rx)
    }

    /// Forwards a message to the host.
    ///
    /// Messages submitted after [`close`](Self::close), or after the host
    /// dropped its receiver, are discarded.
    pub fn send(&mut self, message: Message) {
        if self.closed {
            trace!("bridge closed, discarding {message}");
            return;
        }

        debug!("-> {message}");
        if self.tx.send(message).is_err() {
            warn!("host stopped listening, closing bridge");
            self.closed = true;
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}
