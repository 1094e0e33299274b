//! Unblocking of audio output.
//!
//! Platforms may refuse to start audio until a media element was activated
//! in response to a user gesture. The [`AudioGate`] activates the element
//! once per engine, the first time anything might produce audio: at the
//! start of every audio-producing command, and whenever polling observes
//! that playback was resumed from elsewhere.

use crate::client::PlaybackClient;

#[derive(Clone, Debug, Default)]
pub struct AudioGate {
    unblocked: bool,
    requests: usize,
}

impl AudioGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures audio output is unblocked.
    ///
    /// Idempotent: the client is only asked to activate its media element
    /// until that succeeds once. A failed activation is logged and retried
    /// on the next request; it never fails the caller.
    pub fn ensure_unblocked<C>(&mut self, client: &mut C)
    where
        C: PlaybackClient,
    {
        self.requests += 1;
        if self.unblocked {
            return;
        }

        match client.activate_element() {
            Ok(()) => {
                debug!("audio output unblocked");
                self.unblocked = true;
            }
            Err(e) => error!("failed to unblock audio output: {e}"),
        }
    }

    #[must_use]
    pub fn is_unblocked(&self) -> bool {
        self.unblocked
    }

    /// Number of times unblocking was requested.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests
    }
}
