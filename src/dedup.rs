//! Suppression of duplicate state emissions.
//!
//! The notification path and the poll path share one [`Deduplicator`], so
//! whichever path observes a change first is the only one to report it.

use crate::state::{CanonicalPlaybackState, DedupKey};

/// Fingerprint of something that was emitted: either no playback at all,
/// or a canonical state.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
enum Fingerprint {
    Inactive,
    Active(DedupKey),
}

impl From<Option<&CanonicalPlaybackState>> for Fingerprint {
    fn from(state: Option<&CanonicalPlaybackState>) -> Self {
        state.map_or(Self::Inactive, |state| {
            Self::Active(state.dedup_key())
        })
    }
}

/// Remembers the fingerprint of the last *emitted* state.
#[derive(Clone, Debug, Default)]
pub struct Deduplicator {
    last_emitted: Option<Fingerprint>,
}

impl Deduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `candidate` differs observably from the last emitted state.
    #[must_use]
    pub fn should_emit(&self, candidate: Option<&CanonicalPlaybackState>) -> bool {
        self.last_emitted.as_ref() != Some(&Fingerprint::from(candidate))
    }

    /// Records `candidate` as emitted.
    pub fn record(&mut self, candidate: Option<&CanonicalPlaybackState>) {
        self.last_emitted = Some(Fingerprint::from(candidate));
    }

    /// Forgets the last emitted state.
    pub fn reset(&mut self) {
        self.last_emitted = None;
    }
}
