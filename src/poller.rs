//! Detection of playback changes made outside this engine.
//!
//! Another device, or the account holder's phone, can control playback on
//! the same account. Such changes do not always produce a notification, and
//! those that do may be swallowed by throttling or deduplication. The engine
//! therefore samples the client on a fixed interval and compares each sample
//! with the previous one.
//!
//! The [`Poller`] keeps its own record of the last *observed* sample. This is
//! intentionally independent of what was last *emitted*, which the
//! [`Deduplicator`](crate::dedup::Deduplicator) tracks.

use std::time::Duration;

use crate::client::NativeState;

/// The part of a sample the poller compares.
///
/// The default observation is that of a client without an active playback
/// session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Observation {
    pub track_id: Option<String>,
    pub paused: Option<bool>,
    pub position_ms: u64,
}

impl Observation {
    /// Whether the client had a playback session at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.paused.is_some()
    }
}

impl From<Option<&NativeState>> for Observation {
    fn from(native: Option<&NativeState>) -> Self {
        native.map(Self::from).unwrap_or_default()
    }
}

impl From<&NativeState> for Observation {
    fn from(native: &NativeState) -> Self {
        Self {
            track_id: native.track_id().map(ToOwned::to_owned),
            paused: Some(native.paused),
            position_ms: native.position,
        }
    }
}

/// Outcome of comparing two consecutive samples.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Discrepancy {
    /// The previous track was known and differs from the current one.
    pub track_changed: bool,

    /// The previous pause flag was known and differs from the current one.
    pub paused_changed: bool,

    /// The position moved further than playback could explain.
    pub position_jump: bool,

    /// A playback session appeared or went away, e.g. when playback was
    /// transferred to or from another device.
    pub activity_changed: bool,

    /// Playback went from paused to playing.
    pub resumed: bool,
}

impl Discrepancy {
    /// Whether something other than this engine changed playback.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.track_changed || self.paused_changed || self.position_jump || self.activity_changed
    }
}

#[derive(Clone, Debug)]
pub struct Poller {
    last: Observation,
    observed: bool,
    jump_threshold: Duration,
}

impl Poller {
    #[must_use]
    pub fn new(jump_threshold: Duration) -> Self {
        Self {
            last: Observation::default(),
            observed: false,
            jump_threshold,
        }
    }

    /// Compares `current` with the previous observation and then records it.
    ///
    /// The record is updated on every call, whether or not the caller ends
    /// up emitting anything.
    pub fn observe(&mut self, current: Observation) -> Discrepancy {
        let previous = std::mem::replace(&mut self.last, current);
        let current = &self.last;
        let observed = std::mem::replace(&mut self.observed, true);

        let track_changed = previous.track_id.is_some() && previous.track_id != current.track_id;

        let paused_changed = previous
            .paused
            .is_some_and(|paused| Some(paused) != current.paused);

        let threshold = u64::try_from(self.jump_threshold.as_millis()).unwrap_or(u64::MAX);
        let position_jump = previous.position_ms > 0
            && current.position_ms.abs_diff(previous.position_ms) > threshold;

        let activity_changed = observed && previous.is_active() != current.is_active();

        let resumed = previous.paused == Some(true) && current.paused == Some(false);

        Discrepancy {
            track_changed,
            paused_changed,
            position_jump,
            activity_changed,
            resumed,
        }
    }

    /// Returns the last observation.
    #[must_use]
    pub fn last(&self) -> &Observation {
        &self.last
    }

    /// Forgets the last observation, e.g. when a new session starts.
    pub fn reset(&mut self) {
        self.last = Observation::default();
        self.observed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JUMP: Duration = Duration::from_millis(5000);

    fn sample(track_id: &str, paused: bool, position_ms: u64) -> Observation {
        Observation {
            track_id: Some(track_id.to_owned()),
            paused: Some(paused),
            position_ms,
        }
    }

    #[test]
    fn first_sample_is_not_external() {
        let mut poller = Poller::new(JUMP);
        let discrepancy = poller.observe(sample("a", false, 60_000));
        assert!(!discrepancy.is_external());
        assert_eq!(poller.last(), &sample("a", false, 60_000));
    }

    #[test]
    fn track_change_is_external() {
        let mut poller = Poller::new(JUMP);
        poller.observe(sample("a", false, 1_000));

        let discrepancy = poller.observe(sample("b", false, 1_000));
        assert!(discrepancy.track_changed);
        assert!(discrepancy.is_external());
    }

    #[test]
    fn large_position_jump_is_external() {
        let mut poller = Poller::new(JUMP);
        poller.observe(sample("a", false, 10_000));

        let discrepancy = poller.observe(sample("a", false, 15_001));
        assert!(discrepancy.position_jump);
        assert!(discrepancy.is_external());

        // Backwards too.
        let discrepancy = poller.observe(sample("a", false, 2_000));
        assert!(discrepancy.position_jump);
    }

    #[test]
    fn normal_progression_is_not_external() {
        let mut poller = Poller::new(JUMP);
        poller.observe(sample("a", false, 10_000));

        assert!(!poller.observe(sample("a", false, 11_000)).is_external());
        assert!(!poller.observe(sample("a", false, 16_000)).is_external());
    }

    #[test]
    fn jump_from_start_is_not_external() {
        let mut poller = Poller::new(JUMP);
        poller.observe(sample("a", false, 0));
        assert!(!poller.observe(sample("a", false, 90_000)).is_external());
    }

    #[test]
    fn resume_is_flagged_once() {
        let mut poller = Poller::new(JUMP);
        poller.observe(sample("a", true, 1_000));

        let discrepancy = poller.observe(sample("a", false, 1_000));
        assert!(discrepancy.paused_changed);
        assert!(discrepancy.resumed);

        let discrepancy = poller.observe(sample("a", false, 2_000));
        assert!(!discrepancy.resumed);
        assert!(!discrepancy.is_external());
    }

    #[test]
    fn pause_is_external_but_not_resume() {
        let mut poller = Poller::new(JUMP);
        poller.observe(sample("a", false, 1_000));

        let discrepancy = poller.observe(sample("a", true, 1_000));
        assert!(discrepancy.paused_changed);
        assert!(!discrepancy.resumed);
    }

    #[test]
    fn session_going_away_is_external() {
        let mut poller = Poller::new(JUMP);
        poller.observe(sample("a", true, 30_000));

        let discrepancy = poller.observe(Observation::default());
        assert!(discrepancy.track_changed);
        assert!(discrepancy.activity_changed);
        assert!(!discrepancy.resumed);
        assert!(discrepancy.is_external());

        // Still gone.
        assert!(!poller.observe(Observation::default()).is_external());
    }

    #[test]
    fn session_coming_back_is_external() {
        let mut poller = Poller::new(JUMP);
        assert!(!poller.observe(Observation::default()).is_external());

        let discrepancy = poller.observe(sample("a", false, 1_000));
        assert!(!discrepancy.track_changed);
        assert!(discrepancy.activity_changed);
        assert!(discrepancy.is_external());
    }

    #[test]
    fn reset_forgets_first_sample() {
        let mut poller = Poller::new(JUMP);
        poller.observe(Observation::default());
        poller.reset();
        assert!(!poller.observe(sample("a", false, 1_000)).is_external());
    }

    #[test]
    fn unknown_previous_track_is_not_a_change() {
        let mut poller = Poller::new(JUMP);
        poller.observe(Observation {
            track_id: None,
            paused: Some(false),
            position_ms: 0,
        });
        assert!(!poller.observe(sample("a", false, 0)).track_changed);
    }
}
