//! Canonical playback state as reported to the host.
//!
//! The playback client speaks its own dialect (see [`client::NativeState`]).
//! Everything that crosses the host boundary is expressed in the types of
//! this module instead:
//!
//! * [`CanonicalPlaybackState`] - one snapshot of playback at some instant
//! * [`Volume`] - a clamped, mute-snapped volume ratio
//! * [`RepeatMode`] - repeat setting, passed through as its numeric code
//! * [`DedupKey`] - coarse fingerprint used to suppress duplicate emissions
//!
//! [`client::NativeState`]: crate::client::NativeState

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Volume as a ratio between 0.0 and 1.0.
///
/// Construction always clamps into range and snaps near-silent values to
/// exactly zero, so that a volume of 0.3% is treated as mute.
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Volume(f64);

impl Volume {
    /// Values strictly below this threshold are treated as mute.
    pub const MUTE_THRESHOLD: f64 = 0.005;

    pub const MUTED: Self = Self(0.0);
    pub const MAX: Self = Self(1.0);

    /// Creates a volume from a ratio, clamping and snapping it.
    ///
    /// `NaN` is treated as mute.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use playsync::state::Volume;
    ///
    /// assert_eq!(Volume::from_ratio(-0.2).as_ratio(), 0.0);
    /// assert_eq!(Volume::from_ratio(0.003).as_ratio(), 0.0);
    /// assert_eq!(Volume::from_ratio(1.4).as_ratio(), 1.0);
    /// ```
    #[must_use]
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio.is_nan() {
            return Self::MUTED;
        }

        let ratio = ratio.clamp(0.0, 1.0);
        if ratio < Self::MUTE_THRESHOLD {
            Self::MUTED
        } else {
            Self(ratio)
        }
    }

    #[must_use]
    pub fn as_ratio(&self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn as_percent(&self) -> f64 {
        self.0 * 100.0
    }
}

impl<'de> Deserialize<'de> for Volume {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        f64::deserialize(deserializer).map(Self::from_ratio)
    }
}

impl fmt::Display for Volume {
    /// Formats a `Volume` for display with a `%` sign.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.as_percent())
    }
}

/// Repeat mode as numbered by the playback client.
///
/// The numeric code is passed through to the host unchanged.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Hash,
    Serialize_repr,
    Deserialize_repr,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
)]
#[repr(u8)]
pub enum RepeatMode {
    #[default]
    Off = 0,
    Context = 1,
    Track = 2,
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Context => write!(f, "context"),
            Self::Track => write!(f, "track"),
        }
    }
}

/// Normalized snapshot of playback at one sampling instant.
///
/// `is_playing` is never stored; it is derived from `is_paused` when
/// serialized so the two cannot disagree.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(into = "WireState")]
pub struct CanonicalPlaybackState {
    pub track_id: Option<String>,
    pub track_name: Option<String>,
    pub artists: Vec<String>,
    pub album_name: Option<String>,
    pub album_art_url: Option<String>,

    pub position_ms: u64,
    pub duration_ms: u64,

    pub is_paused: bool,
    pub volume: Volume,

    pub shuffled: bool,
    pub repeat_mode: RepeatMode,

    pub has_next_track: bool,
    pub has_previous_track: bool,

    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl CanonicalPlaybackState {
    #[must_use]
    #[inline]
    pub fn is_playing(&self) -> bool {
        !self.is_paused
    }

    /// Returns the fingerprint used to decide whether this state is
    /// observably different from another.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            track_id: self.track_id.clone(),
            is_paused: self.is_paused,
            position_secs: self.position_ms / 1000,
        }
    }
}

impl fmt::Display for CanonicalPlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.is_paused { "paused" } else { "playing" };
        write!(
            f,
            "{verb} {} at {}/{} ms",
            self.track_id.as_deref().unwrap_or("<unknown track>"),
            self.position_ms,
            self.duration_ms
        )
    }
}

/// Coarse fingerprint of a [`CanonicalPlaybackState`].
///
/// Positions are compared at whole-second granularity: two states on the
/// same track, with the same pause flag, within the same second, are the
/// same observable state.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct DedupKey {
    pub track_id: Option<String>,
    pub is_paused: bool,
    pub position_secs: u64,
}

/// Wire shape of [`CanonicalPlaybackState`], in the host's casing and with
/// the derived `isPlaying` flag.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireState {
    track_id: Option<String>,
    track_name: Option<String>,
    artists: Vec<String>,
    album_name: Option<String>,
    album_art_url: Option<String>,
    position_ms: u64,
    duration_ms: u64,
    is_paused: bool,
    is_playing: bool,
    volume: Volume,
    shuffled: bool,
    repeat_mode: RepeatMode,
    has_next_track: bool,
    has_previous_track: bool,
    timestamp_ms: u64,
}

impl From<CanonicalPlaybackState> for WireState {
    fn from(state: CanonicalPlaybackState) -> Self {
        Self {
            is_playing: state.is_playing(),
            track_id: state.track_id,
            track_name: state.track_name,
            artists: state.artists,
            album_name: state.album_name,
            album_art_url: state.album_art_url,
            position_ms: state.position_ms,
            duration_ms: state.duration_ms,
            is_paused: state.is_paused,
            volume: state.volume,
            shuffled: state.shuffled,
            repeat_mode: state.repeat_mode,
            has_next_track: state.has_next_track,
            has_previous_track: state.has_previous_track,
            timestamp_ms: state.timestamp_ms,
        }
    }
}
