//! Conversion of native client state into canonical playback state.
//!
//! Rules:
//! * No current track means no active playback: the result is `None`. So
//!   does a current track without an identifier, such as a local file, so
//!   that no state ever claims playback without saying of what.
//! * Volume is never read from the client, which does not report it
//!   reliably. The engine's cached volume is used instead.
//! * The repeat mode code is passed through unchanged.
//! * Next and previous track availability follows from the presence of
//!   adjacent tracks in the client's track window.

use crate::{
    client::NativeState,
    state::{CanonicalPlaybackState, Volume},
};

/// Normalizes a native state sample.
///
/// `timestamp_ms` is the capture time of the sample. This function has no
/// side effects.
#[must_use]
pub fn normalize(
    native: Option<&NativeState>,
    volume: Volume,
    timestamp_ms: u64,
) -> Option<CanonicalPlaybackState> {
    let native = native?;
    let track = native.current_track()?;
    let track_id = track.id.clone()?;

    Some(CanonicalPlaybackState {
        track_id: Some(track_id),
        track_name: Some(track.name.clone()).filter(|name| !name.is_empty()),
        artists: track
            .artists
            .iter()
            .map(|artist| artist.name.clone())
            .collect(),
        album_name: Some(track.album.name.clone()).filter(|name| !name.is_empty()),
        album_art_url: track.album.images.first().map(|image| image.url.clone()),

        position_ms: native.position,
        duration_ms: native.duration,

        is_paused: native.paused,
        volume,

        shuffled: native.shuffle,
        repeat_mode: native.repeat_mode,

        has_next_track: !native.track_window.next_tracks.is_empty(),
        has_previous_track: !native.track_window.previous_tracks.is_empty(),

        timestamp_ms,
    })
}
