//! The playback client capability consumed by the engine.
//!
//! The playback client is a black box: it owns the actual audio pipeline and
//! its connection to the streaming backend. The engine only needs the narrow
//! surface described by [`PlaybackClient`], plus the push notifications the
//! client delivers as [`ClientEvent`]s on a channel.
//!
//! Client state comes back in the client's own shape, [`NativeState`], which
//! the [`normalize`] module turns into the canonical form.
//!
//! [`ClientEvent`]: crate::events::ClientEvent
//! [`normalize`]: crate::normalize

use serde::Deserialize;

use crate::{
    credential::Credential,
    error::Result,
    state::{RepeatMode, Volume},
};

/// Operations the engine invokes on the playback client.
///
/// Every asynchronous operation is a suspension point of the engine loop.
/// Implementations report failures as errors rather than panicking; the
/// engine turns them into structured replies for the host.
#[allow(async_fn_in_trait)]
pub trait PlaybackClient {
    /// Creates the client's player instance for the given credential.
    ///
    /// Called once both the credential and the client itself are
    /// available, and again whenever the host re-authenticates.
    fn create(&mut self, credential: &Credential) -> Result<()>;

    /// Connects the player instance to the backend.
    ///
    /// Returns `false` when the client declined to connect. Readiness of the
    /// device is signalled separately through a `Ready` event.
    async fn connect(&mut self) -> Result<bool>;

    /// Disconnects the player instance, if any.
    fn disconnect(&mut self);

    async fn pause(&mut self) -> Result<()>;

    async fn resume(&mut self) -> Result<()>;

    async fn seek(&mut self, position_ms: u64) -> Result<()>;

    async fn set_volume(&mut self, volume: Volume) -> Result<()>;

    /// Samples the current state of the player, bypassing notifications.
    ///
    /// Returns `None` when the client has no active playback session.
    async fn current_state(&mut self) -> Result<Option<NativeState>>;

    /// Activates the platform media element so that audio output is not
    /// blocked by autoplay or user-gesture restrictions.
    fn activate_element(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Player state as reported by the playback client.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NativeState {
    pub paused: bool,

    /// Position in milliseconds.
    pub position: u64,

    /// Duration in milliseconds.
    pub duration: u64,

    pub shuffle: bool,
    pub repeat_mode: RepeatMode,

    /// Volume as reported by the client. Unreliable, and therefore never
    /// used for the canonical state.
    #[serde(default)]
    pub volume: Option<f64>,

    pub track_window: TrackWindow,
}

impl NativeState {
    #[must_use]
    pub fn current_track(&self) -> Option<&NativeTrack> {
        self.track_window.current_track.as_ref()
    }

    /// Returns the identifier of the current track, if both are known.
    #[must_use]
    pub fn track_id(&self) -> Option<&str> {
        self.current_track().and_then(|track| track.id.as_deref())
    }
}

/// The tracks surrounding the current one.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TrackWindow {
    pub current_track: Option<NativeTrack>,
    #[serde(default)]
    pub previous_tracks: Vec<NativeTrack>,
    #[serde(default)]
    pub next_tracks: Vec<NativeTrack>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NativeTrack {
    pub id: Option<String>,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<NativeArtist>,
    #[serde(default)]
    pub album: NativeAlbum,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NativeArtist {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NativeAlbum {
    pub name: String,
    #[serde(default)]
    pub images: Vec<NativeImage>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NativeImage {
    pub url: String,
}
