//! A playback client driven entirely through the Connect web API.
//!
//! This lets the engine reconcile the state of any Connect device on the
//! account, such as a speaker or another desktop app, without an embedded
//! player. The web API has no push channel, so [`ConnectClient`] emulates
//! one: after every command it samples the player and pushes a
//! `PlayerStateChanged` notification, like an embedded player would.
//!
//! Like an embedded player, it only reports state while its device is the
//! active one. Once playback moves to another device, the state is `None`.

use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use tokio::sync::mpsc;
use url::Url;

use crate::{
    client::{NativeAlbum, NativeArtist, NativeState, NativeTrack, PlaybackClient, TrackWindow},
    config::Config,
    credential::Credential,
    error::{Error, ErrorKind, Result},
    events::ClientEvent,
    http,
    state::{RepeatMode, Volume},
};

#[derive(Deserialize)]
struct Devices {
    devices: Vec<Device>,
}

#[derive(Deserialize)]
struct Device {
    id: Option<String>,
    name: String,
    volume_percent: Option<u8>,
}

#[derive(Deserialize)]
struct PlaybackContext {
    device: Option<Device>,
    #[serde(default)]
    is_playing: bool,
    progress_ms: Option<u64>,
    #[serde(default)]
    shuffle_state: bool,
    #[serde(default)]
    repeat_state: RepeatState,
    item: Option<Item>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RepeatState {
    #[default]
    Off,
    Context,
    Track,
}

impl From<RepeatState> for RepeatMode {
    fn from(state: RepeatState) -> Self {
        match state {
            RepeatState::Off => Self::Off,
            RepeatState::Context => Self::Context,
            RepeatState::Track => Self::Track,
        }
    }
}

#[derive(Deserialize)]
struct Item {
    id: Option<String>,
    uri: String,
    name: String,
    duration_ms: u64,
    #[serde(default)]
    artists: Vec<NativeArtist>,
    // Episodes have a show instead.
    album: Option<NativeAlbum>,
}

impl From<Item> for NativeTrack {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            uri: item.uri,
            name: item.name,
            artists: item.artists,
            album: item.album.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct Queue {
    #[serde(default)]
    queue: Vec<Item>,
}

pub struct ConnectClient {
    http: Arc<http::Client>,
    api_url: Url,
    device_name: String,

    credential: Option<Credential>,
    device_id: Option<String>,

    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ConnectClient {
    /// Creates a client that controls the device named in `config`.
    ///
    /// The client is usable right away, so it announces itself as loaded
    /// on `events` immediately.
    #[must_use]
    pub fn new(
        config: &Config,
        http: Arc<http::Client>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let client = Self {
            http,
            api_url: config.api_url.clone(),
            device_name: config.device_name.clone(),
            credential: None,
            device_id: None,
            events,
        };

        client.emit(ClientEvent::Loaded);
        client
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            trace!("engine stopped listening to client events");
        }
    }

    fn device_id(&self) -> Result<&str> {
        self.device_id
            .as_deref()
            .ok_or_else(|| Error::failed_precondition("not connected to a device"))
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.api_url.join(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Sends a request without body and checks its status.
    ///
    /// Authentication and account failures are also pushed as client
    /// events, the way an embedded player reports them.
    async fn send(&self, method: Method, url: Url) -> Result<reqwest::Response> {
        let credential = self
            .credential
            .as_ref()
            .ok_or_else(|| Error::failed_precondition("no player instance"))?;

        let request = self.http.request::<()>(method, url, credential, None)?;
        let result = match self.http.execute(request).await {
            Ok(response) => http::Client::check(response).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            match e.kind {
                ErrorKind::Unauthenticated => {
                    self.emit(ClientEvent::AuthenticationError(e.to_string()));
                }
                ErrorKind::PermissionDenied => {
                    self.emit(ClientEvent::AccountError(e.to_string()));
                }
                _ => {}
            }
        }

        result
    }

    /// Sends a command to the device and pushes the resulting state.
    async fn command(&mut self, method: Method, path: &str, query: &[(&str, &str)]) -> Result<()> {
        let device_id = self.device_id()?.to_owned();
        let mut pairs = query.to_vec();
        pairs.push(("device_id", &device_id));

        let url = self.url(path, &pairs)?;
        self.send(method, url).await?;

        match self.current_state().await {
            Ok(state) => self.emit(ClientEvent::PlayerStateChanged(state)),
            Err(e) => warn!("failed to sample state after {path}: {e}"),
        }

        Ok(())
    }

    async fn next_tracks(&self) -> Result<Vec<NativeTrack>> {
        let url = self.url("me/player/queue", &[])?;
        let queue: Queue = self.send(Method::GET, url).await?.json().await?;
        Ok(queue.queue.into_iter().map(NativeTrack::from).collect())
    }
}

impl PlaybackClient for ConnectClient {
    fn create(&mut self, credential: &Credential) -> Result<()> {
        self.credential = Some(credential.clone());
        self.device_id = None;
        Ok(())
    }

    async fn connect(&mut self) -> Result<bool> {
        let url = self.url("me/player/devices", &[])?;
        let devices: Devices = self.send(Method::GET, url).await?.json().await?;

        let device = devices
            .devices
            .into_iter()
            .find(|device| device.name.eq_ignore_ascii_case(&self.device_name));

        match device.and_then(|device| device.id) {
            Some(device_id) => {
                info!("found device {} ({device_id})", self.device_name);
                self.device_id = Some(device_id.clone());
                self.emit(ClientEvent::Ready { device_id });
                Ok(true)
            }
            None => {
                warn!("device {} is not available", self.device_name);
                Ok(false)
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(device_id) = self.device_id.take() {
            self.emit(ClientEvent::NotReady { device_id });
        }
        self.credential = None;
    }

    async fn pause(&mut self) -> Result<()> {
        self.command(Method::PUT, "me/player/pause", &[]).await
    }

    async fn resume(&mut self) -> Result<()> {
        self.command(Method::PUT, "me/player/play", &[]).await
    }

    async fn seek(&mut self, position_ms: u64) -> Result<()> {
        let position = position_ms.to_string();
        self.command(Method::PUT, "me/player/seek", &[("position_ms", &position)])
            .await
    }

    async fn set_volume(&mut self, volume: Volume) -> Result<()> {
        let percent = format!("{:.0}", volume.as_percent());
        self.command(
            Method::PUT,
            "me/player/volume",
            &[("volume_percent", &percent)],
        )
        .await
    }

    async fn current_state(&mut self) -> Result<Option<NativeState>> {
        let device_id = self.device_id()?.to_owned();

        let url = self.url("me/player", &[("additional_types", "track,episode")])?;
        let response = self.send(Method::GET, url).await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let context: PlaybackContext = response.json().await?;
        let Some(device) = context.device else {
            return Ok(None);
        };
        if device.id.as_deref() != Some(device_id.as_str()) {
            trace!("playback is on {}, not on this device", device.name);
            return Ok(None);
        }

        let next_tracks = match self.next_tracks().await {
            Ok(tracks) => tracks,
            Err(e) => {
                debug!("failed to read queue: {e}");
                Vec::new()
            }
        };

        let duration = context.item.as_ref().map_or(0, |item| item.duration_ms);
        Ok(Some(NativeState {
            paused: !context.is_playing,
            position: context.progress_ms.unwrap_or_default(),
            duration,
            shuffle: context.shuffle_state,
            repeat_mode: context.repeat_state.into(),
            volume: device.volume_percent.map(|percent| f64::from(percent) / 100.0),
            track_window: TrackWindow {
                current_track: context.item.map(NativeTrack::from),
                previous_tracks: Vec::new(),
                next_tracks,
            },
        }))
    }
}
