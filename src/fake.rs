//! Scripted in-memory playback client and remote control for tests.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{sync::mpsc, time};

use crate::{
    client::{NativeAlbum, NativeArtist, NativeState, NativeTrack, PlaybackClient, TrackWindow},
    credential::Credential,
    error::{Error, Result},
    events::ClientEvent,
    remote::RemoteControl,
    state::Volume,
};

pub const DEVICE_ID: &str = "fake-device";

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Create,
    Connect,
    Disconnect,
    Pause,
    Resume,
    Seek(u64),
    SetVolume(Volume),
    CurrentState,
    Activate,
    Play { device_id: String, uris: Vec<String> },
}

#[derive(Debug)]
pub struct Script {
    pub calls: Vec<Call>,
    pub state: Option<NativeState>,
    pub accept_connect: bool,
    pub fail_activation: bool,
    pub fail_resume: bool,
    /// How long sampling the state takes.
    pub state_delay: Option<Duration>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

/// Both fakes share one script, so the order of calls across them is kept.
#[derive(Clone, Debug)]
pub struct Fake {
    script: Arc<Mutex<Script>>,
}

impl Fake {
    pub fn new(events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                calls: Vec::new(),
                state: None,
                accept_connect: true,
                fail_activation: false,
                fail_resume: false,
                state_delay: None,
                events,
            })),
        }
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.script().calls.iter().filter(|c| *c == call).count()
    }

    pub fn set_state(&self, state: Option<NativeState>) {
        self.script().state = state;
    }

    fn record(&self, call: Call) {
        self.script().calls.push(call);
    }
}

impl PlaybackClient for Fake {
    fn create(&mut self, _credential: &Credential) -> Result<()> {
        self.record(Call::Create);
        Ok(())
    }

    async fn connect(&mut self) -> Result<bool> {
        self.record(Call::Connect);
        let script = self.script();
        if script.accept_connect {
            let _ = script.events.send(ClientEvent::Ready {
                device_id: DEVICE_ID.to_owned(),
            });
        }
        Ok(script.accept_connect)
    }

    fn disconnect(&mut self) {
        self.record(Call::Disconnect);
    }

    async fn pause(&mut self) -> Result<()> {
        self.record(Call::Pause);
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        self.record(Call::Resume);
        if self.script().fail_resume {
            return Err(Error::unavailable("no list was loaded"));
        }
        Ok(())
    }

    async fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.record(Call::Seek(position_ms));
        Ok(())
    }

    async fn set_volume(&mut self, volume: Volume) -> Result<()> {
        self.record(Call::SetVolume(volume));
        Ok(())
    }

    async fn current_state(&mut self) -> Result<Option<NativeState>> {
        self.record(Call::CurrentState);
        let delay = self.script().state_delay;
        if let Some(delay) = delay {
            time::sleep(delay).await;
        }
        Ok(self.script().state.clone())
    }

    fn activate_element(&mut self) -> Result<()> {
        self.record(Call::Activate);
        if self.script().fail_activation {
            return Err(Error::permission_denied("no user gesture"));
        }
        Ok(())
    }
}

impl RemoteControl for Fake {
    async fn play(&self, _credential: &Credential, device_id: &str, uris: &[String]) -> Result<()> {
        self.record(Call::Play {
            device_id: device_id.to_owned(),
            uris: uris.to_vec(),
        });
        Ok(())
    }
}

/// A native sample of a track with one neighbour on each side.
pub fn native(track_id: &str, paused: bool, position: u64) -> NativeState {
    let track = |id: &str| NativeTrack {
        id: Some(id.to_owned()),
        uri: format!("spotify:track:{id}"),
        name: format!("Track {id}"),
        artists: vec![NativeArtist {
            name: "Artist".to_owned(),
        }],
        album: NativeAlbum {
            name: "Album".to_owned(),
            images: Vec::new(),
        },
    };

    NativeState {
        paused,
        position,
        duration: 240_000,
        volume: Some(0.9),
        track_window: TrackWindow {
            current_track: Some(track(track_id)),
            previous_tracks: vec![track("previous")],
            next_tracks: vec![track("next")],
        },
        ..NativeState::default()
    }
}
