//! The playback state reconciliation engine.
//!
//! The engine keeps the host informed of the true playback state of a
//! device, which can change through this engine's own commands as well as
//! through any other device controlling the same account. It merges two
//! signal sources into one state stream:
//!
//! * Notifications pushed by the playback client, coalesced by a
//!   [`Throttle`]
//! * Samples taken by polling the client, compared by a [`Poller`] to catch
//!   changes that notifications missed
//!
//! Both paths share one [`Deduplicator`], so the same observable state is
//! never reported twice, and both end in one [`Bridge`] to the host.
//!
//! # Execution
//!
//! The engine is a single task that owns all of its state and reacts to one
//! thing at a time, in this order of priority:
//! 1. Requests from the host through a [`Handle`]
//! 2. Client notifications
//! 3. The throttle window elapsing
//! 4. The poll interval elapsing
//!
//! Because every reaction runs to completion before the next one starts, no
//! reaction ever observes another one half done.
//!
//! Calls into the client are the exception: while one is in flight the engine
//! keeps accepting host requests. A dispose takes effect at once and the
//! result of the call is dropped. Anything else waits its turn, in order.
//!
//! # Example
//!
//! ```ignore
//! let (bridge, mut messages) = Bridge::channel();
//! let (engine, handle) = Engine::new(&config, client, remote, client_events, bridge);
//! tokio::spawn(engine.run());
//!
//! handle.initialize(credential)?;
//! let reply = handle.command(Command::Pause).await;
//! ```

use std::{collections::VecDeque, future::Future, time::Duration};

use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    bridge::{Bridge, ErrorCategory, Message},
    client::{NativeState, PlaybackClient},
    command::{validate_uris, Command, Reply},
    config::Config,
    credential::Credential,
    dedup::Deduplicator,
    error::{Error, Result},
    events::ClientEvent,
    gate::AudioGate,
    normalize::normalize,
    poller::{Observation, Poller},
    remote::RemoteControl,
    session::Session,
    state::Volume,
    throttle::Throttle,
    util::Clock,
};

/// Requests from the host to the engine.
#[derive(Debug)]
pub enum Request {
    /// Supplies or replaces the access credential.
    Initialize(Credential),

    /// Runs a command and sends back the reply.
    Command(Command, oneshot::Sender<Reply>),

    /// Tears the engine down.
    Dispose,
}

/// Host side of the engine.
///
/// Cheap to clone. When the last handle is dropped, the engine disposes
/// itself.
#[derive(Clone, Debug)]
pub struct Handle {
    tx: mpsc::UnboundedSender<Request>,
}

impl Handle {
    /// Supplies the access credential. Supplying a new one later
    /// re-creates the session with it.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` if the engine was disposed.
    pub fn initialize(&self, credential: Credential) -> Result<()> {
        self.tx
            .send(Request::Initialize(credential))
            .map_err(|_| Self::disposed())
    }

    /// Runs `command` on the engine.
    ///
    /// Never fails: failures, including a disposed engine, are reported in
    /// the reply.
    pub async fn command(&self, command: Command) -> Reply {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Request::Command(command, tx)).is_err() {
            return Reply::failure(&Self::disposed());
        }

        rx.await.unwrap_or_else(|_| Reply::failure(&Self::disposed()))
    }

    /// Disposes the engine. Does nothing if it was already disposed.
    pub fn dispose(&self) {
        if self.tx.send(Request::Dispose).is_err() {
            trace!("engine already disposed");
        }
    }

    fn disposed() -> Error {
        Error::failed_precondition("engine is disposed")
    }
}

/// Host requests, including those that arrived while the engine was waiting
/// on the client.
#[derive(Debug)]
struct Inbox {
    requests: mpsc::UnboundedReceiver<Request>,
    backlog: VecDeque<Request>,
    disposing: bool,
}

impl Inbox {
    fn new(requests: mpsc::UnboundedReceiver<Request>) -> Self {
        Self {
            requests,
            backlog: VecDeque::new(),
            disposing: false,
        }
    }

    /// Returns the next request in order of arrival. `None` means dispose.
    async fn next(&mut self) -> Option<Request> {
        if self.disposing {
            return None;
        }

        match self.backlog.pop_front() {
            Some(request) => Some(request),
            None => self.requests.recv().await,
        }
    }

    /// Awaits a client call while still taking requests from the host.
    ///
    /// Returns `None` when the host disposed the engine before the call
    /// completed. The call is dropped and its result never acted upon.
    async fn guard<F: Future>(&mut self, call: F) -> Option<F::Output> {
        tokio::pin!(call);

        while !self.disposing {
            tokio::select! {
                biased;

                request = self.requests.recv() => match request {
                    Some(Request::Dispose) | None => self.disposing = true,
                    Some(request) => self.backlog.push_back(request),
                },

                output = &mut call => return Some(output),
            }
        }

        debug!("dropping client call after dispose");
        None
    }
}

/// Result of a client call cut short by dispose.
fn stale() -> Error {
    Error::cancelled("engine disposed while waiting for the client")
}

/// Everything the engine knows, owned in one place for the lifetime of the
/// engine.
#[derive(Debug)]
struct ReconciliationState {
    session: Session,
    credential: Option<Credential>,

    dedup: Deduplicator,
    throttle: Throttle<Option<NativeState>>,
    poller: Poller,
    gate: AudioGate,
    clock: Clock,
}

/// What is left for the engine to do after a client event was applied to
/// the state.
#[derive(Debug, PartialEq)]
enum Reaction {
    Nothing,
    Send(Message),
    CreateSession,
    DeviceReady(Message),
}

impl ReconciliationState {
    fn new(config: &Config) -> Self {
        Self {
            session: Session::new(config.initial_volume),
            credential: None,
            dedup: Deduplicator::new(),
            throttle: Throttle::new(config.throttle_window),
            poller: Poller::new(config.position_jump),
            gate: AudioGate::new(),
            clock: Clock::new(),
        }
    }

    /// Applies a client event to the state.
    ///
    /// Does not call back into the client: anything that requires it is
    /// returned as a [`Reaction`].
    fn react(&mut self, event: ClientEvent) -> Reaction {
        if let Some((category, message)) = event.as_error() {
            let message = Message::Error {
                category,
                message: message.to_owned(),
            };

            if category.is_fatal() {
                error!("{message}");
                self.session.fail();
                self.throttle.cancel();
            } else {
                warn!("{message}");
            }

            return Reaction::Send(message);
        }

        match event {
            ClientEvent::Loaded => {
                debug!("playback client loaded");
                if self.session.client_loaded() {
                    Reaction::CreateSession
                } else {
                    Reaction::Nothing
                }
            }

            ClientEvent::Ready { device_id } => {
                if self.session.ready(device_id.clone()) {
                    Reaction::DeviceReady(Message::Ready { device_id })
                } else {
                    Reaction::Nothing
                }
            }

            ClientEvent::NotReady { device_id } => {
                if self.session.not_ready(device_id.clone()) {
                    Reaction::Send(Message::NotReady { device_id })
                } else {
                    Reaction::Nothing
                }
            }

            ClientEvent::PlayerStateChanged(native) => {
                if self.session.has_client() {
                    self.throttle.submit(native);
                }
                Reaction::Nothing
            }

            _ => Reaction::Nothing,
        }
    }

    /// Normalizes a sample and returns the message reporting it, unless the
    /// same observable state was reported last.
    fn candidate(&mut self, native: Option<&NativeState>) -> Option<Message> {
        let state = normalize(native, self.session.cached_volume(), self.clock.stamp());
        if !self.dedup.should_emit(state.as_ref()) {
            trace!("suppressing unchanged state");
            return None;
        }

        self.dedup.record(state.as_ref());
        Some(Message::State { state })
    }

    /// Forgets all observations of a previous session.
    fn reset(&mut self) {
        self.dedup.reset();
        self.poller.reset();
        self.throttle.cancel();
    }
}

/// The engine task. Create one with [`Engine::new`] and drive it with
/// [`Engine::run`].
pub struct Engine<C, R> {
    client: C,
    remote: R,

    inbox: Inbox,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    bridge: Bridge,

    state: ReconciliationState,
    poll_interval: Duration,
}

impl<C, R> Engine<C, R>
where
    C: PlaybackClient,
    R: RemoteControl,
{
    /// Creates an engine and the handle to control it.
    ///
    /// `events` must carry the notifications of `client`.
    #[must_use]
    pub fn new(
        config: &Config,
        client: C,
        remote: R,
        events: mpsc::UnboundedReceiver<ClientEvent>,
        bridge: Bridge,
    ) -> (Self, Handle) {
        let (tx, requests) = mpsc::unbounded_channel();
        let engine = Self {
            client,
            remote,
            inbox: Inbox::new(requests),
            events,
            bridge,
            state: ReconciliationState::new(config),
            poll_interval: config.poll_interval,
        };

        (engine, Handle { tx })
    }

    /// Runs the engine until it is disposed.
    pub async fn run(mut self) {
        let mut poll = time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "engine started, throttling for {} ms and polling every {} ms",
            self.state.throttle.window().as_millis(),
            self.poll_interval.as_millis()
        );

        loop {
            tokio::select! {
                biased;

                request = self.inbox.next() => {
                    match request {
                        Some(Request::Initialize(credential)) => self.initialize(credential).await,
                        Some(Request::Command(command, reply)) => {
                            let result = self.command(command).await;
                            if reply.send(result).is_err() {
                                debug!("host dropped the reply");
                            }
                        }
                        Some(Request::Dispose) | None => break,
                    }
                }

                Some(event) = self.events.recv() => {
                    self.on_event(event).await;
                }

                Some(native) = self.state.throttle.fire(), if self.state.throttle.is_armed() => {
                    if let Some(message) = self.state.candidate(native.as_ref()) {
                        self.bridge.send(message);
                    }
                }

                _ = poll.tick() => {
                    self.poll().await;
                }
            }
        }

        self.dispose();
    }

    async fn initialize(&mut self, credential: Credential) {
        debug!("credential supplied");
        self.state.credential = Some(credential);
        if self.state.session.supply_credential() {
            self.create_session().await;
        }
    }

    async fn on_event(&mut self, event: ClientEvent) {
        trace!("<- {event:?}");
        match self.state.react(event) {
            Reaction::Nothing => {}
            Reaction::Send(message) => self.bridge.send(message),
            Reaction::CreateSession => self.create_session().await,
            Reaction::DeviceReady(message) => {
                self.bridge.send(message);

                let volume = self.state.session.cached_volume();
                if let Some(Err(e)) = self.inbox.guard(self.client.set_volume(volume)).await {
                    warn!("failed to apply volume {volume}: {e}");
                }
            }
        }
    }

    /// Creates the client's player instance and connects it.
    async fn create_session(&mut self) {
        let Some(credential) = self.state.credential.clone() else {
            return;
        };

        self.state.reset();
        if let Err(e) = self.client.create(&credential) {
            self.state.session.fail();
            self.bridge.send(Message::Error {
                category: ErrorCategory::Initialization,
                message: e.to_string(),
            });
            return;
        }

        if let Err(e) = self.connect().await {
            error!("failed to connect: {e}");
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if !self.state.session.connecting() {
            return if self.state.session.has_client() {
                debug!("already {}", self.state.session.lifecycle());
                Ok(())
            } else {
                Err(Error::failed_precondition("no player instance"))
            };
        }

        match self.inbox.guard(self.client.connect()).await.ok_or_else(stale)? {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.state.session.connect_refused();
                let e = Error::unavailable("playback client refused to connect");
                self.bridge.send(Message::Error {
                    category: ErrorCategory::Initialization,
                    message: e.to_string(),
                });
                Err(e)
            }
            Err(e) => {
                self.state.session.connect_refused();
                Err(e)
            }
        }
    }

    async fn command(&mut self, command: Command) -> Reply {
        debug!("command: {command}");
        let description = command.to_string();

        let result = self.execute(command).await;
        if let Err(e) = &result {
            warn!("{description} failed: {e}");
        }

        result.into()
    }

    async fn execute(&mut self, command: Command) -> Result<Option<Value>> {
        match command {
            Command::Connect => self.connect().await.map(|()| None),

            Command::Play { uris } => self.play(&uris).await.map(|()| None),

            Command::Pause => {
                self.require_client()?;
                self.state.gate.ensure_unblocked(&mut self.client);
                let call = self.client.pause();
                self.inbox.guard(call).await.ok_or_else(stale)?.map(|()| None)
            }

            Command::Resume => {
                self.require_client()?;
                self.state.gate.ensure_unblocked(&mut self.client);
                let call = self.client.resume();
                self.inbox.guard(call).await.ok_or_else(stale)?.map(|()| None)
            }

            Command::Seek { position_ms } => {
                self.require_client()?;
                let call = self.client.seek(position_ms);
                self.inbox.guard(call).await.ok_or_else(stale)?.map(|()| None)
            }

            Command::SetVolume { volume } => {
                // The cache is authoritative, whether or not the client
                // acknowledges.
                let volume = Volume::from_ratio(volume);
                self.state.session.set_cached_volume(volume);

                self.require_client()?;
                let call = self.client.set_volume(volume);
                self.inbox.guard(call).await.ok_or_else(stale)?.map(|()| None)
            }

            Command::GetState => {
                self.require_client()?;
                let call = self.client.current_state();
                let native = self.inbox.guard(call).await.ok_or_else(stale)??;
                let state = normalize(
                    native.as_ref(),
                    self.state.session.cached_volume(),
                    self.state.clock.stamp(),
                );
                Ok(Some(serde_json::to_value(state)?))
            }
        }
    }

    async fn play(&mut self, uris: &[String]) -> Result<()> {
        let session = &self.state.session;
        let device_id = match session.device_id() {
            Some(device_id) if session.is_ready() => device_id.to_owned(),
            _ => return Err(Error::failed_precondition("device is not ready")),
        };
        let credential = self
            .state
            .credential
            .as_ref()
            .ok_or_else(|| Error::failed_precondition("no credential"))?;

        validate_uris(uris)?;
        let call = self.remote.play(credential, &device_id, uris);
        self.inbox.guard(call).await.ok_or_else(stale)??;

        self.state.gate.ensure_unblocked(&mut self.client);
        match self.inbox.guard(self.client.resume()).await {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => {
                debug!("resume after play failed: {e}");
                Ok(())
            }
            None => Err(stale()),
        }
    }

    fn require_client(&self) -> Result<()> {
        if self.state.session.has_client() {
            Ok(())
        } else {
            Err(Error::failed_precondition(format!(
                "no player instance ({})",
                self.state.session.lifecycle()
            )))
        }
    }

    /// Samples the client and reports changes made from elsewhere.
    ///
    /// A sample without a playback session is observed like any other, so
    /// that playback moving to another device is reported as `null`.
    async fn poll(&mut self) {
        if !self.state.session.is_ready() {
            return;
        }

        let native = match self.inbox.guard(self.client.current_state()).await {
            Some(Ok(native)) => native,
            Some(Err(e)) => {
                warn!("failed to poll state: {e}");
                return;
            }
            None => return,
        };

        let discrepancy = self.state.poller.observe(Observation::from(native.as_ref()));
        if discrepancy.resumed {
            self.state.gate.ensure_unblocked(&mut self.client);
        }

        if discrepancy.is_external() {
            debug!("external control detected: {discrepancy:?}");
            if let Some(message) = self.state.candidate(native.as_ref()) {
                self.bridge.send(message);
            }
        }
    }

    fn dispose(&mut self) {
        info!("disposing engine");
        self.state.session.dispose();
        if self.state.throttle.cancel().is_some() {
            debug!("dropped pending state update");
        }

        self.bridge.close();
        self.client.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fake::{native, Call, Fake, DEVICE_ID};

    const TRACK: &str = "spotify:track:4uLU6hMCjMI75M1A2tKUQC";

    struct Harness {
        handle: Handle,
        fake: Fake,
        events: mpsc::UnboundedSender<ClientEvent>,
        messages: mpsc::UnboundedReceiver<Message>,
    }

    impl Harness {
        fn start() -> Self {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (bridge, messages) = Bridge::channel();
            let fake = Fake::new(events_tx.clone());

            let (engine, handle) = Engine::new(
                &Config::default(),
                fake.clone(),
                fake.clone(),
                events_rx,
                bridge,
            );
            tokio::spawn(engine.run());

            Self {
                handle,
                fake,
                events: events_tx,
                messages,
            }
        }

        /// Starts an engine and waits for its device to become ready.
        async fn ready() -> Self {
            let mut harness = Self::start();
            harness.event(ClientEvent::Loaded);
            harness.handle.initialize(credential()).unwrap();
            settle().await;

            assert_eq!(
                harness.messages.try_recv().unwrap(),
                Message::Ready {
                    device_id: DEVICE_ID.to_owned()
                }
            );
            harness
        }

        fn event(&self, event: ClientEvent) {
            self.events.send(event).unwrap();
        }

        fn drain(&mut self) -> Vec<Message> {
            let mut messages = Vec::new();
            while let Ok(message) = self.messages.try_recv() {
                messages.push(message);
            }
            messages
        }

        fn states(&mut self) -> Vec<Option<(String, u64)>> {
            self.drain()
                .into_iter()
                .filter_map(|message| match message {
                    Message::State { state } => Some(
                        state.map(|state| (state.track_id.unwrap_or_default(), state.position_ms)),
                    ),
                    _ => None,
                })
                .collect()
        }
    }

    fn credential() -> Credential {
        "token".parse().unwrap()
    }

    /// Lets the engine process everything queued without reaching the next
    /// poll tick.
    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn session_needs_credential_and_client_in_any_order() {
        let mut harness = Harness::start();
        harness.handle.initialize(credential()).unwrap();
        settle().await;
        assert!(harness.drain().is_empty());
        assert!(harness.fake.calls().is_empty());

        harness.event(ClientEvent::Loaded);
        settle().await;
        assert_eq!(
            harness.drain(),
            vec![Message::Ready {
                device_id: DEVICE_ID.to_owned()
            }]
        );
        assert_eq!(
            harness.fake.calls(),
            vec![
                Call::Create,
                Call::Connect,
                Call::SetVolume(Volume::from_ratio(0.5))
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn play_before_ready_makes_no_calls() {
        let harness = Harness::start();
        let reply = harness
            .handle
            .command(Command::Play {
                uris: vec![TRACK.to_owned()],
            })
            .await;

        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("NotReadyError"));
        assert!(harness.fake.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn play_selects_tracks_then_unblocks_and_resumes() {
        let harness = Harness::ready().await;
        harness.fake.script().fail_resume = true;

        let reply = harness
            .handle
            .command(Command::Play {
                uris: vec![TRACK.to_owned()],
            })
            .await;
        assert_eq!(reply, Reply::ok());

        let calls = harness.fake.calls();
        assert_eq!(
            calls[calls.len() - 3..],
            [
                Call::Play {
                    device_id: DEVICE_ID.to_owned(),
                    uris: vec![TRACK.to_owned()]
                },
                Call::Activate,
                Call::Resume,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn play_rejects_malformed_uris() {
        let harness = Harness::ready().await;
        let reply = harness
            .handle
            .command(Command::Play {
                uris: vec!["spotify:track:nope".to_owned()],
            })
            .await;

        assert_eq!(reply.error.as_deref(), Some("InvalidArgumentError"));
        assert_eq!(
            harness.fake.count(&Call::Play {
                device_id: DEVICE_ID.to_owned(),
                uris: vec!["spotify:track:nope".to_owned()]
            }),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_notifications_emits_last_only() {
        let mut harness = Harness::ready().await;
        for position in [1_000, 2_000, 3_000] {
            harness.event(ClientEvent::PlayerStateChanged(Some(native(
                "a", false, position,
            ))));
            time::sleep(Duration::from_millis(100)).await;
        }
        assert!(harness.states().is_empty());

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(harness.states(), vec![Some(("a".to_owned(), 3_000))]);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_state_is_emitted_once() {
        let mut harness = Harness::ready().await;
        harness.event(ClientEvent::PlayerStateChanged(Some(native("a", true, 10_100))));
        time::sleep(Duration::from_millis(600)).await;

        // Same track, same pause flag, same whole second.
        harness.event(ClientEvent::PlayerStateChanged(Some(native("a", true, 10_900))));
        time::sleep(Duration::from_millis(600)).await;

        assert_eq!(harness.states(), vec![Some(("a".to_owned(), 10_100))]);
    }

    #[tokio::test(start_paused = true)]
    async fn emitted_timestamps_increase() {
        let mut harness = Harness::ready().await;
        for position in [1_000, 5_000] {
            harness.event(ClientEvent::PlayerStateChanged(Some(native(
                "a", false, position,
            ))));
            time::sleep(Duration::from_millis(600)).await;
        }

        let timestamps: Vec<u64> = harness
            .drain()
            .into_iter()
            .filter_map(|message| match message {
                Message::State { state: Some(state) } => Some(state.timestamp_ms),
                _ => None,
            })
            .collect();
        assert_eq!(timestamps.len(), 2);
        assert!(timestamps[0] < timestamps[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn get_state_stamps_after_last_emission() {
        let mut harness = Harness::ready().await;
        harness.fake.set_state(Some(native("a", false, 1_000)));
        harness.event(ClientEvent::PlayerStateChanged(Some(native("a", false, 1_000))));
        time::sleep(Duration::from_millis(600)).await;

        let emitted = match harness.drain().as_slice() {
            [Message::State { state: Some(state) }] => state.timestamp_ms,
            other => panic!("unexpected messages: {other:?}"),
        };

        let reply = harness.handle.command(Command::GetState).await;
        let stamped = reply.data.unwrap()["timestampMs"].as_u64().unwrap();
        assert!(stamped > emitted);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_reports_track_change() {
        let mut harness = Harness::ready().await;
        harness.fake.set_state(Some(native("a", false, 10_000)));
        time::sleep(Duration::from_millis(1_500)).await;
        assert!(harness.states().is_empty());

        harness.fake.set_state(Some(native("b", false, 10_000)));
        time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(harness.states(), vec![Some(("b".to_owned(), 10_000))]);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_reports_transfer_away_and_back() {
        let mut harness = Harness::ready().await;
        harness.event(ClientEvent::PlayerStateChanged(Some(native("a", false, 10_000))));
        harness.fake.set_state(Some(native("a", false, 10_000)));
        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(harness.states(), vec![Some(("a".to_owned(), 10_000))]);

        // Playback moved to another device, without a notification.
        harness.fake.set_state(None);
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(harness.states(), vec![None]);

        harness.fake.set_state(Some(native("a", false, 12_000)));
        time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(harness.states(), vec![Some(("a".to_owned(), 12_000))]);
    }

    #[tokio::test(start_paused = true)]
    async fn notification_then_poll_emits_once() {
        let mut harness = Harness::ready().await;
        harness.fake.set_state(Some(native("a", false, 10_000)));
        time::sleep(Duration::from_millis(1_200)).await;

        harness.fake.set_state(Some(native("b", false, 10_000)));
        harness.event(ClientEvent::PlayerStateChanged(Some(native("b", false, 10_000))));

        // The throttle fires first, the poll then sees the track change.
        time::sleep(Duration::from_millis(1_300)).await;
        assert_eq!(harness.fake.count(&Call::CurrentState), 2);
        assert_eq!(harness.states(), vec![Some(("b".to_owned(), 10_000))]);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_then_notification_emits_once() {
        let mut harness = Harness::ready().await;
        harness.fake.set_state(Some(native("a", false, 10_000)));
        time::sleep(Duration::from_millis(1_200)).await;

        harness.fake.set_state(Some(native("b", false, 10_000)));
        time::sleep(Duration::from_millis(1_000)).await;
        harness.event(ClientEvent::PlayerStateChanged(Some(native("b", false, 10_000))));
        time::sleep(Duration::from_millis(1_000)).await;

        assert_eq!(harness.states(), vec![Some(("b".to_owned(), 10_000))]);
    }

    #[tokio::test(start_paused = true)]
    async fn track_without_id_is_reported_as_null() {
        let mut harness = Harness::ready().await;
        let mut local = native("local", false, 30_000);
        if let Some(track) = local.track_window.current_track.as_mut() {
            track.id = None;
        }

        harness.event(ClientEvent::PlayerStateChanged(Some(local)));
        time::sleep(Duration::from_millis(600)).await;
        assert_eq!(harness.states(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_drops_poll_in_flight() {
        let mut harness = Harness::ready().await;
        harness.fake.set_state(Some(native("b", false, 10_000)));
        harness.fake.script().state_delay = Some(Duration::from_secs(3));

        // The first poll starts at one second and would take until four.
        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(harness.fake.count(&Call::CurrentState), 1);

        harness.handle.dispose();
        settle().await;
        assert_eq!(harness.fake.count(&Call::Disconnect), 1);

        let start = Instant::now();
        let reply = harness.handle.command(Command::GetState).await;
        assert_eq!(reply.error.as_deref(), Some("NotReadyError"));
        assert!(start.elapsed() < Duration::from_millis(10));

        time::sleep(Duration::from_secs(5)).await;
        assert!(harness.drain().is_empty());
        assert_eq!(harness.messages.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_wait_for_poll_in_flight() {
        let harness = Harness::ready().await;
        harness.fake.set_state(Some(native("a", false, 10_000)));
        harness.fake.script().state_delay = Some(Duration::from_secs(3));
        time::sleep(Duration::from_millis(1_500)).await;

        let reply = harness.handle.command(Command::Pause).await;
        assert_eq!(reply, Reply::ok());

        let calls = harness.fake.calls();
        let sampled = calls.iter().position(|call| *call == Call::CurrentState);
        let paused = calls.iter().position(|call| *call == Call::Pause);
        assert!(sampled < paused);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_reports_position_jumps_only() {
        let mut harness = Harness::ready().await;
        harness.fake.set_state(Some(native("a", false, 10_000)));
        time::sleep(Duration::from_millis(1_500)).await;

        harness.fake.set_state(Some(native("a", false, 15_000)));
        time::sleep(Duration::from_millis(1_000)).await;
        assert!(harness.states().is_empty());

        harness.fake.set_state(Some(native("a", false, 20_001)));
        time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(harness.states(), vec![Some(("a".to_owned(), 20_001))]);
    }

    #[tokio::test(start_paused = true)]
    async fn external_resume_unblocks_audio_once() {
        let mut harness = Harness::ready().await;
        // Failed activations are retried, so every request is visible.
        harness.fake.script().fail_activation = true;

        harness.fake.set_state(Some(native("a", true, 10_000)));
        time::sleep(Duration::from_millis(1_500)).await;

        harness.fake.set_state(Some(native("a", false, 10_000)));
        time::sleep(Duration::from_millis(1_000)).await;
        time::sleep(Duration::from_millis(1_000)).await;

        assert_eq!(harness.fake.count(&Call::Activate), 1);
        assert_eq!(harness.states(), vec![Some(("a".to_owned(), 10_000))]);
    }

    #[tokio::test(start_paused = true)]
    async fn set_volume_clamps_and_caches() {
        let harness = Harness::ready().await;
        for (requested, cached) in [(-0.2, 0.0), (0.003, 0.0), (0.5, 0.5), (1.4, 1.0)] {
            let reply = harness
                .handle
                .command(Command::SetVolume { volume: requested })
                .await;
            assert!(reply.success);

            harness.fake.set_state(Some(native("a", false, 0)));
            let reply = harness.handle.command(Command::GetState).await;
            assert_eq!(reply.data.unwrap()["volume"], json!(cached));
        }

        assert_eq!(harness.fake.count(&Call::SetVolume(Volume::MUTED)), 2);
        assert_eq!(harness.fake.count(&Call::SetVolume(Volume::MAX)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_volume_without_client_still_caches() {
        let mut harness = Harness::start();
        let reply = harness
            .handle
            .command(Command::SetVolume { volume: 0.8 })
            .await;
        assert_eq!(reply.error.as_deref(), Some("NotReadyError"));

        harness.event(ClientEvent::Loaded);
        harness.handle.initialize(credential()).unwrap();
        settle().await;
        harness.drain();
        assert_eq!(
            harness.fake.count(&Call::SetVolume(Volume::from_ratio(0.8))),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn get_state_without_track_is_null() {
        let harness = Harness::ready().await;
        let reply = harness.handle.command(Command::GetState).await;
        assert!(reply.success);
        assert_eq!(reply.data, Some(Value::Null));

        let mut state = native("a", false, 0);
        state.track_window.current_track = None;
        harness.fake.set_state(Some(state));
        let reply = harness.handle.command(Command::GetState).await;
        assert_eq!(reply.data, Some(Value::Null));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let harness = Harness::ready().await;
        let reply = harness.handle.command(Command::Connect).await;
        assert_eq!(reply, Reply::ok());
        assert_eq!(harness.fake.count(&Call::Connect), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connect_reports_initialization_error() {
        let mut harness = Harness::start();
        harness.fake.script().accept_connect = false;
        harness.event(ClientEvent::Loaded);
        harness.handle.initialize(credential()).unwrap();
        settle().await;

        assert!(matches!(
            harness.drain().as_slice(),
            [Message::Error {
                category: ErrorCategory::Initialization,
                ..
            }]
        ));

        harness.fake.script().accept_connect = true;
        let reply = harness.handle.command(Command::Connect).await;
        assert_eq!(reply, Reply::ok());
        assert_eq!(harness.fake.count(&Call::Connect), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_keeps_device_and_rejects_play() {
        let mut harness = Harness::ready().await;
        harness.event(ClientEvent::NotReady {
            device_id: DEVICE_ID.to_owned(),
        });
        settle().await;
        assert_eq!(
            harness.drain(),
            vec![Message::NotReady {
                device_id: DEVICE_ID.to_owned()
            }]
        );

        let reply = harness
            .handle
            .command(Command::Play {
                uris: vec![TRACK.to_owned()],
            })
            .await;
        assert_eq!(reply.error.as_deref(), Some("NotReadyError"));

        // Pause only needs a player instance.
        let reply = harness.handle.command(Command::Pause).await;
        assert!(reply.success);
    }

    #[tokio::test(start_paused = true)]
    async fn authentication_error_is_fatal_until_reinitialized() {
        let mut harness = Harness::ready().await;
        harness.event(ClientEvent::PlayerStateChanged(Some(native("a", false, 0))));
        harness.event(ClientEvent::AuthenticationError("token expired".to_owned()));
        time::sleep(Duration::from_millis(600)).await;

        assert_eq!(
            harness.drain(),
            vec![Message::Error {
                category: ErrorCategory::Authentication,
                message: "token expired".to_owned(),
            }]
        );

        let reply = harness.handle.command(Command::Pause).await;
        assert_eq!(reply.error.as_deref(), Some("NotReadyError"));

        harness.handle.initialize(credential()).unwrap();
        settle().await;
        assert_eq!(
            harness.drain(),
            vec![Message::Ready {
                device_id: DEVICE_ID.to_owned()
            }]
        );
        assert_eq!(harness.fake.count(&Call::Create), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn playback_error_is_not_fatal() {
        let mut harness = Harness::ready().await;
        harness.event(ClientEvent::PlaybackError("cannot play".to_owned()));
        settle().await;

        assert!(matches!(
            harness.drain().as_slice(),
            [Message::Error {
                category: ErrorCategory::Playback,
                ..
            }]
        ));
        assert!(harness.handle.command(Command::Resume).await.success);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_silences_pending_updates() {
        let mut harness = Harness::ready().await;
        harness.fake.set_state(Some(native("a", false, 10_000)));
        harness.event(ClientEvent::PlayerStateChanged(Some(native("b", false, 0))));
        settle().await;

        harness.handle.dispose();
        time::sleep(Duration::from_secs(5)).await;

        assert!(harness.drain().is_empty());
        assert_eq!(harness.fake.count(&Call::Disconnect), 1);
        assert_eq!(harness.messages.recv().await, None);

        let reply = harness.handle.command(Command::GetState).await;
        assert_eq!(reply.error.as_deref(), Some("NotReadyError"));
        assert!(harness.handle.initialize(credential()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handles_disposes() {
        let Harness {
            handle,
            fake,
            mut messages,
            events: _events,
        } = Harness::start();
        drop(handle);
        settle().await;

        assert_eq!(fake.count(&Call::Disconnect), 1);
        assert_eq!(messages.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_cancels_pending_update() {
        let mut state = ReconciliationState::new(&Config::default());
        state.session.client_loaded();
        state.session.supply_credential();

        assert_eq!(state.react(ClientEvent::PlayerStateChanged(None)), Reaction::Nothing);
        assert!(state.throttle.is_armed());

        let reaction = state.react(ClientEvent::AccountError("premium required".to_owned()));
        assert!(matches!(reaction, Reaction::Send(Message::Error { .. })));
        assert!(!state.throttle.is_armed());
        assert!(!state.session.has_client());
    }
}
