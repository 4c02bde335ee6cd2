//! Bluetooth Service Module
//!
//! The control loop is synchronous; the radio stack is async. Each session
//! gets its own OS thread running a current-thread tokio runtime, and the
//! control loop talks to it only through an unbounded request channel. State
//! changes come back on an event channel that the loop drains every tick.

use crate::domain::models::{AppEvent, MessageSeverity, PeerAddress, SessionState, StatusMessage};
use crate::domain::settings::{ConnectionConfig, Settings};
use crate::infrastructure::bluetooth::btle::BtleplugLink;
use crate::infrastructure::bluetooth::link::{LinkError, RadioLink};
use crate::infrastructure::bluetooth::protocol::Command;
use crate::infrastructure::bluetooth::session::{ConnectError, Session, SessionStateCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Work handed from the control loop to the dispatch thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatchRequest {
    Send(Command),
    PlayAudio { group: u8, clip: u8 },
    Disconnect,
}

/// Event channel tagged with the generation of the session that owns it
///
/// A new connect bumps the generation, so anything a finished session still
/// had in flight is recognisable as stale.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, AppEvent)>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, AppEvent)>) -> Self {
        Self { generation, tx }
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.tx.send((self.generation, event));
    }

    fn log(&self, message: String, severity: MessageSeverity) {
        self.emit(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }
}

/// Per-session dispatch thread
pub struct DispatchBridge {
    requests: mpsc::UnboundedSender<DispatchRequest>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchBridge {
    pub fn spawn<L: RadioLink>(
        peer: PeerAddress,
        link: L,
        config: ConnectionConfig,
        state: SessionStateCell,
        events: EventSink,
    ) -> std::io::Result<Self> {
        let (requests, rx) = mpsc::unbounded_channel();

        let handle = std::thread::Builder::new()
            .name("droid-dispatch".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to create tokio runtime for dispatch: {}", e);
                        state.set(SessionState::Idle);
                        events.emit(AppEvent::ConnectFailed(format!("Connection Error: {}", e)));
                        events.emit(AppEvent::SessionState(SessionState::Idle));
                        return;
                    }
                };

                let session = Arc::new(Session::new(peer, link, state, config.clone()));
                rt.block_on(run_session(session, rx, events, config));
            })?;

        Ok(Self {
            requests,
            handle: Some(handle),
        })
    }

    pub fn submit(&self, request: DispatchRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Ask the thread to disconnect and wait for it to exit
    pub fn shutdown(mut self) {
        let _ = self.requests.send(DispatchRequest::Disconnect);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Dispatch thread panicked");
            }
        }
    }
}

impl Drop for DispatchBridge {
    fn drop(&mut self) {
        let _ = self.requests.send(DispatchRequest::Disconnect);
    }
}

/// Run `establish` under the overall timeout while still listening for a
/// disconnect. `None` means the attempt was cancelled.
async fn establish_or_cancel<L: RadioLink>(
    session: &Session<L>,
    requests: &mut mpsc::UnboundedReceiver<DispatchRequest>,
    config: &ConnectionConfig,
) -> Option<Result<(), ConnectError>> {
    let establish = timeout(config.overall_connect_timeout, session.establish());
    tokio::pin!(establish);

    loop {
        tokio::select! {
            outcome = &mut establish => {
                return Some(outcome.unwrap_or(Err(ConnectError::OverallTimeout)));
            }
            request = requests.recv() => match request {
                Some(DispatchRequest::Disconnect) | None => return None,
                Some(other) => debug!("Dropping {:?}, still connecting", other),
            },
        }
    }
}

async fn run_session<L: RadioLink>(
    session: Arc<Session<L>>,
    mut requests: mpsc::UnboundedReceiver<DispatchRequest>,
    events: EventSink,
    config: ConnectionConfig,
) {
    events.emit(AppEvent::SessionState(SessionState::Connecting));

    // The establish future (and the link lock it holds) is gone by the time
    // this match runs, so release can take the link.
    match establish_or_cancel(&session, &mut requests, &config).await {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            if matches!(e, ConnectError::OverallTimeout) {
                release(&session, &config).await;
            }
            error!("Connection failed: {}", e);
            events.emit(AppEvent::ConnectFailed(e.to_string()));
            events.emit(AppEvent::SessionState(SessionState::Idle));
            return;
        }
        None => {
            info!("Connect to {} cancelled", session.peer());
            release(&session, &config).await;
            events.emit(AppEvent::SessionState(SessionState::Idle));
            events.log("Connection cancelled".to_string(), MessageSeverity::Info);
            return;
        }
    }

    events.emit(AppEvent::SessionState(SessionState::Connected));
    events.log(
        format!("Connected to {}", session.peer()),
        MessageSeverity::Success,
    );

    let audio_busy = Arc::new(AtomicBool::new(false));
    let mut liveness = interval(config.liveness_poll);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);
    liveness.tick().await;

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(DispatchRequest::Send(command)) => {
                    session.send(&command).await;
                }
                Some(DispatchRequest::PlayAudio { group, clip }) => {
                    if audio_busy.swap(true, Ordering::SeqCst) {
                        debug!("Audio in progress, dropping G{}C{}", group, clip);
                        continue;
                    }
                    let session = session.clone();
                    let busy = audio_busy.clone();
                    let cooldown = config.audio_cooldown;
                    tokio::spawn(async move {
                        if !session.play_audio(group, clip).await {
                            debug!("Audio G{}C{} not fully written", group, clip);
                        }
                        sleep(cooldown).await;
                        busy.store(false, Ordering::SeqCst);
                    });
                }
                Some(DispatchRequest::Disconnect) | None => {
                    release(&session, &config).await;
                    events.emit(AppEvent::SessionState(SessionState::Idle));
                    events.log("Disconnected from droid".to_string(), MessageSeverity::Info);
                    break;
                }
            },
            _ = liveness.tick() => {
                if !session.link_alive().await {
                    session.mark_lost();
                    events.emit(AppEvent::SessionState(SessionState::Lost));
                    events.log(
                        format!("Lost connection to {}", session.peer()),
                        MessageSeverity::Warning,
                    );
                    release(&session, &config).await;
                    events.emit(AppEvent::SessionState(SessionState::Idle));
                    break;
                }
            }
        }
    }

    info!("Dispatch loop for {} finished", session.peer());
}

/// Disconnect within the bounded timeout, force releasing on expiry
async fn release<L: RadioLink>(session: &Session<L>, config: &ConnectionConfig) {
    if timeout(config.disconnect_timeout, session.disconnect())
        .await
        .is_err()
    {
        warn!("Disconnect timed out after {:?}", config.disconnect_timeout);
        session.force_release();
    }
}

/// Synchronous connection API used by the control loop
pub struct ConnectionManager {
    config: ConnectionConfig,
    script_denylist: Vec<u8>,
    state: SessionStateCell,
    bridge: Option<DispatchBridge>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<(u64, AppEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, AppEvent)>,
    last_error: Option<String>,
    active: Option<(PeerAddress, String)>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, script_denylist: Vec<u8>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            script_denylist,
            state: SessionStateCell::new(),
            bridge: None,
            generation: 0,
            events_tx,
            events_rx,
            last_error: None,
            active: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            ConnectionConfig::from(settings),
            settings.script_denylist.clone(),
        )
    }

    /// Connect over the platform radio
    pub fn connect(&mut self, peer: PeerAddress, name: &str) -> Result<(), ConnectError> {
        if self.state.get().is_busy() {
            return Err(ConnectError::Busy);
        }
        let link = BtleplugLink::new(&self.config).map_err(ConnectError::LinkOpen)?;
        self.connect_with(peer, name, link)
    }

    /// Start a connection over the given link. Rejected without side effects
    /// while another session is connecting, connected or closing.
    pub fn connect_with<L: RadioLink>(
        &mut self,
        peer: PeerAddress,
        name: &str,
        link: L,
    ) -> Result<(), ConnectError> {
        if !self.state.try_begin_connect() {
            warn!("Connect to {} rejected, session is {}", peer, self.state.get());
            return Err(ConnectError::Busy);
        }

        info!("Connecting to {} ({})", name, peer);
        self.last_error = None;
        // A previous bridge that already reached Idle is dropped here
        self.bridge = None;
        self.generation += 1;

        match DispatchBridge::spawn(
            peer.clone(),
            link,
            self.config.clone(),
            self.state.clone(),
            EventSink::new(self.generation, self.events_tx.clone()),
        ) {
            Ok(bridge) => {
                self.bridge = Some(bridge);
                self.active = Some((peer, name.to_string()));
                Ok(())
            }
            Err(e) => {
                self.state.set(SessionState::Idle);
                let err = ConnectError::LinkOpen(LinkError::Backend(e.to_string()));
                self.last_error = Some(format!("Connection Error: {}", err));
                Err(err)
            }
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(bridge) = &self.bridge {
            bridge.submit(DispatchRequest::Disconnect);
        }
        self.active = None;
    }

    /// Queue a frame. Dropped unless connected.
    pub fn submit(&self, command: Command) -> bool {
        self.submit_request(DispatchRequest::Send(command))
    }

    pub fn play_audio(&self, group: u8, clip: u8) -> bool {
        self.submit_request(DispatchRequest::PlayAudio { group, clip })
    }

    pub fn run_script(&self, id: u8) -> bool {
        if self.script_denylist.contains(&id) {
            warn!("Script {} is on the denylist", id);
            return false;
        }
        self.submit(Command::ScriptRun { id })
    }

    fn submit_request(&self, request: DispatchRequest) -> bool {
        if !self.is_connected() {
            debug!("Ignoring {:?}, not connected", request);
            return false;
        }
        self.bridge
            .as_ref()
            .is_some_and(|bridge| bridge.submit(request))
    }

    /// Drain pending events from the current dispatch thread. Events left
    /// over from an earlier session are discarded.
    pub fn poll_events(&mut self) -> Vec<AppEvent> {
        let mut drained = Vec::new();
        while let Ok((generation, event)) = self.events_rx.try_recv() {
            if generation != self.generation {
                debug!("Discarding stale event {:?}", event);
                continue;
            }
            match &event {
                AppEvent::ConnectFailed(message) => {
                    let name = self
                        .active
                        .as_ref()
                        .map_or("droid", |(_, name)| name.as_str());
                    self.last_error = Some(format!("Connection to {} failed: {}", name, message));
                    self.active = None;
                }
                AppEvent::SessionState(SessionState::Idle) => {
                    self.active = None;
                }
                _ => {}
            }
            drained.push(event);
        }

        if self.state.get() == SessionState::Idle
            && self.bridge.as_ref().is_some_and(DispatchBridge::is_finished)
        {
            self.bridge = None;
        }
        drained
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state.get() == SessionState::Connected
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_ref().map(|(_, name)| name.as_str())
    }

    pub fn active_peer(&self) -> Option<&PeerAddress> {
        self.active.as_ref().map(|(peer, _)| peer)
    }

    /// Disconnect and wait for the dispatch thread to exit
    pub fn shutdown(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.shutdown();
        }
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol;
    use crate::infrastructure::bluetooth::session::tests::{Call, FakeLink};
    use std::time::{Duration, Instant};

    fn manager() -> ConnectionManager {
        ConnectionManager::new(ConnectionConfig::default(), vec![19])
    }

    fn wait_for_state(manager: &mut ConnectionManager, wanted: SessionState) -> Vec<AppEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            seen.extend(manager.poll_events());
            if manager.state() == wanted {
                return seen;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("state never reached {}", wanted);
    }

    #[test]
    fn test_connect_rejects_second_request() {
        let mut manager = manager();
        let (link, _) = FakeLink::new();
        manager
            .connect_with(PeerAddress::new("AA:BB:CC:DD:EE:01"), "R2", link)
            .unwrap();

        let (link, recorder) = FakeLink::new();
        let second = manager.connect_with(PeerAddress::new("AA:BB:CC:DD:EE:02"), "BB", link);
        assert!(matches!(second, Err(ConnectError::Busy)));
        assert!(recorder.calls().is_empty());
        assert_eq!(manager.active_name(), Some("R2"));

        wait_for_state(&mut manager, SessionState::Connected);
        manager.shutdown();
        assert_eq!(manager.state(), SessionState::Idle);
    }

    #[test]
    fn test_commands_reach_link_in_order() {
        let mut manager = manager();
        let (link, recorder) = FakeLink::new();
        manager
            .connect_with(PeerAddress::new("AA:BB:CC:DD:EE:01"), "R2", link)
            .unwrap();
        wait_for_state(&mut manager, SessionState::Connected);

        assert!(manager.submit(Command::ScriptRun { id: 1 }));
        assert!(manager.submit(Command::ScriptRun { id: 2 }));
        assert!(!manager.run_script(19));
        manager.disconnect();
        wait_for_state(&mut manager, SessionState::Idle);

        let frames: Vec<Vec<u8>> = recorder.writes().into_iter().map(|(_, f)| f).collect();
        let tail = &frames[frames.len() - 2..];
        assert_eq!(tail[0], protocol::build_script(1).to_vec());
        assert_eq!(tail[1], protocol::build_script(2).to_vec());
        assert!(!manager.submit(Command::ScriptRun { id: 3 }));
    }

    #[test]
    fn test_audio_requests_dropped_while_busy() {
        let mut manager = manager();
        let (link, recorder) = FakeLink::new();
        manager
            .connect_with(PeerAddress::new("AA:BB:CC:DD:EE:01"), "R2", link)
            .unwrap();
        wait_for_state(&mut manager, SessionState::Connected);

        assert!(manager.play_audio(1, 1));
        assert!(manager.play_audio(2, 2));
        std::thread::sleep(Duration::from_millis(500));

        let selects = recorder
            .writes()
            .into_iter()
            .filter(|(_, f)| f.starts_with(&protocol::build_audio_group_select(0)[..7]))
            .count();
        assert_eq!(selects, 1);
        manager.shutdown();
    }

    #[test]
    fn test_link_loss_returns_to_idle() {
        let mut manager = manager();
        let (link, _) = FakeLink::new();
        let alive = link.alive.clone();
        manager
            .connect_with(PeerAddress::new("AA:BB:CC:DD:EE:01"), "R2", link)
            .unwrap();
        wait_for_state(&mut manager, SessionState::Connected);

        alive.store(false, Ordering::SeqCst);
        let events = wait_for_state(&mut manager, SessionState::Idle);
        assert!(events
            .iter()
            .any(|e| matches!(e, AppEvent::SessionState(SessionState::Lost))));

        std::thread::sleep(Duration::from_millis(100));
        manager.poll_events();
        assert_eq!(manager.active_name(), None);
    }

    #[test]
    fn test_overall_timeout_surfaces_one_error() {
        let config = ConnectionConfig {
            overall_connect_timeout: Duration::from_millis(200),
            ..ConnectionConfig::default()
        };
        let mut manager = ConnectionManager::new(config, Vec::new());
        let (mut link, _) = FakeLink::new();
        link.discover_delay = Duration::from_secs(2);
        manager
            .connect_with(PeerAddress::new("AA:BB:CC:DD:EE:01"), "R2", link)
            .unwrap();

        let events = wait_for_state(&mut manager, SessionState::Idle);
        let events = if events.iter().any(|e| matches!(e, AppEvent::ConnectFailed(_))) {
            events
        } else {
            // Idle may be observed before the failure event is drained
            std::thread::sleep(Duration::from_millis(100));
            manager.poll_events()
        };
        let failures = events
            .iter()
            .filter(|e| matches!(e, AppEvent::ConnectFailed(_)))
            .count();
        assert_eq!(failures, 1);
        assert!(manager.last_error().unwrap().contains("timed out"));
    }

    #[test]
    fn test_disconnect_cancels_pending_connect() {
        let mut manager = manager();
        let (mut link, recorder) = FakeLink::new();
        link.discover_delay = Duration::from_secs(4);
        manager
            .connect_with(PeerAddress::new("AA:BB:CC:DD:EE:01"), "R2", link)
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        manager.disconnect();
        wait_for_state(&mut manager, SessionState::Idle);
        assert!(started.elapsed() < Duration::from_secs(2));

        std::thread::sleep(Duration::from_millis(50));
        assert!(recorder.writes().is_empty());
        assert_eq!(recorder.calls(), vec![Call::Discover, Call::Close]);

        let (link, _) = FakeLink::new();
        manager
            .connect_with(PeerAddress::new("AA:BB:CC:DD:EE:02"), "BB", link)
            .unwrap();
        wait_for_state(&mut manager, SessionState::Connected);
        manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_close_is_force_released() {
        let (mut link, recorder) = FakeLink::new();
        link.close_delay = Duration::from_secs(10);
        let config = ConnectionConfig::default();
        let session = Session::new(
            PeerAddress::new("AA:BB:CC:DD:EE:01"),
            link,
            SessionStateCell::new(),
            config.clone(),
        );
        session.connect().await.unwrap();

        let started = tokio::time::Instant::now();
        release(&session, &config).await;
        let took = started.elapsed();

        assert_eq!(session.state(), SessionState::Idle);
        assert!(took >= config.disconnect_timeout);
        assert!(took < Duration::from_secs(10));
        assert!(!recorder.calls().contains(&Call::Close));
    }

    #[test]
    fn test_events_from_previous_session_are_ignored() {
        let config = ConnectionConfig {
            overall_connect_timeout: Duration::from_millis(100),
            ..ConnectionConfig::default()
        };
        let mut manager = ConnectionManager::new(config, Vec::new());
        let (mut link, _) = FakeLink::new();
        link.discover_delay = Duration::from_secs(2);
        manager
            .connect_with(PeerAddress::new("AA:BB:CC:DD:EE:01"), "R2", link)
            .unwrap();

        // Let the first attempt fail without draining its events
        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.state() != SessionState::Idle {
            assert!(Instant::now() < deadline, "first attempt never failed");
            std::thread::sleep(Duration::from_millis(10));
        }
        std::thread::sleep(Duration::from_millis(100));

        let (link, _) = FakeLink::new();
        manager
            .connect_with(PeerAddress::new("AA:BB:CC:DD:EE:02"), "BB", link)
            .unwrap();
        let events = wait_for_state(&mut manager, SessionState::Connected);

        assert!(!events.iter().any(|e| matches!(e, AppEvent::ConnectFailed(_))));
        assert_eq!(manager.last_error(), None);
        assert_eq!(manager.active_name(), Some("BB"));
        assert_eq!(manager.active_peer(), Some(&PeerAddress::new("AA:BB:CC:DD:EE:02")));
        manager.shutdown();
    }
}
