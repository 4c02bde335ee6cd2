//! Droid control engine
//!
//! Owns everything the control loop touches: the connection manager, the
//! motion shaper, the beacon broadcaster and the user-facing status. The
//! loop calls [`DroidToolbox::tick`] at a fixed rate and feeds console
//! commands through [`DroidToolbox::execute`].

use crate::console::{ConsoleCommand, HELP};
use crate::domain::catalog;
use crate::domain::input::InputState;
use crate::domain::models::{
    AppEvent, MessageSeverity, PeerAddress, ScannedDevice, SessionState, StatusMessage,
};
use crate::domain::profiles::{self, ControllerProfile};
use crate::domain::scan::{self, ScanResults};
use crate::domain::settings::Settings;
use crate::domain::shaper::{MotionShaper, RemoteAction};
use crate::infrastructure::beacon::{BeaconBroadcaster, BeaconStatus};
use crate::infrastructure::bluetooth::bluetoothctl::AdvertisingControl;
use crate::infrastructure::bluetooth::link::RadioLink;
use crate::infrastructure::bluetooth::session::ConnectError;
use crate::infrastructure::bluetooth::ConnectionManager;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Snapshot of what the engine exposes outward
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub state: SessionState,
    pub droid: Option<String>,
    pub peer: Option<PeerAddress>,
    pub profile: &'static str,
    pub remote_active: bool,
    pub beacon: Option<BeaconStatus>,
    pub last_error: Option<String>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "session : {}", self.state)?;
        match (&self.droid, &self.peer) {
            (Some(droid), Some(peer)) => writeln!(f, "droid   : {} ({})", droid, peer)?,
            _ => writeln!(f, "droid   : -")?,
        }
        writeln!(
            f,
            "remote  : {} ({})",
            if self.remote_active { "on" } else { "off" },
            self.profile
        )?;
        match &self.beacon {
            Some(beacon) => writeln!(
                f,
                "beacon  : {} [{}]",
                beacon.label,
                beacon.payload.as_deref().unwrap_or("-")
            )?,
            None => writeln!(f, "beacon  : unavailable")?,
        }
        write!(f, "error   : {}", self.last_error.as_deref().unwrap_or("-"))
    }
}

pub struct DroidToolbox<A: AdvertisingControl> {
    connection: ConnectionManager,
    shaper: MotionShaper,
    remote_active: bool,
    advertiser: Option<Arc<A>>,
    beacon: Option<BeaconBroadcaster<A>>,
    scan_results: ScanResults,
    status: Option<StatusMessage>,
}

impl<A: AdvertisingControl> DroidToolbox<A> {
    pub fn new(settings: &Settings, advertiser: Option<Arc<A>>) -> Self {
        let profile = profiles::find_profile(&settings.default_profile).unwrap_or_else(|| {
            warn!(
                "Unknown profile '{}', using {}",
                settings.default_profile,
                profiles::default_profile()
            );
            profiles::default_profile()
        });

        Self {
            connection: ConnectionManager::from_settings(settings),
            shaper: MotionShaper::new(profile),
            remote_active: false,
            beacon: advertiser.clone().map(BeaconBroadcaster::new),
            advertiser,
            scan_results: ScanResults::new(),
            status: None,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn profile(&self) -> &'static ControllerProfile {
        self.shaper.profile()
    }

    pub fn is_remote_active(&self) -> bool {
        self.remote_active
    }

    pub fn last_status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    /// Hand the pending status line to the caller, once
    pub fn take_status(&mut self) -> Option<StatusMessage> {
        self.status.take()
    }

    pub fn scan_results(&self) -> &ScanResults {
        &self.scan_results
    }

    fn set_status(&mut self, message: impl Into<String>, severity: MessageSeverity) {
        let message = StatusMessage::new(message, severity);
        match severity {
            MessageSeverity::Error => error!("{}", message.message),
            MessageSeverity::Warning => warn!("{}", message.message),
            _ => info!("{}", message.message),
        }
        self.status = Some(message);
    }

    /// Connect to `peer`, taking name and profile from discovery when known
    pub fn connect(&mut self, peer: PeerAddress, name: Option<String>) -> Result<(), ConnectError> {
        let scanned = self.scan_results.find(&peer);
        if let Some(device) = &scanned {
            if !self.remote_active {
                if let Some(profile) = profiles::find_profile(&device.controller_profile) {
                    self.shaper.set_profile(profile);
                }
            }
        }
        let name = name
            .or_else(|| scanned.map(|d| d.name))
            .unwrap_or_else(|| peer.to_string());
        self.connection.connect(peer, &name)
    }

    pub fn connect_with<L: RadioLink>(
        &mut self,
        peer: PeerAddress,
        name: &str,
        link: L,
    ) -> Result<(), ConnectError> {
        self.connection.connect_with(peer, name, link)
    }

    pub fn disconnect(&mut self) {
        self.leave_remote();
        self.connection.disconnect();
    }

    pub fn play_audio(&self, group: u8, clip: u8) -> bool {
        self.connection.play_audio(group, clip)
    }

    pub fn run_script(&self, id: u8) -> bool {
        if !(1..=catalog::SCRIPT_COUNT).contains(&id) {
            warn!("No script {} (1-{})", id, catalog::SCRIPT_COUNT);
            return false;
        }
        self.connection.run_script(id)
    }

    pub fn set_profile(&mut self, name: &str) -> bool {
        match profiles::find_profile(name) {
            Some(profile) => {
                if self.remote_active {
                    self.send_stops();
                }
                self.shaper.set_profile(profile);
                info!("Controller profile set to {}", profile);
                true
            }
            None => false,
        }
    }

    pub fn enter_remote(&mut self) -> bool {
        if !self.connection.is_connected() {
            return false;
        }
        self.shaper.set_profile(self.shaper.profile());
        self.remote_active = true;
        info!("Remote control active ({})", self.shaper.profile());
        true
    }

    /// Leave remote control, stopping every motor
    pub fn leave_remote(&mut self) {
        if !self.remote_active {
            return;
        }
        self.remote_active = false;
        self.send_stops();
        info!("Remote control released");
    }

    fn send_stops(&mut self) {
        for command in self.shaper.stop_all() {
            self.connection.submit(command);
        }
    }

    /// Toggle discovery through the advertising control surface
    pub fn scan(&mut self, on: bool) -> bool {
        let Some(advertiser) = &self.advertiser else {
            return false;
        };
        if on {
            self.scan_results.clear();
            advertiser.send_line("scan on");
        } else {
            advertiser.send_line("scan off");
            advertiser.send_line("devices");
        }
        true
    }

    /// Feed one line of discovery output; returns the droid it named, if any
    pub fn ingest_discovery_line(&self, line: &str) -> Option<ScannedDevice> {
        let device = scan::parse_device_line(line)?;
        self.scan_results.upsert(device.clone());
        Some(device)
    }

    pub fn beacon_location(&mut self, key: u8) -> Result<String, String> {
        let location = catalog::find_location(key).ok_or_else(|| format!("No location {}", key))?;
        let beacon = self.beacon.as_mut().ok_or("Advertising is unavailable")?;
        beacon.activate_location(location.zone, location.cooldown);
        Ok(location.name.to_string())
    }

    pub fn beacon_droid(&mut self, faction_key: u8, slot: u8) -> Result<String, String> {
        let faction =
            catalog::find_faction(faction_key).ok_or_else(|| format!("No faction {}", faction_key))?;
        let droid = faction
            .personality(slot)
            .ok_or_else(|| format!("No droid {} for {}", slot, faction.name))?;
        let beacon = self.beacon.as_mut().ok_or("Advertising is unavailable")?;
        beacon.activate_droid(droid.id, faction.id);
        Ok(format!("{} ({})", droid.name, faction.name))
    }

    pub fn beacon_stop(&mut self) {
        if let Some(beacon) = self.beacon.as_mut() {
            beacon.stop();
        }
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            state: self.connection.state(),
            droid: self.connection.active_name().map(str::to_string),
            peer: self.connection.active_peer().cloned(),
            profile: self.shaper.profile().name,
            remote_active: self.remote_active,
            beacon: self.beacon.as_ref().map(BeaconBroadcaster::status),
            last_error: self.connection.last_error().map(str::to_string),
        }
    }

    /// One control-loop step: drain dispatch events, then shape input
    pub fn tick(&mut self, input: &InputState) -> Vec<AppEvent> {
        input.update_smoothing();

        let events = self.connection.poll_events();
        for event in &events {
            match event {
                AppEvent::SessionState(SessionState::Lost | SessionState::Idle) => {
                    if self.remote_active {
                        self.remote_active = false;
                        self.shaper.set_profile(self.shaper.profile());
                    }
                }
                AppEvent::ConnectFailed(_) => {
                    if let Some(message) = self.connection.last_error() {
                        let message = message.to_string();
                        self.set_status(message, MessageSeverity::Error);
                    }
                }
                AppEvent::LogMessage(message) => {
                    self.status = Some(message.clone());
                }
                AppEvent::SessionState(_) => {}
            }
        }

        if self.remote_active && self.connection.is_connected() {
            for action in self.shaper.process(input) {
                match action {
                    RemoteAction::Send(command) => {
                        self.connection.submit(command);
                    }
                    RemoteAction::PlayAudio { group, clip } => {
                        self.connection.play_audio(group, clip);
                    }
                }
            }
        }

        events
    }

    /// Apply one console command
    pub fn execute(&mut self, command: ConsoleCommand, input: &InputState) -> Flow {
        match command {
            ConsoleCommand::Connect { peer, name } => {
                if let Err(e) = self.connect(peer, name) {
                    self.set_status(format!("Connection Error: {}", e), MessageSeverity::Error);
                }
            }
            ConsoleCommand::Disconnect => self.disconnect(),
            ConsoleCommand::Audio { group, clip } => {
                if !self.play_audio(group, clip) {
                    self.set_status("Audio ignored: not connected", MessageSeverity::Warning);
                } else {
                    info!(
                        "Audio {} ({}) clip {}",
                        group,
                        catalog::audio_group_name(group),
                        clip
                    );
                }
            }
            ConsoleCommand::Script(id) => {
                if !self.run_script(id) {
                    self.set_status(format!("Script {} not sent", id), MessageSeverity::Warning);
                }
            }
            ConsoleCommand::Profile(name) => {
                if !self.set_profile(&name) {
                    self.set_status(format!("Unknown profile '{}'", name), MessageSeverity::Warning);
                }
            }
            ConsoleCommand::Axis { axis, value } => input.set_axis_float(axis, value),
            ConsoleCommand::Press(button) => input.press(button),
            ConsoleCommand::Release(button) => input.release(button),
            ConsoleCommand::Remote(true) => {
                if !self.enter_remote() {
                    self.set_status("Remote needs a connected droid", MessageSeverity::Warning);
                } else {
                    input.clear_pressed();
                    let profile = self.profile();
                    let mut hints = profile
                        .hints()
                        .into_iter()
                        .map(|(channel, label)| format!("{}={}", channel, label))
                        .collect::<Vec<_>>()
                        .join(" ");
                    if profile.uses_triggers() {
                        hints.push_str(" (R2 forward, L2 reverse)");
                    }
                    self.set_status(format!("Remote on: {}", hints), MessageSeverity::Info);
                }
            }
            ConsoleCommand::Remote(false) => self.leave_remote(),
            ConsoleCommand::Scan(on) => {
                if !self.scan(on) {
                    self.set_status("Scanning is unavailable", MessageSeverity::Warning);
                }
            }
            ConsoleCommand::Devices => {
                let devices = self.scan_results.snapshot();
                if devices.is_empty() {
                    println!("no droids seen");
                }
                for device in devices {
                    println!(
                        "{}  {}  [{}]",
                        device.address,
                        device.name,
                        device.controller_profile
                    );
                }
            }
            ConsoleCommand::BeaconLocation(key) => match self.beacon_location(key) {
                Ok(label) => self.set_status(format!("Beacon: {}", label), MessageSeverity::Success),
                Err(e) => self.set_status(e, MessageSeverity::Warning),
            },
            ConsoleCommand::BeaconDroid { faction, slot } => match self.beacon_droid(faction, slot) {
                Ok(label) => self.set_status(format!("Beacon: {}", label), MessageSeverity::Success),
                Err(e) => self.set_status(e, MessageSeverity::Warning),
            },
            ConsoleCommand::BeaconStop => self.beacon_stop(),
            ConsoleCommand::Status => println!("{}", self.status_report()),
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    /// Release motors, stop advertising and close the session
    pub fn shutdown(&mut self) {
        self.leave_remote();
        if let Some(beacon) = self.beacon.as_mut() {
            if beacon.is_running() {
                beacon.stop();
            }
        }
        self.connection.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profiles::Axis;
    use crate::infrastructure::bluetooth::protocol::{self, Command, MotorId};
    use crate::infrastructure::bluetooth::session::tests::FakeLink;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Lines(Mutex<Vec<String>>);

    impl AdvertisingControl for Lines {
        fn send_line(&self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    fn wait_until(app: &mut DroidToolbox<Lines>, input: &InputState, state: SessionState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while app.connection().state() != state {
            assert!(Instant::now() < deadline, "never reached {}", state);
            app.tick(input);
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_remote_requires_connection() {
        let mut app = DroidToolbox::<Lines>::new(&Settings::default(), None);
        let input = InputState::new();
        assert_eq!(app.execute(ConsoleCommand::Remote(true), &input), Flow::Continue);
        assert!(!app.is_remote_active());
        assert_eq!(
            app.last_status().map(|s| s.severity),
            Some(MessageSeverity::Warning)
        );
    }

    #[test]
    fn test_leaving_remote_stops_all_motors() {
        let mut app = DroidToolbox::<Lines>::new(&Settings::default(), None);
        let input = InputState::new();
        let (link, recorder) = FakeLink::new();
        app.connect_with(PeerAddress::new("AA:BB:CC:DD:EE:FF"), "R2", link)
            .unwrap();
        wait_until(&mut app, &input, SessionState::Connected);

        assert!(app.enter_remote());
        input.set_axis_float(Axis::LeftY, -1.0);
        app.tick(&input);
        app.leave_remote();
        app.disconnect();
        wait_until(&mut app, &input, SessionState::Idle);

        let frames: Vec<Vec<u8>> = recorder.writes().into_iter().map(|(_, f)| f).collect();
        let stops: Vec<Vec<u8>> = MotorId::ALL
            .into_iter()
            .map(|m| Command::stop(m).encode())
            .collect();
        assert_eq!(&frames[frames.len() - 3..], stops.as_slice());
        assert!(frames.contains(&protocol::build_motor(
            MotorId::Left,
            protocol::Direction::Forward,
            1.0
        )
        .to_vec()));
    }

    #[test]
    fn test_script_range_and_status() {
        let mut app = DroidToolbox::<Lines>::new(&Settings::default(), None);
        let input = InputState::new();
        let (link, recorder) = FakeLink::new();
        app.connect_with(PeerAddress::new("aa:bb:cc:dd:ee:ff"), "R2", link)
            .unwrap();
        wait_until(&mut app, &input, SessionState::Connected);

        assert!(!app.run_script(0));
        assert!(!app.run_script(catalog::SCRIPT_COUNT + 1));
        assert!(app.run_script(catalog::SCRIPT_COUNT));

        let report = app.status_report();
        assert_eq!(report.peer, Some(PeerAddress::new("AA:BB:CC:DD:EE:FF")));
        assert!(report.to_string().contains("R2 (AA:BB:CC:DD:EE:FF)"));

        app.disconnect();
        wait_until(&mut app, &input, SessionState::Idle);
        let scripts = recorder
            .writes()
            .into_iter()
            .filter(|(_, f)| f.starts_with(&[0x25, 0x00, 0x0C, 0x42]))
            .count();
        assert_eq!(scripts, 1);
    }

    #[test]
    fn test_beacon_commands() {
        let lines = Arc::new(Lines::default());
        let mut app = DroidToolbox::new(&Settings::default(), Some(lines.clone()));

        assert_eq!(app.beacon_location(5).as_deref(), Ok("Droid Depot"));
        assert_eq!(
            app.beacon_droid(3, 2).as_deref(),
            Ok("Black (BB-9E) (First Order)")
        );
        assert!(app.beacon_location(42).is_err());

        app.beacon_stop();
        let report = app.status_report();
        assert_eq!(report.beacon.map(|b| b.label), Some("None".to_string()));
        assert_eq!(
            lines.0.lock().unwrap().last().map(String::as_str),
            Some("advertise off")
        );
    }

    #[test]
    fn test_beacon_unavailable_without_advertiser() {
        let mut app = DroidToolbox::<Lines>::new(&Settings::default(), None);
        assert!(app.beacon_location(1).is_err());
        assert!(app.status_report().beacon.is_none());
    }

    #[test]
    fn test_scan_feeds_results() {
        let lines = Arc::new(Lines::default());
        let mut app = DroidToolbox::new(&Settings::default(), Some(lines.clone()));

        assert!(app.scan(true));
        assert!(app
            .ingest_discovery_line("[NEW] Device F4:12:FA:00:00:01 DROID")
            .is_some());
        assert!(app
            .ingest_discovery_line("[NEW] Device 11:22:33:44:55:66 Speaker")
            .is_none());
        assert!(app.scan(false));

        assert_eq!(app.scan_results().snapshot().len(), 1);
        assert_eq!(
            *lines.0.lock().unwrap(),
            vec!["scan on", "scan off", "devices"]
        );
        assert!(!DroidToolbox::<Lines>::new(&Settings::default(), None).scan(true));
    }

    #[test]
    fn test_unknown_default_profile_falls_back() {
        let settings = Settings {
            default_profile: "Hover".to_string(),
            ..Settings::default()
        };
        let mut app = DroidToolbox::<Lines>::new(&settings, None);
        assert_eq!(app.profile().name, "R-Arcade");
        assert!(app.set_profile("bb-racing"));
        assert_eq!(app.profile().name, "BB-Racing");
        assert!(!app.set_profile("hover"));
    }
}
