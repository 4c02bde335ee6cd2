//! Beacon Broadcaster
//!
//! Simulates a park location or another droid by advertising manufacturer
//! data. A background thread re-asserts the payload at a cadence that
//! depends on what is being simulated; the advertise sequence itself only
//! goes out when the payload differs from the one last sent.

use crate::domain::catalog;
use crate::infrastructure::bluetooth::bluetoothctl::AdvertisingControl;
use crate::infrastructure::bluetooth::protocol::{self, Command, HexBytes};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MIN_LOCATION_INTERVAL: Duration = Duration::from_secs(1);
const DROID_INTERVAL: Duration = Duration::from_secs(2);
const SECONDS_PER_COOLDOWN_UNIT: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconTarget {
    Location { zone: u8, cooldown: u8 },
    Droid { personality: u8, faction: u8 },
}

impl BeaconTarget {
    pub fn command(self) -> Command {
        match self {
            Self::Location { zone, cooldown } => Command::BeaconLocation { zone, cooldown },
            Self::Droid {
                personality,
                faction,
            } => Command::BeaconDroid {
                personality,
                faction,
            },
        }
    }

    pub fn payload(self) -> Vec<u8> {
        self.command().encode()
    }

    pub fn refresh_interval(self) -> Duration {
        match self {
            Self::Location { cooldown, .. } => MIN_LOCATION_INTERVAL
                .max(Duration::from_secs(u64::from(cooldown) * SECONDS_PER_COOLDOWN_UNIT)),
            Self::Droid { .. } => DROID_INTERVAL,
        }
    }

    /// Display name from the catalogs, falling back to raw ids
    pub fn label(self) -> String {
        match self {
            Self::Location { zone, cooldown } => catalog::LOCATIONS
                .iter()
                .find(|l| l.zone == zone && l.cooldown == cooldown)
                .or_else(|| catalog::location_for_zone(zone))
                .map(|l| l.name.to_string())
                .unwrap_or_else(|| format!("Zone 0x{:02X}", zone)),
            Self::Droid {
                personality,
                faction,
            } => catalog::faction_for_id(faction)
                .and_then(|f| f.droids.iter().find(|d| d.id == personality))
                .map(|d| d.name.to_string())
                .unwrap_or_else(|| format!("Droid 0x{:02X}", personality)),
        }
    }
}

#[derive(Debug, Default)]
struct BeaconState {
    label: Option<String>,
    target: Option<BeaconTarget>,
    last_sent: Option<Vec<u8>>,
    next_refresh_at: Option<Instant>,
}

/// What the broadcaster is doing right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconStatus {
    pub label: String,
    pub payload: Option<String>,
    pub interval: Option<Duration>,
    pub running: bool,
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct BeaconBroadcaster<A: AdvertisingControl> {
    control: Arc<A>,
    state: Arc<Mutex<BeaconState>>,
    worker: Option<Worker>,
}

impl<A: AdvertisingControl> BeaconBroadcaster<A> {
    pub fn new(control: Arc<A>) -> Self {
        Self {
            control,
            state: Arc::new(Mutex::new(BeaconState::default())),
            worker: None,
        }
    }

    pub fn activate_location(&mut self, zone: u8, cooldown: u8) {
        self.activate(BeaconTarget::Location { zone, cooldown });
    }

    pub fn activate_droid(&mut self, personality: u8, faction: u8) {
        self.activate(BeaconTarget::Droid {
            personality,
            faction,
        });
    }

    /// Replace any running loop with one for `target`
    pub fn activate(&mut self, target: BeaconTarget) {
        self.cancel();

        let label = target.label();
        let interval = target.refresh_interval();
        info!("Beacon active: {} (refresh every {:?})", label, interval);
        {
            let mut state = lock(&self.state);
            state.label = Some(label);
            state.target = Some(target);
            state.next_refresh_at = None;
        }

        let (stop, stop_rx) = bounded::<()>(1);
        let control = self.control.clone();
        let state = self.state.clone();
        let payload = target.payload();

        let spawned = std::thread::Builder::new()
            .name("beacon-refresh".to_string())
            .spawn(move || loop {
                publish(control.as_ref(), &state, &payload);
                lock(&state).next_refresh_at = Some(Instant::now() + interval);
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        match spawned {
            Ok(handle) => self.worker = Some(Worker { stop, handle }),
            Err(e) => {
                warn!("Failed to start beacon loop: {}", e);
                publish(self.control.as_ref(), &self.state, &target.payload());
            }
        }
    }

    /// Cancel the loop, disable advertising once and forget the payload
    pub fn stop(&mut self) {
        self.cancel();
        self.control.send_line("advertise off");
        *lock(&self.state) = BeaconState::default();
        info!("Beacon stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn status(&self) -> BeaconStatus {
        let state = lock(&self.state);
        BeaconStatus {
            label: state.label.clone().unwrap_or_else(|| "None".to_string()),
            payload: state
                .last_sent
                .as_deref()
                .map(|p| HexBytes(p).to_string()),
            interval: state.target.map(BeaconTarget::refresh_interval),
            running: self.worker.is_some(),
        }
    }

    pub fn next_refresh_at(&self) -> Option<Instant> {
        lock(&self.state).next_refresh_at
    }

    fn cancel(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            if worker.handle.join().is_err() {
                warn!("Beacon loop panicked");
            }
        }
    }
}

impl<A: AdvertisingControl> Drop for BeaconBroadcaster<A> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

fn lock(state: &Mutex<BeaconState>) -> MutexGuard<'_, BeaconState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Send the full clear-and-reassert sequence unless `payload` is already
/// the one on air. Returns whether anything was sent.
fn publish(control: &impl AdvertisingControl, state: &Mutex<BeaconState>, payload: &[u8]) -> bool {
    let mut state = lock(state);
    if state.last_sent.as_deref() == Some(payload) {
        return false;
    }

    let Some((id, data)) = protocol::manufacturer_arguments(payload) else {
        warn!("Beacon payload too short: {}", HexBytes(payload));
        return false;
    };

    debug!("Updating advertisement: id={} data={}", id, data);
    control.send_line("advertise off");
    control.send_line("menu advertise");
    control.send_line("clear");
    control.send_line(&format!("manufacturer {} {}", id, data));
    control.send_line("back");
    control.send_line("advertise on");

    state.last_sent = Some(payload.to_vec());
    true
}
