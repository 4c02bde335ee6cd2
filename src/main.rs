use droid_toolbox::console;
use droid_toolbox::domain::input::InputState;
use droid_toolbox::domain::models::{AppEvent, SessionState};
use droid_toolbox::domain::settings::SettingsService;
use droid_toolbox::infrastructure::bluetooth::bluetoothctl::BluetoothCtl;
use droid_toolbox::infrastructure::logging;
use droid_toolbox::{DroidToolbox, Flow};
use crossbeam_channel::{Receiver, TryRecvError};
use spin_sleep::SpinSleeper;
use std::io::BufRead;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Read stdin on a helper thread so the control loop never blocks on it
fn spawn_console_reader() -> anyhow::Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("console-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn main() -> anyhow::Result<()> {
    let mut settings_service = SettingsService::new()?;

    let _logging_guard = logging::init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Droid Toolbox");
    info!("Settings: {}", settings_service.path().display());

    let settings = settings_service.get().clone();
    let advertiser = match BluetoothCtl::spawn(settings.response_buffer_capacity) {
        Ok(ctl) => {
            if !ctl.power_on() {
                warn!("Adapter did not report powered");
            }
            Some(Arc::new(ctl))
        }
        Err(e) => {
            warn!("Beacons unavailable: {}", e);
            None
        }
    };

    let input = InputState::new();
    let discovery = advertiser.clone();
    let mut app = DroidToolbox::new(&settings, advertiser);
    let lines = spawn_console_reader()?;

    let period = Duration::from_secs_f64(1.0 / settings.control_tick_hz.clamp(1.0, 1000.0));
    let sleeper = SpinSleeper::default();
    let mut next_tick = Instant::now() + period;

    println!("{}", console::HELP);

    'control: loop {
        loop {
            match lines.try_recv() {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => match console::parse(&line) {
                    Ok(command) => {
                        if app.execute(command, &input) == Flow::Quit {
                            break 'control;
                        }
                    }
                    Err(e) => println!("{}", e),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'control,
            }
        }

        if let Some(ctl) = &discovery {
            for line in ctl.responses().drain() {
                if let Some(device) = app.ingest_discovery_line(&line) {
                    println!("found {} ({})", device.name, device.address);
                }
            }
        }

        for event in app.tick(&input) {
            match event {
                AppEvent::SessionState(SessionState::Connected) => println!("connected"),
                AppEvent::SessionState(SessionState::Lost) => println!("connection lost"),
                _ => {}
            }
        }

        if let Some(status) = app.take_status() {
            println!("{}", status.message);
        }

        let now = Instant::now();
        if next_tick > now {
            sleeper.sleep(next_tick - now);
            next_tick += period;
        } else {
            // Overran; re-anchor instead of bursting to catch up
            next_tick = now + period;
        }
    }

    app.shutdown();

    let profile = app.profile().name;
    if settings_service.get().default_profile != profile {
        settings_service.get_mut().default_profile = profile.to_string();
        if let Err(e) = settings_service.save() {
            warn!("Failed to save settings: {}", e);
        }
    }

    info!("Droid Toolbox stopped");
    Ok(())
}
