use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    // Console shares the terminal with the prompt, so it is quieter by default
    #[serde(default = "default_console_level")]
    pub console_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            console_level: default_console_level(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_console_level() -> String {
    "warn".to_string()
}
fn default_true() -> bool {
    true
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "droid_toolbox".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // BLE Settings
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_command_uuid")]
    pub ble_command_char_uuid: String,

    // Connection timing
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_overall_connect_timeout_ms")]
    pub overall_connect_timeout_ms: u64,
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,
    #[serde(default = "default_liveness_poll_ms")]
    pub liveness_poll_ms: u64,

    // Handshake. Three LOGON frames is what works on current firmware; it is
    // unconfirmed whether fewer would do.
    #[serde(default = "default_handshake_repeat")]
    pub handshake_repeat: u32,
    #[serde(default = "default_settle_ms")]
    pub handshake_spacing_ms: u64,

    // Audio timing
    #[serde(default = "default_settle_ms")]
    pub audio_settle_ms: u64,
    #[serde(default = "default_audio_cooldown_ms")]
    pub audio_cooldown_ms: u64,

    // Script ids that are never sent. Some firmware builds leave the motors
    // engaged after script 19; whether that holds everywhere is unknown.
    #[serde(default)]
    pub script_denylist: Vec<u8>,

    // Control loop
    #[serde(default = "default_control_tick_hz")]
    pub control_tick_hz: f64,
    #[serde(default = "default_profile")]
    pub default_profile: String,

    // Advertising surface
    #[serde(default = "default_response_buffer_capacity")]
    pub response_buffer_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            ble_service_uuid: default_service_uuid(),
            ble_command_char_uuid: default_command_uuid(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            overall_connect_timeout_ms: default_overall_connect_timeout_ms(),
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            liveness_poll_ms: default_liveness_poll_ms(),
            handshake_repeat: default_handshake_repeat(),
            handshake_spacing_ms: default_settle_ms(),
            audio_settle_ms: default_settle_ms(),
            audio_cooldown_ms: default_audio_cooldown_ms(),
            script_denylist: Vec::new(),
            control_tick_hz: default_control_tick_hz(),
            default_profile: default_profile(),
            response_buffer_capacity: default_response_buffer_capacity(),
        }
    }
}

fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_command_uuid() -> String {
    protocol::COMMAND_CHAR_UUID.to_string()
}
fn default_discovery_timeout_ms() -> u64 {
    5_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_overall_connect_timeout_ms() -> u64 {
    15_000
}
fn default_disconnect_timeout_ms() -> u64 {
    3_000
}
fn default_liveness_poll_ms() -> u64 {
    500
}
fn default_handshake_repeat() -> u32 {
    3
}
fn default_settle_ms() -> u64 {
    100
}
fn default_audio_cooldown_ms() -> u64 {
    200
}
fn default_control_tick_hz() -> f64 {
    60.0
}
fn default_profile() -> String {
    "R-Arcade".to_string()
}
fn default_response_buffer_capacity() -> usize {
    500
}

/// Timing and addressing used by one transport session
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub service_uuid: String,
    pub command_char_uuid: String,
    pub discovery_timeout: Duration,
    pub connect_timeout: Duration,
    pub overall_connect_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub liveness_poll: Duration,
    pub handshake_repeat: u32,
    pub handshake_spacing: Duration,
    pub audio_settle: Duration,
    pub audio_cooldown: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ConnectionConfig {
    fn from(s: &Settings) -> Self {
        Self {
            service_uuid: s.ble_service_uuid.clone(),
            command_char_uuid: s.ble_command_char_uuid.clone(),
            discovery_timeout: Duration::from_millis(s.discovery_timeout_ms),
            connect_timeout: Duration::from_millis(s.connect_timeout_ms),
            overall_connect_timeout: Duration::from_millis(s.overall_connect_timeout_ms),
            disconnect_timeout: Duration::from_millis(s.disconnect_timeout_ms),
            liveness_poll: Duration::from_millis(s.liveness_poll_ms.max(1)),
            handshake_repeat: s.handshake_repeat.max(1),
            handshake_spacing: Duration::from_millis(s.handshake_spacing_ms),
            audio_settle: Duration::from_millis(s.audio_settle_ms),
            audio_cooldown: Duration::from_millis(s.audio_cooldown_ms),
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit path, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("DroidToolbox");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "handshake_repeat": 5, "script_denylist": [19] }"#).unwrap();
        assert_eq!(settings.handshake_repeat, 5);
        assert_eq!(settings.script_denylist, vec![19]);
        assert_eq!(settings.discovery_timeout_ms, 5_000);
        assert_eq!(settings.ble_command_char_uuid, protocol::COMMAND_CHAR_UUID);
        assert_eq!(settings.log_settings.level, "info");
        assert_eq!(settings.log_settings.console_level, "warn");
    }

    #[test]
    fn test_connection_config_from_settings() {
        let config = ConnectionConfig::default();
        assert_eq!(config.discovery_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.liveness_poll, Duration::from_millis(500));
        assert_eq!(config.handshake_repeat, 3);
        assert_eq!(config.audio_settle, Duration::from_millis(100));
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!(
            "droid_toolbox_settings_{}.json",
            std::process::id()
        ));
        let mut service = SettingsService::with_path(path.clone());
        service.get_mut().default_profile = "BB-Arcade".to_string();
        service.save().unwrap();

        let reloaded = SettingsService::with_path(path.clone());
        assert_eq!(reloaded.get().default_profile, "BB-Arcade");
        let _ = fs::remove_file(path);
    }
}
