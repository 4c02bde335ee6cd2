use serde::{Deserialize, Serialize};
use std::fmt;

/// Hardware address of a droid as handed over by discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against an address reported by the radio stack
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of the single transport session
///
/// ```text
/// Idle -> Connecting -> Connected -> Disconnecting -> Idle
///         Connecting -> Failed -> Idle
///                       Connected -> Lost -> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
    Lost,
}

impl SessionState {
    /// States in which a new connect request must be rejected
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Disconnecting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
            Self::Failed => "Failed",
            Self::Lost => "Lost",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    SessionState(SessionState),
    ConnectFailed(String),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub address: PeerAddress,
    pub name: String,
    pub identity: Option<String>,
    pub controller_profile: String,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
