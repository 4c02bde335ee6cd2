use crate::domain::models::{PeerAddress, ScannedDevice};
use std::sync::{Mutex, PoisonError};

/// Profile suggested for a droid that has no stored preference
pub fn identity_profile_hint(identity: Option<&str>) -> &'static str {
    match identity {
        Some(identity) if identity.contains("BB-Series") => "BB-Arcade",
        _ => "R-Arcade",
    }
}

/// Pull a droid entry out of a `bluetoothctl` device line
///
/// Accepts both `Device <addr> <name>` listings and `[NEW] Device ...`
/// notifications; anything whose name is not a droid is ignored.
pub fn parse_device_line(line: &str) -> Option<ScannedDevice> {
    let start = line.find("Device ")?;
    let mut rest = line[start + "Device ".len()..].splitn(2, ' ');
    let address = rest.next()?;
    let name = rest.next()?.trim();

    if address.len() != 17 || address.matches(':').count() != 5 {
        return None;
    }
    if !name.to_uppercase().contains("DROID") {
        return None;
    }
    Some(ScannedDevice::discovered(PeerAddress::new(address), name, None))
}

/// Discovery results shared with the UI thread
///
/// Entries are keyed by address; readers always get their own copy.
#[derive(Default)]
pub struct ScanResults {
    devices: Mutex<Vec<ScannedDevice>>,
}

impl ScanResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a single entry keyed by address
    pub fn upsert(&self, device: ScannedDevice) {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        match devices.iter_mut().find(|d| d.address == device.address) {
            Some(existing) => *existing = device,
            None => devices.push(device),
        }
    }

    pub fn snapshot(&self) -> Vec<ScannedDevice> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find(&self, address: &PeerAddress) -> Option<ScannedDevice> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|d| &d.address == address)
            .cloned()
    }

    pub fn clear(&self) {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ScannedDevice {
    /// Build an entry from what discovery reported, hinting a profile
    pub fn discovered(address: PeerAddress, name: impl Into<String>, identity: Option<String>) -> Self {
        let controller_profile = identity_profile_hint(identity.as_deref()).to_string();
        Self {
            address,
            name: name.into(),
            identity,
            controller_profile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_hint() {
        assert_eq!(identity_profile_hint(Some("BB-Series (Default) (Scoundrel)")), "BB-Arcade");
        assert_eq!(identity_profile_hint(Some("Blue (R5-D4) (Scoundrel)")), "R-Arcade");
        assert_eq!(identity_profile_hint(None), "R-Arcade");
    }

    #[test]
    fn test_parse_device_line() {
        let device = parse_device_line("\x1b[0;92m[NEW]\x1b[0m Device f4:12:fa:01:02:03 DROID").unwrap();
        assert_eq!(device.address, PeerAddress::new("F4:12:FA:01:02:03"));
        assert_eq!(device.name, "DROID");
        assert_eq!(device.controller_profile, "R-Arcade");

        assert!(parse_device_line("Device F4:12:FA:01:02:03 Headphones").is_none());
        assert!(parse_device_line("[CHG] Device F4:12:FA:01:02:03 RSSI: -60").is_none());
        assert!(parse_device_line("Controller 00:11:22:33:44:55 host").is_none());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let results = ScanResults::new();
        let address = PeerAddress::new("aa:bb:cc:dd:ee:ff");
        results.upsert(ScannedDevice::discovered(address.clone(), "DROID", None));

        let mut copy = results.snapshot();
        copy.clear();
        assert_eq!(results.snapshot().len(), 1);

        results.upsert(ScannedDevice::discovered(
            address.clone(),
            "DROID",
            Some("BB-Series (Default) (Scoundrel)".to_string()),
        ));
        let found = results.find(&PeerAddress::new("AA:BB:CC:DD:EE:FF")).unwrap();
        assert_eq!(found.controller_profile, "BB-Arcade");
        assert_eq!(results.snapshot().len(), 1);

        results.clear();
        assert!(results.snapshot().is_empty());
    }
}
