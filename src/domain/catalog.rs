//! Static catalogs for beacons and audio
//!
//! Locations, factions and droid personalities used by the beacon
//! broadcaster, plus the names of the audio groups the firmware ships with.

/// A park location a beacon can impersonate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub key: u8,
    pub zone: u8,
    pub name: &'static str,
    /// Cooldown byte; the droid waits `cooldown * 5` seconds between reactions
    pub cooldown: u8,
}

pub static LOCATIONS: [Location; 9] = [
    Location {
        key: 1,
        zone: 0x01,
        name: "Ronto Roasters",
        cooldown: 0x02,
    },
    Location {
        key: 2,
        zone: 0x02,
        name: "Oil Baths",
        cooldown: 0x02,
    },
    Location {
        key: 3,
        zone: 0x03,
        name: "Resistance Base",
        cooldown: 0x02,
    },
    Location {
        key: 4,
        zone: 0x04,
        name: "Unknown",
        cooldown: 0x02,
    },
    Location {
        key: 5,
        zone: 0x05,
        name: "Droid Depot",
        cooldown: 0x02,
    },
    Location {
        key: 6,
        zone: 0x06,
        name: "Den of Antiquities",
        cooldown: 0x02,
    },
    Location {
        key: 7,
        zone: 0x07,
        name: "First Order Base",
        cooldown: 0x02,
    },
    Location {
        key: 8,
        zone: 0x05,
        name: "Oga's Droid Detector",
        cooldown: 0xFF,
    },
    Location {
        key: 9,
        zone: 0x07,
        name: "First Order Alert",
        cooldown: 0xFF,
    },
];

pub fn find_location(key: u8) -> Option<&'static Location> {
    LOCATIONS.iter().find(|l| l.key == key)
}

/// Location whose zone id matches, preferring the regular entry over alerts
pub fn location_for_zone(zone: u8) -> Option<&'static Location> {
    LOCATIONS.iter().find(|l| l.zone == zone)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Personality {
    pub slot: u8,
    pub id: u8,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Faction {
    pub key: u8,
    pub name: &'static str,
    pub id: u8,
    pub droids: &'static [Personality],
}

const SCOUNDREL_DROIDS: [Personality; 8] = [
    Personality {
        slot: 1,
        id: 0x01,
        name: "R-Series (Default)",
    },
    Personality {
        slot: 2,
        id: 0x02,
        name: "BB-Series (Default)",
    },
    Personality {
        slot: 3,
        id: 0x04,
        name: "Gray (U9-C4)",
    },
    Personality {
        slot: 4,
        id: 0x07,
        name: "Purple (M5-BZ)",
    },
    Personality {
        slot: 5,
        id: 0x09,
        name: "Cyan/Red (CB-23)",
    },
    Personality {
        slot: 6,
        id: 0x0D,
        name: "Blue (R5-D4)",
    },
    Personality {
        slot: 7,
        id: 0x0F,
        name: "A-LT Series (Default)",
    },
    Personality {
        slot: 8,
        id: 0x10,
        name: "White (Drum Kit)",
    },
];

const RESISTANCE_DROIDS: [Personality; 8] = [
    Personality {
        slot: 1,
        id: 0x03,
        name: "Blue (R5-D8)",
    },
    Personality {
        slot: 2,
        id: 0x06,
        name: "Orange (R4-P17)",
    },
    Personality {
        slot: 3,
        id: 0x0A,
        name: "Yellow (CH-33P)",
    },
    Personality {
        slot: 4,
        id: 0x0B,
        name: "C-Series (Default)",
    },
    Personality {
        slot: 5,
        id: 0x0C,
        name: "D-Unit (Default)",
    },
    Personality {
        slot: 6,
        id: 0x0E,
        name: "BD-Unit (Default)",
    },
    Personality {
        slot: 7,
        id: 0x01,
        name: "Green (R2-H15)",
    },
    Personality {
        slot: 8,
        id: 0x01,
        name: "Orange (SPOOK-E)",
    },
];

const FIRST_ORDER_DROIDS: [Personality; 2] = [
    Personality {
        slot: 1,
        id: 0x05,
        name: "Red (0-0-0)",
    },
    Personality {
        slot: 2,
        id: 0x08,
        name: "Black (BB-9E)",
    },
];

pub static FACTIONS: [Faction; 3] = [
    Faction {
        key: 1,
        name: "Scoundrel",
        id: 0x01,
        droids: &SCOUNDREL_DROIDS,
    },
    Faction {
        key: 2,
        name: "Resistance",
        id: 0x05,
        droids: &RESISTANCE_DROIDS,
    },
    Faction {
        key: 3,
        name: "First Order",
        id: 0x09,
        droids: &FIRST_ORDER_DROIDS,
    },
];

pub fn find_faction(key: u8) -> Option<&'static Faction> {
    FACTIONS.iter().find(|f| f.key == key)
}

pub fn faction_for_id(id: u8) -> Option<&'static Faction> {
    FACTIONS.iter().find(|f| f.id == id)
}

impl Faction {
    pub fn personality(&self, slot: u8) -> Option<&'static Personality> {
        self.droids.iter().find(|p| p.slot == slot)
    }
}

pub const AUDIO_GROUPS: [&str; 12] = [
    "Generic",
    "Droid Depot",
    "Resistance",
    "Unknown",
    "Droid Detector",
    "Dok-Ondar's",
    "First Order",
    "Activation",
    "Motor / Internal",
    "Empty",
    "Accessory: Blaster",
    "Accessory: Thruster",
];

pub fn audio_group_name(group: u8) -> &'static str {
    AUDIO_GROUPS
        .get(usize::from(group))
        .copied()
        .unwrap_or("Unknown group")
}

/// Highest script id stored on current firmware
pub const SCRIPT_COUNT: u8 = 18;
