//! Droid Control Protocol
//!
//! This module contains the frame layouts for communicating with the droid
//! over its command characteristic, plus the manufacturer payloads used for
//! beacon advertising. Every builder is a pure function.

use std::fmt;

/// Droid GATT service UUID
pub const SERVICE_UUID: &str = "09b600a0-3e42-41fc-b474-e9c0c8f0c801";

/// Command characteristic UUID - write-without-response endpoint for all frames
pub const COMMAND_CHAR_UUID: &str = "09b600b1-3e42-41fc-b474-e9c0c8f0c801";

/// Handshake frame the firmware requires before it accepts anything else
pub const LOGON: [u8; 3] = [0x22, 0x20, 0x01];

/// Clip played on the default audio group once the handshake has gone out
pub const CONNECT_CUE_CLIP: u8 = 0x02;

/// Speeds below this magnitude collapse to the stop frame
pub const MOTOR_STOP_THRESHOLD: f32 = 0.05;

const MOTOR_HEADER: [u8; 4] = [0x27, 0x00, 0x05, 0x44];
const MOTOR_RAMP: [u8; 2] = [0x01, 0x2C];
const MOTOR_SPEED_MIN: u8 = 0x60;
const MOTOR_SPEED_MAX: u8 = 0xFF;

const AUDIO_HEADER: [u8; 6] = [0x27, 0x42, 0x0F, 0x44, 0x44, 0x00];
const AUDIO_GROUP_OPCODE: u8 = 0x1F;
const AUDIO_CLIP_OPCODE: u8 = 0x18;

const ACTION_HEADER: [u8; 5] = [0x2B, 0x42, 0x0F, 0x48, 0x44];
const ACTION_HEAD_ROTATE: u8 = 0x02;
const ACTION_SPHERE_ROTATE: u8 = 0x04;
const ACTION_SPHERE_DRIVE: u8 = 0x05;

/// Manufacturer id carried at the front of every beacon payload
pub const BEACON_MANUFACTURER_ID: u16 = 0x0183;
pub const BEACON_TYPE_DROID: u8 = 0x03;
pub const BEACON_TYPE_LOCATION: u8 = 0x0A;
pub const BEACON_DATA_LEN: u8 = 0x04;
pub const BEACON_RSSI_THRESHOLD: u8 = 0xA6;
pub const BEACON_ACTIVE_FLAG: u8 = 0x01;
pub const BEACON_DROID_HEADER: u8 = 0x44;
pub const BEACON_DROID_STATUS: u8 = 0x81;

/// Motor addressed by a direct motor frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MotorId {
    Left = 0,
    Right = 1,
    Head = 2,
}

impl MotorId {
    pub const ALL: [MotorId; 3] = [MotorId::Left, MotorId::Right, MotorId::Head];

    pub fn id(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    /// Direction implied by the sign of a shaped value
    pub fn from_sign(value: f32) -> Self {
        if value < 0.0 {
            Self::Reverse
        } else {
            Self::Forward
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Forward => 0x00,
            Self::Reverse => 0x80,
        }
    }
}

/// A single frame the engine can emit
///
/// Each variant maps onto exactly one builder below. Beacon variants encode
/// to advertising payloads rather than radio frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Handshake,
    MotorDirect {
        motor: MotorId,
        direction: Direction,
        speed: f32,
    },
    HeadRotate {
        value: f32,
    },
    SphereDrive {
        heading: u8,
        speed: u8,
    },
    SphereRotate {
        direction: u8,
        speed: u8,
    },
    AudioGroupSelect {
        group: u8,
    },
    AudioClipPlay {
        clip: u8,
    },
    ScriptRun {
        id: u8,
    },
    Accessory,
    BeaconLocation {
        zone: u8,
        cooldown: u8,
    },
    BeaconDroid {
        personality: u8,
        faction: u8,
    },
}

impl Command {
    /// Stop frame for one motor
    pub fn stop(motor: MotorId) -> Self {
        Self::MotorDirect {
            motor,
            direction: Direction::Forward,
            speed: 0.0,
        }
    }

    /// Get the raw bytes for this command
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Self::Handshake => LOGON.to_vec(),
            Self::MotorDirect {
                motor,
                direction,
                speed,
            } => build_motor(motor, direction, speed).to_vec(),
            Self::HeadRotate { value } => build_head_rotate(value),
            Self::SphereDrive { heading, speed } => build_sphere_drive(heading, speed).to_vec(),
            Self::SphereRotate { direction, speed } => {
                build_sphere_rotate(direction, speed).to_vec()
            }
            Self::AudioGroupSelect { group } => build_audio_group_select(group).to_vec(),
            Self::AudioClipPlay { clip } => build_audio_clip_play(clip).to_vec(),
            Self::ScriptRun { id } => build_script(id).to_vec(),
            Self::Accessory => build_accessory().to_vec(),
            Self::BeaconLocation { zone, cooldown } => build_beacon_location(zone, cooldown).to_vec(),
            Self::BeaconDroid {
                personality,
                faction,
            } => build_beacon_droid(personality, faction).to_vec(),
        }
    }
}

/// Direct motor frame
///
/// ```text
/// 27 00 05 44 DM SS RR RR
///   DM: direction bit (0x80 = reverse) | motor id
///   SS: speed, |speed| mapped onto 0x60..=0xFF
///   RR: ramp 0x012C
/// ```
///
/// Magnitudes below [`MOTOR_STOP_THRESHOLD`] produce `27 00 05 44 <motor> 00 00 00`
/// no matter which direction was asked for.
pub fn build_motor(motor: MotorId, direction: Direction, speed: f32) -> [u8; 8] {
    let magnitude = speed.abs();
    if magnitude.is_nan() || magnitude < MOTOR_STOP_THRESHOLD {
        return motor_stop_frame(motor);
    }

    let magnitude = magnitude.min(1.0);
    let span = f32::from(MOTOR_SPEED_MAX - MOTOR_SPEED_MIN);
    let speed_byte = (f32::from(MOTOR_SPEED_MIN) + magnitude * span) as u8;

    [
        MOTOR_HEADER[0],
        MOTOR_HEADER[1],
        MOTOR_HEADER[2],
        MOTOR_HEADER[3],
        direction.bits() | motor.id(),
        speed_byte,
        MOTOR_RAMP[0],
        MOTOR_RAMP[1],
    ]
}

fn motor_stop_frame(motor: MotorId) -> [u8; 8] {
    [
        MOTOR_HEADER[0],
        MOTOR_HEADER[1],
        MOTOR_HEADER[2],
        MOTOR_HEADER[3],
        motor.id(),
        0x00,
        0x00,
        0x00,
    ]
}

/// Latch the active audio group. The clip frame must follow no sooner than
/// the settle gap, the firmware ignores clip indices until the group is set.
pub fn build_audio_group_select(group: u8) -> [u8; 8] {
    audio_frame(AUDIO_GROUP_OPCODE, group)
}

/// Play a clip from the currently latched group
pub fn build_audio_clip_play(clip: u8) -> [u8; 8] {
    audio_frame(AUDIO_CLIP_OPCODE, clip)
}

fn audio_frame(opcode: u8, value: u8) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[..6].copy_from_slice(&AUDIO_HEADER);
    frame[6] = opcode;
    frame[7] = value;
    frame
}

/// Run one of the animation scripts stored on the droid
pub fn build_script(id: u8) -> [u8; 6] {
    [0x25, 0x00, 0x0C, 0x42, id, 0x02]
}

/// Accessory trigger routed through the audio controller. Droids without the
/// accessory fitted ignore it.
pub fn build_accessory() -> [u8; 8] {
    audio_frame(0x10, 0x08)
}

/// Sphere drive: `2B 42 0F 48 44 05 <heading> <speed> 01 90 00 00`
pub fn build_sphere_drive(heading: u8, speed: u8) -> [u8; 12] {
    action_frame(ACTION_SPHERE_DRIVE, heading, speed, [0x01, 0x90, 0x00, 0x00])
}

/// Sphere rotate: `2B 42 0F 48 44 04 <direction> <speed> 00 05 00 00`
pub fn build_sphere_rotate(direction: u8, speed: u8) -> [u8; 12] {
    action_frame(ACTION_SPHERE_ROTATE, direction, speed, [0x00, 0x05, 0x00, 0x00])
}

/// Dome rotation for differential droids
///
/// Uses the action-type-2 frame, which turns the dome more smoothly than a
/// direct motor-2 frame:
///
/// ```text
/// 2B 42 0F 48 44 02 XX YY 00 64 00 01
///   XX: 00 = right, FF = left
///   YY: |value| * 0xFF
/// ```
///
/// Below the stop threshold this falls back to the motor-2 stop frame.
pub fn build_head_rotate(value: f32) -> Vec<u8> {
    let magnitude = value.abs();
    if magnitude.is_nan() || magnitude < MOTOR_STOP_THRESHOLD {
        return motor_stop_frame(MotorId::Head).to_vec();
    }

    let direction = if value > 0.0 { 0x00 } else { 0xFF };
    let speed = (magnitude.min(1.0) * 255.0) as u8;
    action_frame(ACTION_HEAD_ROTATE, direction, speed, [0x00, 0x64, 0x00, 0x01]).to_vec()
}

fn action_frame(action: u8, first: u8, second: u8, trailer: [u8; 4]) -> [u8; 12] {
    let mut frame = [0u8; 12];
    frame[..5].copy_from_slice(&ACTION_HEADER);
    frame[5] = action;
    frame[6] = first;
    frame[7] = second;
    frame[8..].copy_from_slice(&trailer);
    frame
}

/// Location beacon payload
///
/// ```text
/// [0-1] : Manufacturer id 0x0183
/// [2]   : Type 0x0A (location)
/// [3]   : Data length 0x04
/// [4]   : Zone id, selects the reaction audio group
/// [5]   : Cooldown byte (x5 = seconds)
/// [6]   : RSSI threshold
/// [7]   : Active flag
/// ```
pub fn build_beacon_location(zone: u8, cooldown: u8) -> [u8; 8] {
    let [id_hi, id_lo] = BEACON_MANUFACTURER_ID.to_be_bytes();
    [
        id_hi,
        id_lo,
        BEACON_TYPE_LOCATION,
        BEACON_DATA_LEN,
        zone,
        cooldown,
        BEACON_RSSI_THRESHOLD,
        BEACON_ACTIVE_FLAG,
    ]
}

/// Simulated droid beacon payload
///
/// ```text
/// [0-1] : Manufacturer id 0x0183
/// [2]   : Type 0x03 (droid)
/// [3]   : Data length 0x04
/// [4]   : Header 0x44
/// [5]   : Status 0x81
/// [6]   : Affiliation, 0x80 + faction * 2
/// [7]   : Personality id
/// ```
pub fn build_beacon_droid(personality: u8, faction: u8) -> [u8; 8] {
    let [id_hi, id_lo] = BEACON_MANUFACTURER_ID.to_be_bytes();
    [
        id_hi,
        id_lo,
        BEACON_TYPE_DROID,
        BEACON_DATA_LEN,
        BEACON_DROID_HEADER,
        BEACON_DROID_STATUS,
        affiliation_byte(faction),
        personality,
    ]
}

pub fn affiliation_byte(faction: u8) -> u8 {
    0x80u8.wrapping_add(faction.wrapping_mul(2))
}

/// Split a beacon payload into the `manufacturer <id> <bytes>` arguments
/// understood by bluetoothctl's advertise menu.
pub fn manufacturer_arguments(payload: &[u8]) -> Option<(String, String)> {
    let (id, data) = payload.split_first_chunk::<2>()?;
    let id = format!("0x{:04X}", u16::from_be_bytes(*id));
    let data = data
        .iter()
        .map(|b| format!("0x{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ");
    Some((id, data))
}

/// Hex rendering used for diagnostics
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_stop_frame_ignores_direction() {
        for speed in [0.0, 0.01, -0.049, 0.049] {
            let forward = build_motor(MotorId::Right, Direction::Forward, speed);
            let reverse = build_motor(MotorId::Right, Direction::Reverse, speed);
            assert_eq!(forward, reverse);
            assert_eq!(forward, [0x27, 0x00, 0x05, 0x44, 0x01, 0x00, 0x00, 0x00]);
        }
    }

    #[test]
    fn test_motor_frame_is_pure() {
        let a = build_motor(MotorId::Left, Direction::Forward, 0.6);
        let b = build_motor(MotorId::Left, Direction::Forward, 0.6);
        assert_eq!(a, b);
    }

    #[test]
    fn test_motor_speed_mapping() {
        let full = build_motor(MotorId::Left, Direction::Forward, 1.0);
        assert_eq!(full, [0x27, 0x00, 0x05, 0x44, 0x00, 0xFF, 0x01, 0x2C]);

        let reverse_head = build_motor(MotorId::Head, Direction::Reverse, -0.5);
        assert_eq!(reverse_head[4], 0x82);
        // 0x60 + 0.5 * 0x9F = 175.5
        assert_eq!(reverse_head[5], 0xAF);

        let clamped = build_motor(MotorId::Left, Direction::Forward, 3.0);
        assert_eq!(clamped[5], 0xFF);
    }

    #[test]
    fn test_audio_frames() {
        assert_eq!(
            build_audio_group_select(4),
            [0x27, 0x42, 0x0F, 0x44, 0x44, 0x00, 0x1F, 0x04]
        );
        assert_eq!(
            build_audio_clip_play(2),
            [0x27, 0x42, 0x0F, 0x44, 0x44, 0x00, 0x18, 0x02]
        );
    }

    #[test]
    fn test_script_frame() {
        assert_eq!(build_script(7), [0x25, 0x00, 0x0C, 0x42, 0x07, 0x02]);
    }

    #[test]
    fn test_sphere_frames() {
        assert_eq!(
            build_sphere_drive(0x80, 0x40),
            [0x2B, 0x42, 0x0F, 0x48, 0x44, 0x05, 0x80, 0x40, 0x01, 0x90, 0x00, 0x00]
        );
        assert_eq!(
            build_sphere_rotate(0xFF, 0x10),
            [0x2B, 0x42, 0x0F, 0x48, 0x44, 0x04, 0xFF, 0x10, 0x00, 0x05, 0x00, 0x00]
        );
    }

    #[test]
    fn test_head_rotate() {
        assert_eq!(build_head_rotate(0.0), motor_stop_frame(MotorId::Head).to_vec());
        let left = build_head_rotate(-1.0);
        assert_eq!(left[6], 0xFF);
        assert_eq!(left[7], 0xFF);
        assert_eq!(&left[8..], &[0x00, 0x64, 0x00, 0x01]);
    }

    #[test]
    fn test_beacon_payloads() {
        assert_eq!(
            build_beacon_location(5, 2),
            [0x01, 0x83, 0x0A, 0x04, 0x05, 0x02, 0xA6, 0x01]
        );
        // Resistance = 0x05 -> 0x80 + 0x0A
        assert_eq!(
            build_beacon_droid(0x0B, 0x05),
            [0x01, 0x83, 0x03, 0x04, 0x44, 0x81, 0x8A, 0x0B]
        );
    }

    #[test]
    fn test_manufacturer_arguments() {
        let payload = build_beacon_location(1, 2);
        let (id, data) = manufacturer_arguments(&payload).unwrap();
        assert_eq!(id, "0x0183");
        assert_eq!(data, "0x0A 0x04 0x01 0x02 0xA6 0x01");
        assert!(manufacturer_arguments(&[0x01]).is_none());
    }

    #[test]
    fn test_command_encode_matches_builders() {
        assert_eq!(Command::Handshake.encode(), LOGON.to_vec());
        assert_eq!(
            Command::stop(MotorId::Head).encode(),
            vec![0x27, 0x00, 0x05, 0x44, 0x02, 0x00, 0x00, 0x00]
        );
        assert_eq!(Command::ScriptRun { id: 3 }.encode(), build_script(3).to_vec());
    }
}
