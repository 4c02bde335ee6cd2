//! Console command parsing
//!
//! One command per line on stdin. Numbers accept decimal or `0x` hex.

use crate::domain::models::PeerAddress;
use crate::domain::profiles::{Axis, Button};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Connect {
        peer: PeerAddress,
        name: Option<String>,
    },
    Disconnect,
    Audio {
        group: u8,
        clip: u8,
    },
    Script(u8),
    Profile(String),
    Axis {
        axis: Axis,
        value: f32,
    },
    Press(Button),
    Release(Button),
    Remote(bool),
    Scan(bool),
    Devices,
    BeaconLocation(u8),
    BeaconDroid {
        faction: u8,
        slot: u8,
    },
    BeaconStop,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid number '{0}'")]
    Number(String),

    #[error("unknown axis '{0}' (DX, DY, RX, RY, L2, R2)")]
    Axis(String),

    #[error("unknown button '{0}' (A, B, X, Y, L1, R1)")]
    Button(String),
}

pub const HELP: &str = "\
commands:
  connect <addr> [name]        connect to a droid
  disconnect                   drop the connection
  audio <group> <clip>         play a clip
  script <id>                  run an animation script
  profile <name>               R-Arcade, R-Racing, R-Tank, BB-Arcade, BB-Racing
  axis <DX|DY|RX|RY|L2|R2> <v> set an analog channel (-1.0..1.0)
  press|release <button>       A, B, X, Y, L1, R1
  remote on|off                enter or leave remote control
  scan on|off                  look for droids nearby
  devices                      list droids seen so far
  beacon location <1-9>        advertise a park location
  beacon droid <faction> <slot>
  beacon stop
  status
  quit";

fn number(token: &str) -> Result<u8, ParseError> {
    let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| ParseError::Number(token.to_string()))
}

pub fn parse(line: &str) -> Result<ConsoleCommand, ParseError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&head, args)) = tokens.split_first() else {
        return Err(ParseError::Empty);
    };

    match (head.to_lowercase().as_str(), args) {
        ("connect", [addr, name @ ..]) => Ok(ConsoleCommand::Connect {
            peer: PeerAddress::new(addr),
            name: (!name.is_empty()).then(|| name.join(" ")),
        }),
        ("connect", _) => Err(ParseError::Usage("connect <addr> [name]")),
        ("disconnect", []) => Ok(ConsoleCommand::Disconnect),
        ("audio", [group, clip]) => Ok(ConsoleCommand::Audio {
            group: number(group)?,
            clip: number(clip)?,
        }),
        ("audio", _) => Err(ParseError::Usage("audio <group> <clip>")),
        ("script", [id]) => Ok(ConsoleCommand::Script(number(id)?)),
        ("script", _) => Err(ParseError::Usage("script <id>")),
        ("profile", [name]) => Ok(ConsoleCommand::Profile(name.to_string())),
        ("profile", _) => Err(ParseError::Usage("profile <name>")),
        ("axis", [axis, value]) => Ok(ConsoleCommand::Axis {
            axis: Axis::from_name(axis).ok_or_else(|| ParseError::Axis(axis.to_string()))?,
            value: value
                .parse()
                .map_err(|_| ParseError::Number(value.to_string()))?,
        }),
        ("axis", _) => Err(ParseError::Usage("axis <channel> <value>")),
        ("press" | "release", [button]) => {
            let button =
                Button::from_name(button).ok_or_else(|| ParseError::Button(button.to_string()))?;
            if head.eq_ignore_ascii_case("press") {
                Ok(ConsoleCommand::Press(button))
            } else {
                Ok(ConsoleCommand::Release(button))
            }
        }
        ("press" | "release", _) => Err(ParseError::Usage("press|release <button>")),
        ("remote", ["on"]) => Ok(ConsoleCommand::Remote(true)),
        ("remote", ["off"]) => Ok(ConsoleCommand::Remote(false)),
        ("remote", _) => Err(ParseError::Usage("remote on|off")),
        ("scan", ["on"]) => Ok(ConsoleCommand::Scan(true)),
        ("scan", ["off"]) => Ok(ConsoleCommand::Scan(false)),
        ("scan", _) => Err(ParseError::Usage("scan on|off")),
        ("devices", []) => Ok(ConsoleCommand::Devices),
        ("beacon", ["location", key]) => Ok(ConsoleCommand::BeaconLocation(number(key)?)),
        ("beacon", ["droid", faction, slot]) => Ok(ConsoleCommand::BeaconDroid {
            faction: number(faction)?,
            slot: number(slot)?,
        }),
        ("beacon", ["stop"]) => Ok(ConsoleCommand::BeaconStop),
        ("beacon", _) => Err(ParseError::Usage(
            "beacon location <key> | beacon droid <faction> <slot> | beacon stop",
        )),
        ("status", []) => Ok(ConsoleCommand::Status),
        ("help" | "?", _) => Ok(ConsoleCommand::Help),
        ("quit" | "exit", []) => Ok(ConsoleCommand::Quit),
        _ => Err(ParseError::Unknown(head.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect() {
        assert_eq!(
            parse("connect aa:bb:cc:dd:ee:ff My Droid"),
            Ok(ConsoleCommand::Connect {
                peer: PeerAddress::new("AA:BB:CC:DD:EE:FF"),
                name: Some("My Droid".to_string()),
            })
        );
        assert_eq!(
            parse("connect AA:BB:CC:DD:EE:FF"),
            Ok(ConsoleCommand::Connect {
                peer: PeerAddress::new("AA:BB:CC:DD:EE:FF"),
                name: None,
            })
        );
        assert_eq!(parse("connect"), Err(ParseError::Usage("connect <addr> [name]")));
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(
            parse("audio 0x0A 3"),
            Ok(ConsoleCommand::Audio { group: 10, clip: 3 })
        );
        assert_eq!(parse("script 300"), Err(ParseError::Number("300".to_string())));
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(
            parse("axis dy -0.5"),
            Ok(ConsoleCommand::Axis {
                axis: Axis::LeftY,
                value: -0.5
            })
        );
        assert_eq!(parse("PRESS r1"), Ok(ConsoleCommand::Press(Button::R1)));
        assert_eq!(parse("press Z"), Err(ParseError::Button("Z".to_string())));
    }

    #[test]
    fn test_parse_beacon() {
        assert_eq!(parse("beacon location 5"), Ok(ConsoleCommand::BeaconLocation(5)));
        assert_eq!(
            parse("beacon droid 2 4"),
            Ok(ConsoleCommand::BeaconDroid { faction: 2, slot: 4 })
        );
        assert_eq!(parse("beacon stop"), Ok(ConsoleCommand::BeaconStop));
        assert!(matches!(parse("beacon"), Err(ParseError::Usage(_))));
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert_eq!(parse("remote on"), Ok(ConsoleCommand::Remote(true)));
        assert_eq!(parse("scan off"), Ok(ConsoleCommand::Scan(false)));
        assert_eq!(parse("devices"), Ok(ConsoleCommand::Devices));
        assert_eq!(parse("quit"), Ok(ConsoleCommand::Quit));
        assert_eq!(parse("fly"), Err(ParseError::Unknown("fly".to_string())));
    }
}
