//! Controller profiles
//!
//! A profile binds abstract intents to physical gamepad channels and picks
//! the drive class used to turn those intents into frames. Profiles are
//! resolved once when selected; nothing is looked up by string per tick.

use std::fmt;

/// What the operator wants to happen, independent of which stick does it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Throttle,
    Steer,
    Head,
    ThrottleLeft,
    ThrottleRight,
    Sound,
    Accessory,
}

impl Intent {
    /// Label shown next to the bound input
    pub fn hint_label(self) -> &'static str {
        match self {
            Self::Throttle => "Drive",
            Self::Steer => "Turn",
            Self::Head => "Head",
            Self::ThrottleLeft => "Drive L",
            Self::ThrottleRight => "Drive R",
            Self::Sound => "Sound",
            Self::Accessory => "Accessory",
        }
    }
}

/// Analog gamepad channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    LeftX,
    LeftY,
    RightX,
    RightY,
    L2,
    R2,
}

impl Axis {
    pub const ALL: [Axis; 6] = [
        Axis::LeftX,
        Axis::LeftY,
        Axis::RightX,
        Axis::RightY,
        Axis::L2,
        Axis::R2,
    ];

    /// Short name as printed on pads and accepted on the console
    pub fn name(self) -> &'static str {
        match self {
            Self::LeftX => "DX",
            Self::LeftY => "DY",
            Self::RightX => "RX",
            Self::RightY => "RY",
            Self::L2 => "L2",
            Self::R2 => "R2",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(name))
    }

    pub fn is_trigger(self) -> bool {
        matches!(self, Self::L2 | Self::R2)
    }

    /// Stick Y axes report positive when pulled back
    fn inverted(self) -> bool {
        matches!(self, Self::LeftY | Self::RightY)
    }
}

/// Where an analog intent reads its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSource {
    Axis(Axis),
    /// `R2 - L2`, forward on the right trigger and reverse on the left
    TriggerPair,
}

impl AxisSource {
    pub fn read(self, input: &impl InputSource) -> f32 {
        match self {
            Self::Axis(axis) => {
                let value = input.axis(axis);
                if axis.inverted() {
                    -value
                } else {
                    value
                }
            }
            Self::TriggerPair => input.axis(Axis::R2) - input.axis(Axis::L2),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Axis(axis) => axis.name(),
            Self::TriggerPair => "R2/L2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    A,
    B,
    X,
    Y,
    L1,
    R1,
}

impl Button {
    pub const ALL: [Button; 6] = [
        Button::A,
        Button::B,
        Button::X,
        Button::Y,
        Button::L1,
        Button::R1,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::X => "X",
            Self::Y => "Y",
            Self::L1 => "L1",
            Self::R1 => "R1",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(name))
    }
}

/// Read access to the current gamepad state
pub trait InputSource {
    /// Normalised value in [-1.0, 1.0] (triggers in [0.0, 1.0])
    fn axis(&self, axis: Axis) -> f32;
    /// True once per press; reading it consumes the press
    fn is_pressed(&self, button: Button) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveClass {
    /// Two drive motors plus a dome motor (R-series)
    Differential,
    /// Self-balancing sphere driven by heading and speed (BB-series)
    Sphere,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisBinding {
    pub intent: Intent,
    pub source: AxisSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonBinding {
    pub intent: Intent,
    pub button: Button,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerProfile {
    pub name: &'static str,
    pub class: DriveClass,
    pub axes: &'static [AxisBinding],
    pub buttons: &'static [ButtonBinding],
}

impl ControllerProfile {
    pub fn axis_binding(&self, intent: Intent) -> Option<AxisSource> {
        self.axes
            .iter()
            .find(|b| b.intent == intent)
            .map(|b| b.source)
    }

    /// `(input name, label)` pairs for an on-screen legend
    pub fn hints(&self) -> Vec<(&'static str, &'static str)> {
        let axes = self
            .axes
            .iter()
            .map(|b| (b.source.name(), b.intent.hint_label()));
        let buttons = self
            .buttons
            .iter()
            .map(|b| (b.button.name(), b.intent.hint_label()));
        axes.chain(buttons).collect()
    }

    pub fn uses_triggers(&self) -> bool {
        self.axes.iter().any(|b| match b.source {
            AxisSource::TriggerPair => true,
            AxisSource::Axis(axis) => axis.is_trigger(),
        })
    }
}

impl fmt::Display for ControllerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

const fn axis(intent: Intent, source: AxisSource) -> AxisBinding {
    AxisBinding { intent, source }
}

const fn button(intent: Intent, button: Button) -> ButtonBinding {
    ButtonBinding { intent, button }
}

const COMMON_BUTTONS: [ButtonBinding; 2] = [
    button(Intent::Sound, Button::A),
    button(Intent::Accessory, Button::B),
];

const R_ARCADE: [AxisBinding; 3] = [
    axis(Intent::Throttle, AxisSource::Axis(Axis::LeftY)),
    axis(Intent::Steer, AxisSource::Axis(Axis::LeftX)),
    axis(Intent::Head, AxisSource::Axis(Axis::RightX)),
];

const R_RACING: [AxisBinding; 3] = [
    axis(Intent::Throttle, AxisSource::TriggerPair),
    axis(Intent::Steer, AxisSource::Axis(Axis::LeftX)),
    axis(Intent::Head, AxisSource::Axis(Axis::RightX)),
];

const R_TANK: [AxisBinding; 3] = [
    axis(Intent::ThrottleLeft, AxisSource::Axis(Axis::LeftY)),
    axis(Intent::ThrottleRight, AxisSource::Axis(Axis::RightY)),
    axis(Intent::Head, AxisSource::Axis(Axis::RightX)),
];

const BB_ARCADE: [AxisBinding; 2] = [
    axis(Intent::Throttle, AxisSource::Axis(Axis::LeftY)),
    axis(Intent::Head, AxisSource::Axis(Axis::RightX)),
];

const BB_RACING: [AxisBinding; 2] = [
    axis(Intent::Throttle, AxisSource::TriggerPair),
    axis(Intent::Head, AxisSource::Axis(Axis::LeftX)),
];

pub static PROFILES: [ControllerProfile; 5] = [
    ControllerProfile {
        name: "R-Arcade",
        class: DriveClass::Differential,
        axes: &R_ARCADE,
        buttons: &COMMON_BUTTONS,
    },
    ControllerProfile {
        name: "R-Racing",
        class: DriveClass::Differential,
        axes: &R_RACING,
        buttons: &COMMON_BUTTONS,
    },
    ControllerProfile {
        name: "R-Tank",
        class: DriveClass::Differential,
        axes: &R_TANK,
        buttons: &COMMON_BUTTONS,
    },
    ControllerProfile {
        name: "BB-Arcade",
        class: DriveClass::Sphere,
        axes: &BB_ARCADE,
        buttons: &COMMON_BUTTONS,
    },
    ControllerProfile {
        name: "BB-Racing",
        class: DriveClass::Sphere,
        axes: &BB_RACING,
        buttons: &COMMON_BUTTONS,
    },
];

/// Case-insensitive lookup; `_` is accepted in place of `-`
pub fn find_profile(name: &str) -> Option<&'static ControllerProfile> {
    let wanted = name.trim().replace('_', "-");
    PROFILES
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(&wanted))
}

pub fn default_profile() -> &'static ControllerProfile {
    &PROFILES[0]
}
