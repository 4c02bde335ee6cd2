//! Motion shaping
//!
//! Turns continuous stick values into the small number of frames the droid
//! can keep up with: deadzone first, then per-output hysteresis so a frame
//! only goes out when the value actually moved.

use crate::domain::profiles::{ControllerProfile, DriveClass, InputSource, Intent};
use crate::infrastructure::bluetooth::protocol::{Command, Direction, MotorId};
use rand::Rng;

pub const DEADZONE: f32 = 0.15;

/// Minimum change before a differential output is re-sent
pub const MOTOR_HYSTERESIS: f32 = 0.05;

/// Minimum change before a sphere output is re-sent
pub const SPHERE_HYSTERESIS: f32 = 0.02;

/// Sphere values at or below this are treated as released
const SPHERE_ACTIVE_THRESHOLD: f32 = 0.05;

pub const SPHERE_DRIVE_LIMIT: f32 = 0.8;
pub const SPHERE_TURN_LIMIT: f32 = 0.35;

const SPHERE_FORWARD: u8 = 0x00;
const SPHERE_REVERSE: u8 = 0x80;
const SPHERE_TURN_RIGHT: u8 = 0x00;
const SPHERE_TURN_LEFT: u8 = 0xFF;

pub fn apply_deadzone(value: f32) -> f32 {
    if value.abs() < DEADZONE {
        0.0
    } else {
        value
    }
}

/// Work produced by one shaping pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteAction {
    Send(Command),
    PlayAudio { group: u8, clip: u8 },
}

#[derive(Debug, Default, Clone, Copy)]
struct MotorOutputs {
    left: f32,
    right: f32,
    head: f32,
}

#[derive(Debug, Default, Clone, Copy)]
struct SphereOutputs {
    drive: f32,
    head: f32,
}

pub struct MotionShaper {
    profile: &'static ControllerProfile,
    motors: MotorOutputs,
    sphere: SphereOutputs,
}

impl MotionShaper {
    pub fn new(profile: &'static ControllerProfile) -> Self {
        Self {
            profile,
            motors: MotorOutputs::default(),
            sphere: SphereOutputs::default(),
        }
    }

    pub fn profile(&self) -> &'static ControllerProfile {
        self.profile
    }

    /// Switch profile; last-sent values are forgotten
    pub fn set_profile(&mut self, profile: &'static ControllerProfile) {
        *self = Self::new(profile);
    }

    /// Run one control tick against the current input
    pub fn process(&mut self, input: &impl InputSource) -> Vec<RemoteAction> {
        let mut actions = Vec::new();

        match self.profile.class {
            DriveClass::Differential => self.shape_differential(input, &mut actions),
            DriveClass::Sphere => self.shape_sphere(input, &mut actions),
        }
        self.fire_buttons(input, &mut actions);

        actions
    }

    /// Stop frames for every motor. Resets tracked outputs.
    pub fn stop_all(&mut self) -> Vec<Command> {
        self.motors = MotorOutputs::default();
        self.sphere = SphereOutputs::default();
        MotorId::ALL.into_iter().map(Command::stop).collect()
    }

    fn intent(&self, intent: Intent, input: &impl InputSource) -> Option<f32> {
        self.profile
            .axis_binding(intent)
            .map(|source| apply_deadzone(source.read(input)))
    }

    fn shape_differential(&mut self, input: &impl InputSource, actions: &mut Vec<RemoteAction>) {
        let throttle = self.intent(Intent::Throttle, input).unwrap_or(0.0);
        let steer = self.intent(Intent::Steer, input).unwrap_or(0.0);
        let head = self.intent(Intent::Head, input).unwrap_or(0.0);
        let throttle_left = self.intent(Intent::ThrottleLeft, input).unwrap_or(throttle);
        let throttle_right = self.intent(Intent::ThrottleRight, input).unwrap_or(throttle);

        if let Some(speed) = hysteresis(&mut self.motors.left, throttle_left + steer) {
            actions.push(RemoteAction::Send(motor_command(MotorId::Left, speed)));
        }
        if let Some(speed) = hysteresis(&mut self.motors.right, throttle_right - steer) {
            actions.push(RemoteAction::Send(motor_command(MotorId::Right, speed)));
        }
        if let Some(value) = hysteresis(&mut self.motors.head, head) {
            actions.push(RemoteAction::Send(Command::HeadRotate { value }));
        }
    }

    fn shape_sphere(&mut self, input: &impl InputSource, actions: &mut Vec<RemoteAction>) {
        let drive = self.intent(Intent::Throttle, input).unwrap_or(0.0);
        let head = self.intent(Intent::Head, input).unwrap_or(0.0);
        let last = self.sphere;

        if drive == 0.0 && head == 0.0 {
            if last.drive != 0.0 || last.head != 0.0 {
                actions.push(RemoteAction::Send(Command::SphereDrive {
                    heading: SPHERE_FORWARD,
                    speed: 0,
                }));
                self.sphere = SphereOutputs::default();
            }
            return;
        }

        if drive.abs() > SPHERE_ACTIVE_THRESHOLD {
            if (drive - last.drive).abs() > SPHERE_HYSTERESIS {
                let heading = if drive > 0.0 {
                    SPHERE_FORWARD
                } else {
                    SPHERE_REVERSE
                };
                actions.push(RemoteAction::Send(Command::SphereDrive {
                    heading,
                    speed: scaled_byte(drive, SPHERE_DRIVE_LIMIT),
                }));
                self.sphere.drive = drive;
            }
        } else if last.drive != 0.0 {
            actions.push(RemoteAction::Send(Command::SphereDrive {
                heading: SPHERE_FORWARD,
                speed: 0,
            }));
            self.sphere.drive = 0.0;
        }

        if head.abs() > SPHERE_ACTIVE_THRESHOLD {
            if (head - last.head).abs() > SPHERE_HYSTERESIS {
                let direction = if head > 0.0 {
                    SPHERE_TURN_RIGHT
                } else {
                    SPHERE_TURN_LEFT
                };
                actions.push(RemoteAction::Send(Command::SphereRotate {
                    direction,
                    speed: scaled_byte(head, SPHERE_TURN_LIMIT),
                }));
                self.sphere.head = head;
            }
        } else if last.head != 0.0 {
            actions.push(RemoteAction::Send(Command::SphereRotate {
                direction: SPHERE_TURN_RIGHT,
                speed: 0,
            }));
            self.sphere.head = 0.0;
        }
    }

    fn fire_buttons(&mut self, input: &impl InputSource, actions: &mut Vec<RemoteAction>) {
        for binding in self.profile.buttons {
            if !input.is_pressed(binding.button) {
                continue;
            }
            match binding.intent {
                Intent::Sound => actions.push(random_sound()),
                Intent::Accessory => actions.push(RemoteAction::Send(Command::Accessory)),
                other => tracing::debug!("No button action for {:?}", other),
            }
        }
    }
}

/// Emit when the value moved by more than the motor hysteresis, or when it
/// returned to exactly zero. Returns the clamped value to send and records
/// the unclamped one.
fn hysteresis(last: &mut f32, value: f32) -> Option<f32> {
    let moved = (value - *last).abs() > MOTOR_HYSTERESIS;
    let released = value == 0.0 && *last != 0.0;
    if !(moved || released) {
        return None;
    }
    *last = value;
    Some(value.clamp(-1.0, 1.0))
}

fn motor_command(motor: MotorId, speed: f32) -> Command {
    Command::MotorDirect {
        motor,
        direction: Direction::from_sign(speed),
        speed,
    }
}

fn scaled_byte(value: f32, limit: f32) -> u8 {
    (value.abs().min(1.0) * 255.0 * limit) as u8
}

fn random_sound() -> RemoteAction {
    let mut rng = rand::thread_rng();
    RemoteAction::PlayAudio {
        group: rng.gen_range(1..=3),
        clip: rng.gen_range(1..=3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::input::InputState;
    use crate::domain::profiles::{find_profile, Axis, Button};
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct Pad {
        axes: HashMap<Axis, f32>,
        pressed: RefCell<HashSet<Button>>,
    }

    impl Pad {
        fn set(&mut self, axis: Axis, value: f32) {
            self.axes.insert(axis, value);
        }

        fn press(&self, button: Button) {
            self.pressed.borrow_mut().insert(button);
        }
    }

    impl InputSource for Pad {
        fn axis(&self, axis: Axis) -> f32 {
            self.axes.get(&axis).copied().unwrap_or(0.0)
        }

        fn is_pressed(&self, button: Button) -> bool {
            self.pressed.borrow_mut().remove(&button)
        }
    }

    fn shaper(name: &str) -> MotionShaper {
        MotionShaper::new(find_profile(name).unwrap())
    }

    #[test]
    fn test_deadzone() {
        assert_eq!(apply_deadzone(0.10), 0.0);
        assert_eq!(apply_deadzone(-0.10), 0.0);
        assert_eq!(apply_deadzone(0.20), 0.20);
        assert_eq!(apply_deadzone(-1.0), -1.0);
    }

    #[test]
    fn test_motor_hysteresis() {
        let mut shaper = shaper("R-Tank");
        let mut pad = Pad::default();

        // Stick Y is inverted by the binding
        pad.set(Axis::LeftY, -0.40);
        let actions = shaper.process(&pad);
        assert_eq!(actions.len(), 1);

        pad.set(Axis::LeftY, -0.43);
        assert!(shaper.process(&pad).is_empty());

        pad.set(Axis::LeftY, -0.46);
        let actions = shaper.process(&pad);
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            actions[0],
            RemoteAction::Send(Command::MotorDirect {
                motor: MotorId::Left,
                direction: Direction::Forward,
                ..
            })
        ));
    }

    #[test]
    fn test_return_to_zero_always_emits() {
        let mut shaper = shaper("R-Tank");
        let mut pad = Pad::default();

        pad.set(Axis::LeftY, -0.20);
        assert_eq!(shaper.process(&pad).len(), 1);

        // Inside the deadzone, the small change still produces a stop
        pad.set(Axis::LeftY, -0.14);
        let actions = shaper.process(&pad);
        assert_eq!(actions, vec![RemoteAction::Send(motor_command(MotorId::Left, 0.0))]);
        assert!(shaper.process(&pad).is_empty());
    }

    #[test]
    fn test_differential_mixing_clamps() {
        let mut shaper = shaper("R-Arcade");
        let mut pad = Pad::default();
        pad.set(Axis::LeftY, -1.0);
        pad.set(Axis::LeftX, 0.5);

        let actions = shaper.process(&pad);
        assert_eq!(
            actions,
            vec![
                RemoteAction::Send(motor_command(MotorId::Left, 1.0)),
                RemoteAction::Send(motor_command(MotorId::Right, 0.5)),
            ]
        );
    }

    #[test]
    fn test_differential_head_uses_rotate_frame() {
        let mut shaper = shaper("R-Arcade");
        let mut pad = Pad::default();
        pad.set(Axis::RightX, -0.6);

        let actions = shaper.process(&pad);
        assert_eq!(
            actions,
            vec![RemoteAction::Send(Command::HeadRotate { value: -0.6 })]
        );
    }

    #[test]
    fn test_sphere_scaling() {
        let mut shaper = shaper("BB-Arcade");
        let mut pad = Pad::default();
        pad.set(Axis::LeftY, -1.0);
        pad.set(Axis::RightX, -0.5);

        let actions = shaper.process(&pad);
        assert_eq!(
            actions,
            vec![
                RemoteAction::Send(Command::SphereDrive {
                    heading: 0x00,
                    speed: 204
                }),
                RemoteAction::Send(Command::SphereRotate {
                    direction: 0xFF,
                    speed: 44
                }),
            ]
        );

        pad.set(Axis::LeftY, 0.0);
        pad.set(Axis::RightX, 0.0);
        assert_eq!(
            shaper.process(&pad),
            vec![RemoteAction::Send(Command::SphereDrive {
                heading: 0x00,
                speed: 0
            })]
        );
        assert!(shaper.process(&pad).is_empty());
    }

    #[test]
    fn test_sphere_hysteresis() {
        let mut shaper = shaper("BB-Arcade");
        let mut pad = Pad::default();
        pad.set(Axis::LeftY, 0.50);
        assert_eq!(shaper.process(&pad).len(), 1);

        pad.set(Axis::LeftY, 0.51);
        assert!(shaper.process(&pad).is_empty());

        pad.set(Axis::LeftY, 0.53);
        assert_eq!(shaper.process(&pad).len(), 1);
    }

    #[test]
    fn test_button_fires_once_per_press() {
        let mut shaper = shaper("R-Arcade");
        let pad = Pad::default();

        pad.press(Button::B);
        assert_eq!(
            shaper.process(&pad),
            vec![RemoteAction::Send(Command::Accessory)]
        );
        assert!(shaper.process(&pad).is_empty());

        // Unbound buttons are consumed without an action
        pad.press(Button::X);
        assert!(shaper.process(&pad).is_empty());

        pad.press(Button::A);
        let actions = shaper.process(&pad);
        assert_eq!(actions.len(), 1);
        match actions[0] {
            RemoteAction::PlayAudio { group, clip } => {
                assert!((1..=3).contains(&group));
                assert!((1..=3).contains(&clip));
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_tap_between_ticks_still_fires() {
        let mut shaper = shaper("BB-Arcade");
        let input = InputState::new();

        input.press(Button::B);
        input.release(Button::B);
        assert_eq!(
            shaper.process(&input),
            vec![RemoteAction::Send(Command::Accessory)]
        );

        // Holding does not repeat
        input.press(Button::B);
        assert_eq!(shaper.process(&input).len(), 1);
        input.press(Button::B);
        assert!(shaper.process(&input).is_empty());
    }

    #[test]
    fn test_stop_all_covers_every_motor() {
        let mut shaper = shaper("R-Arcade");
        let mut pad = Pad::default();
        pad.set(Axis::LeftY, -1.0);
        shaper.process(&pad);

        let stops = shaper.stop_all();
        assert_eq!(
            stops,
            vec![
                Command::stop(MotorId::Left),
                Command::stop(MotorId::Right),
                Command::stop(MotorId::Head),
            ]
        );
    }
}
