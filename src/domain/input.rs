use crate::domain::profiles::{Axis, Button, InputSource};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const AXIS_MAX: f32 = 32767.0;
const TRIGGER_LOWER_DEADZONE: f32 = 2000.0;
const TRIGGER_UPPER_DEADZONE: f32 = 31000.0;
const TRIGGER_SMOOTHING: f32 = 0.2;

#[derive(Default)]
struct Inner {
    axes: HashMap<Axis, i16>,
    trigger_l2: f32,
    trigger_r2: f32,
    held: HashSet<Button>,
    pressed: HashSet<Button>,
}

/// Gamepad state shared between the input feeder and the control loop
///
/// One instance is created at startup and handed around by reference.
#[derive(Default)]
pub struct InputState {
    inner: Mutex<Inner>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a raw reading in [-32768, 32767]
    pub fn set_axis(&self, axis: Axis, raw: i32) {
        let raw = raw.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        self.lock().axes.insert(axis, raw);
    }

    /// Store a normalised reading, converted back to the raw range
    pub fn set_axis_float(&self, axis: Axis, value: f32) {
        let raw = (value.clamp(-1.0, 1.0) * AXIS_MAX).round() as i32;
        self.set_axis(axis, raw);
    }

    pub fn press(&self, button: Button) {
        let mut inner = self.lock();
        if inner.held.insert(button) {
            inner.pressed.insert(button);
        }
    }

    pub fn release(&self, button: Button) {
        self.lock().held.remove(&button);
    }

    pub fn clear_pressed(&self) {
        self.lock().pressed.clear();
    }

    /// Ease the trigger values toward their raw targets. Call once per tick.
    pub fn update_smoothing(&self) {
        let mut inner = self.lock();
        let l2 = trigger_target(inner.axes.get(&Axis::L2).copied().unwrap_or(0));
        let r2 = trigger_target(inner.axes.get(&Axis::R2).copied().unwrap_or(0));
        inner.trigger_l2 += (l2 - inner.trigger_l2) * TRIGGER_SMOOTHING;
        inner.trigger_r2 += (r2 - inner.trigger_r2) * TRIGGER_SMOOTHING;
    }
}

fn trigger_target(raw: i16) -> f32 {
    let raw = f32::from(raw);
    if raw < TRIGGER_LOWER_DEADZONE {
        0.0
    } else if raw > TRIGGER_UPPER_DEADZONE {
        1.0
    } else {
        (raw - TRIGGER_LOWER_DEADZONE) / (TRIGGER_UPPER_DEADZONE - TRIGGER_LOWER_DEADZONE)
    }
}

impl InputSource for InputState {
    fn axis(&self, axis: Axis) -> f32 {
        let inner = self.lock();
        match axis {
            Axis::L2 => inner.trigger_l2,
            Axis::R2 => inner.trigger_r2,
            _ => f32::from(inner.axes.get(&axis).copied().unwrap_or(0)) / AXIS_MAX,
        }
    }

    fn is_pressed(&self, button: Button) -> bool {
        self.lock().pressed.remove(&button)
    }
}
