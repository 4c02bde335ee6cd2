//! Droid Toolbox
//!
//! Control engine for BLE droids: connection lifecycle, command frames,
//! remote-control shaping and beacon simulation.

pub mod app;
pub mod console;
pub mod domain;
pub mod infrastructure;

pub use app::{DroidToolbox, Flow};
