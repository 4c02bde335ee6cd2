//! Bluetooth Module
//!
//! Droid control over BLE plus the advertising surface used for beacons.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                      │
//! │   (sync API for the control loop, owns the event rx)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ DispatchRequest (unbounded mpsc)
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │         DispatchBridge (thread + current-thread rt)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Session  │  │ RadioLink  │  │ Protocol │
//! │ - state   │  │ - btleplug │  │ - frames │
//! │ - writes  │  │ - fakes    │  │ - beacons│
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Frame layouts and beacon payloads
//! - [`link`] - Radio link trait
//! - [`btle`] - btleplug implementation of the link
//! - [`session`] - Connection lifecycle and serialized writes
//! - [`service`] - Dispatch thread and the synchronous connection API
//! - [`bluetoothctl`] - BlueZ shell driver for advertising

pub mod bluetoothctl;
pub mod btle;
pub mod link;
pub mod protocol;
pub mod service;
pub mod session;

pub use service::ConnectionManager;
