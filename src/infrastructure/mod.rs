pub mod beacon;
pub mod bluetooth;
pub mod logging;
