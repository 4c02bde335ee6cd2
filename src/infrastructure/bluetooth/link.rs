//! Radio Link Abstraction
//!
//! The session only needs five things from the radio stack. Keeping them
//! behind a trait lets the session run against btleplug in production and
//! against a recording fake in tests.

use crate::domain::models::PeerAddress;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no Bluetooth adapter available")]
    NoAdapter,

    #[error("peer {0} not found")]
    PeerNotFound(PeerAddress),

    #[error("command characteristic {0} not found")]
    CharacteristicNotFound(String),

    #[error("link is not open")]
    NotConnected,

    #[error("radio backend error: {0}")]
    Backend(String),
}

/// A link to a single peripheral
#[async_trait]
pub trait RadioLink: Send + Sync + 'static {
    /// Locate the peer by address. Completes once the peer is known to the stack.
    async fn discover(&mut self, peer: &PeerAddress) -> Result<(), LinkError>;

    /// Open the link to the discovered peer and resolve the command characteristic
    async fn open(&mut self) -> Result<(), LinkError>;

    /// Write one frame to the command characteristic without waiting for an acknowledgement
    async fn write_without_response(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Whether the stack still reports the link as up
    async fn is_connected(&self) -> bool;

    /// Tear the link down. Must be safe to call on a link that never opened.
    async fn close(&mut self) -> Result<(), LinkError>;
}
