//! Transport Session
//!
//! Owns the one logical connection to a droid: discovery, handshake,
//! serialized writes and teardown. The link sits behind an async mutex which
//! doubles as the write lock, so frames reach the radio in the order their
//! writers acquired it.

use crate::domain::models::{PeerAddress, SessionState};
use crate::domain::settings::ConnectionConfig;
use crate::infrastructure::bluetooth::link::{LinkError, RadioLink};
use crate::infrastructure::bluetooth::protocol::{self, Command, HexBytes};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("timed out looking for {0}")]
    DiscoveryTimeout(PeerAddress),

    #[error("{0} was not found")]
    PeerNotFound(PeerAddress),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(PeerAddress),

    #[error("could not open link: {0}")]
    LinkOpen(#[source] LinkError),

    #[error("a connection is already in progress")]
    Busy,

    #[error("connection attempt timed out")]
    OverallTimeout,
}

/// Process-wide session state, shared by every session that may exist
#[derive(Debug, Clone, Default)]
pub struct SessionStateCell(Arc<Mutex<SessionState>>);

impl SessionStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SessionState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, state: SessionState) {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            debug!("Session state {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Claim the cell for a new connection attempt. Fails without side
    /// effects while another session is connecting, connected or closing.
    pub fn try_begin_connect(&self) -> bool {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_busy() {
            return false;
        }
        debug!("Session state {} -> {}", *current, SessionState::Connecting);
        *current = SessionState::Connecting;
        true
    }
}

pub struct Session<L: RadioLink> {
    peer: PeerAddress,
    state: SessionStateCell,
    link: tokio::sync::Mutex<L>,
    config: ConnectionConfig,
}

impl<L: RadioLink> Session<L> {
    pub fn new(peer: PeerAddress, link: L, state: SessionStateCell, config: ConnectionConfig) -> Self {
        Self {
            peer,
            state,
            link: tokio::sync::Mutex::new(link),
            config,
        }
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state.get() == SessionState::Connected
    }

    /// Claim the state cell and connect
    pub async fn connect(&self) -> Result<(), ConnectError> {
        if !self.state.try_begin_connect() {
            return Err(ConnectError::Busy);
        }
        self.establish().await
    }

    /// Connect once the state cell has already been claimed
    pub(crate) async fn establish(&self) -> Result<(), ConnectError> {
        info!("Connecting to {}", self.peer);
        let mut link = self.link.lock().await;

        let result = self.open_link(&mut *link).await;
        if let Err(e) = result {
            warn!("Connection to {} failed: {}", self.peer, e);
            self.state.set(SessionState::Failed);
            if let Err(e) = link.close().await {
                debug!("Close after failed connect: {}", e);
            }
            self.state.set(SessionState::Idle);
            return Err(e);
        }

        self.handshake(&mut *link).await;
        self.state.set(SessionState::Connected);
        info!("Connected to {}", self.peer);
        Ok(())
    }

    async fn open_link(&self, link: &mut L) -> Result<(), ConnectError> {
        match timeout(self.config.discovery_timeout, link.discover(&self.peer)).await {
            Err(_) => return Err(ConnectError::DiscoveryTimeout(self.peer.clone())),
            Ok(Err(LinkError::PeerNotFound(peer))) => return Err(ConnectError::PeerNotFound(peer)),
            Ok(Err(e)) => return Err(ConnectError::LinkOpen(e)),
            Ok(Ok(())) => {}
        }

        match timeout(self.config.connect_timeout, link.open()).await {
            Err(_) => Err(ConnectError::ConnectTimeout(self.peer.clone())),
            Ok(Err(e)) => Err(ConnectError::LinkOpen(e)),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// LOGON frames followed by the confirmation cue. Losses are logged, not
    /// surfaced; the firmware gives no acknowledgement to check against.
    async fn handshake(&self, link: &mut L) {
        for attempt in 1..=self.config.handshake_repeat {
            if let Err(e) = link.write_without_response(&protocol::LOGON).await {
                warn!("Handshake uncertain, LOGON {} not written: {}", attempt, e);
            }
            sleep(self.config.handshake_spacing).await;
        }

        let cue = Command::AudioClipPlay {
            clip: protocol::CONNECT_CUE_CLIP,
        }
        .encode();
        if let Err(e) = link.write_without_response(&cue).await {
            warn!("Handshake uncertain, confirmation cue not written: {}", e);
        }
    }

    /// Write a raw frame. Returns false when not connected or on any
    /// transport failure; the session stays as it was.
    pub async fn write(&self, frame: &[u8]) -> bool {
        if !self.is_connected() {
            debug!("Dropping frame, session is {}", self.state.get());
            return false;
        }

        let mut link = self.link.lock().await;
        match link.write_without_response(frame).await {
            Ok(()) => {
                trace!("-> {}", HexBytes(frame));
                true
            }
            Err(e) => {
                warn!("Transport write failure: {}", e);
                false
            }
        }
    }

    pub async fn send(&self, command: &Command) -> bool {
        self.write(&command.encode()).await
    }

    /// Group select, settle gap, clip play. The write lock is released during
    /// the gap so motion frames can go out in between.
    pub async fn play_audio(&self, group: u8, clip: u8) -> bool {
        if !self.send(&Command::AudioGroupSelect { group }).await {
            return false;
        }
        sleep(self.config.audio_settle).await;
        self.send(&Command::AudioClipPlay { clip }).await
    }

    /// Whether the radio still reports the link up
    pub async fn link_alive(&self) -> bool {
        self.link.lock().await.is_connected().await
    }

    /// Record an unexpected drop. The bridge follows up with a release.
    pub fn mark_lost(&self) {
        warn!("Link to {} lost", self.peer);
        self.state.set(SessionState::Lost);
    }

    /// Idempotent teardown; always ends in Idle
    pub async fn disconnect(&self) {
        if matches!(
            self.state.get(),
            SessionState::Connecting | SessionState::Connected
        ) {
            self.state.set(SessionState::Disconnecting);
        }
        let mut link = self.link.lock().await;
        if let Err(e) = link.close().await {
            warn!("Error closing link to {}: {}", self.peer, e);
        }
        self.state.set(SessionState::Idle);
        info!("Disconnected from {}", self.peer);
    }

    /// Used when a graceful disconnect overran its timeout. The link handle is
    /// dropped with the session.
    pub fn force_release(&self) {
        warn!("Force releasing link to {}", self.peer);
        self.state.set(SessionState::Idle);
    }
}
