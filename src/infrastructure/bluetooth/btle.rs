//! btleplug Backend
//!
//! Production [`RadioLink`] built on btleplug's central API (BlueZ on Linux).

use crate::domain::models::PeerAddress;
use crate::domain::settings::ConnectionConfig;
use crate::infrastructure::bluetooth::link::{LinkError, RadioLink};
use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Interval between peripheral list checks while discovering
const DISCOVERY_POLL: Duration = Duration::from_millis(200);

impl From<btleplug::Error> for LinkError {
    fn from(e: btleplug::Error) -> Self {
        LinkError::Backend(e.to_string())
    }
}

pub struct BtleplugLink {
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    command_char: Option<Characteristic>,
    /// Set while a scan started by `discover` may still be running
    scanning: bool,
    service_uuid: Uuid,
    command_uuid: Uuid,
}

impl BtleplugLink {
    pub fn new(config: &ConnectionConfig) -> Result<Self, LinkError> {
        let service_uuid = Uuid::parse_str(&config.service_uuid)
            .map_err(|e| LinkError::Backend(format!("invalid service uuid: {}", e)))?;
        let command_uuid = Uuid::parse_str(&config.command_char_uuid)
            .map_err(|e| LinkError::Backend(format!("invalid characteristic uuid: {}", e)))?;

        Ok(Self {
            adapter: None,
            peripheral: None,
            command_char: None,
            scanning: false,
            service_uuid,
            command_uuid,
        })
    }

    async fn first_adapter() -> Result<Adapter, LinkError> {
        let manager = Manager::new().await?;
        manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(LinkError::NoAdapter)
    }

    async fn stop_scan(&mut self) {
        if !std::mem::take(&mut self.scanning) {
            return;
        }
        if let Some(adapter) = &self.adapter {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
    }

    async fn find_peer(adapter: &Adapter, peer: &PeerAddress) -> Result<Option<Peripheral>, LinkError> {
        for peripheral in adapter.peripherals().await? {
            if peer.matches(&peripheral.address().to_string()) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RadioLink for BtleplugLink {
    async fn discover(&mut self, peer: &PeerAddress) -> Result<(), LinkError> {
        if self.adapter.is_none() {
            self.adapter = Some(Self::first_adapter().await?);
        }
        let adapter = self.adapter.clone().ok_or(LinkError::NoAdapter)?;

        // A peer the stack already knows about does not need a scan
        if let Some(peripheral) = Self::find_peer(&adapter, peer).await? {
            debug!("Peer {} already known to the adapter", peer);
            self.peripheral = Some(peripheral);
            return Ok(());
        }

        adapter.start_scan(ScanFilter::default()).await?;
        self.scanning = true;
        info!("Scanning for {}", peer);

        // Runs until found; the caller bounds this with its discovery timeout
        // and a dropped future leaves `scanning` set for `close` to clean up.
        let found = loop {
            if let Some(peripheral) = Self::find_peer(&adapter, peer).await? {
                break peripheral;
            }
            tokio::time::sleep(DISCOVERY_POLL).await;
        };

        self.stop_scan().await;
        self.peripheral = Some(found);
        Ok(())
    }

    async fn open(&mut self) -> Result<(), LinkError> {
        let peripheral = self.peripheral.as_ref().ok_or(LinkError::NotConnected)?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let command_char = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == self.command_uuid && c.service_uuid == self.service_uuid)
            .ok_or_else(|| LinkError::CharacteristicNotFound(self.command_uuid.to_string()))?;

        debug!("Command characteristic resolved: {}", command_char.uuid);
        self.command_char = Some(command_char);
        Ok(())
    }

    async fn write_without_response(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let (Some(peripheral), Some(command_char)) = (&self.peripheral, &self.command_char) else {
            return Err(LinkError::NotConnected);
        };
        peripheral
            .write(command_char, frame, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match &self.peripheral {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.stop_scan().await;
        self.command_char = None;
        let Some(peripheral) = self.peripheral.take() else {
            return Ok(());
        };
        if peripheral.is_connected().await.unwrap_or(false) {
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}
