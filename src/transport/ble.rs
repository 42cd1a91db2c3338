//! btleplug-backed BLE transport.
//!
//! Mirrors the abstract capability onto a real adapter: discovery bursts via
//! `start_scan`/`stop_scan`, connection establishment with service discovery
//! and characteristic verification, a notification pump task that forwards
//! inbound text to the gateway, and best-effort teardown.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::error::GatewayError;
use crate::transport::{Advertisement, Link, LinkEvent, LinkHandle, Transport};

/// Capacity of the per-link event channel. Notifications are short text
/// lines; the gateway drains them promptly.
const EVENT_CHANNEL_CAPACITY: usize = 64;

fn transport_err(context: &str, err: btleplug::Error) -> GatewayError {
    GatewayError::Transport(format!("{context}: {err}"))
}

/// BLE transport bound to the first available adapter.
pub struct BleTransport {
    adapter: Adapter,
    service_uuid: Uuid,
    command_uuid: Uuid,
    notify_uuid: Uuid,
    connect_timeout: Duration,
    resolve_scan: Duration,
}

impl BleTransport {
    /// Open the first BLE adapter and parse the configured UUIDs.
    pub async fn new(config: &TransportConfig, resolve_scan: Duration) -> Result<Self, GatewayError> {
        let manager = Manager::new()
            .await
            .map_err(|e| transport_err("BLE manager", e))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| transport_err("list adapters", e))?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Transport("no BLE adapter found".to_string()))?;

        let parse = |label: &str, s: &str| {
            Uuid::parse_str(s)
                .map_err(|e| GatewayError::Transport(format!("bad {label} uuid {s}: {e}")))
        };

        Ok(Self {
            adapter,
            service_uuid: parse("service", &config.service_uuid)?,
            command_uuid: parse("command", &config.command_uuid)?,
            notify_uuid: parse("notify", &config.notify_uuid)?,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            resolve_scan,
        })
    }

    /// Advertisement snapshot of everything the adapter currently knows.
    async fn collect_sightings(&self) -> Result<Vec<Advertisement>, GatewayError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| transport_err("list peripherals", e))?;

        let mut sightings = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            sightings.push(Advertisement {
                address: props.address.to_string(),
                name: props.local_name,
                rssi: props.rssi,
                services: props.services.iter().map(Uuid::to_string).collect(),
            });
        }
        Ok(sightings)
    }

    /// Find a known peripheral by address (or platform peripheral id).
    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>, GatewayError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| transport_err("list peripherals", e))?;

        for peripheral in peripherals {
            if peripheral.id().to_string().eq_ignore_ascii_case(address) {
                return Ok(Some(peripheral));
            }
            if let Ok(Some(props)) = peripheral.properties().await {
                if props.address.to_string().eq_ignore_ascii_case(address) {
                    return Ok(Some(peripheral));
                }
            }
        }
        Ok(None)
    }

    async fn establish(&self, peripheral: &Peripheral) -> Result<LinkHandle, GatewayError> {
        peripheral
            .connect()
            .await
            .map_err(|e| transport_err("connect", e))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| transport_err("discover services", e))?;

        let characteristics = peripheral.characteristics();
        let command_char = characteristics
            .iter()
            .find(|c| c.uuid == self.command_uuid)
            .cloned();
        let notify_char = characteristics
            .iter()
            .find(|c| c.uuid == self.notify_uuid)
            .cloned();
        let (Some(command_char), Some(notify_char)) = (command_char, notify_char) else {
            let _ = peripheral.disconnect().await;
            return Err(GatewayError::CapabilityMissing);
        };

        peripheral
            .subscribe(&notify_char)
            .await
            .map_err(|e| transport_err("subscribe", e))?;

        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| transport_err("notification stream", e))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let notify_uuid = self.notify_uuid;
        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != notify_uuid {
                    continue;
                }
                let text = String::from_utf8_lossy(&notification.value)
                    .trim()
                    .to_string();
                if tx.send(LinkEvent::Notification(text)).await.is_err() {
                    return;
                }
            }
            // Stream end means the peripheral dropped the connection.
            debug!("BLE notification stream closed");
            let _ = tx.send(LinkEvent::Disconnected).await;
        });

        let (name, rssi) = match peripheral.properties().await {
            Ok(Some(props)) => (props.local_name, props.rssi),
            _ => (None, None),
        };

        Ok(LinkHandle {
            link: Box::new(BleLink {
                peripheral: peripheral.clone(),
                command_char,
                notify_char,
            }),
            events: rx,
            name,
            rssi,
        })
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>, GatewayError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| transport_err("start scan", e))?;
        tokio::time::sleep(duration).await;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("stop_scan failed: {e}");
        }
        self.collect_sightings().await
    }

    async fn connect(&self, address: &str) -> Result<LinkHandle, GatewayError> {
        let peripheral = match self.find_peripheral(address).await? {
            Some(p) => p,
            None => {
                // Unknown to the adapter — one short discovery round may
                // bring it back into the cache.
                let _ = self.scan(self.resolve_scan).await;
                self.find_peripheral(address)
                    .await?
                    .ok_or_else(|| GatewayError::DeviceNotFound(address.to_string()))?
            }
        };

        match tokio::time::timeout(self.connect_timeout, self.establish(&peripheral)).await {
            Ok(result) => result,
            Err(_) => {
                let _ = peripheral.disconnect().await;
                Err(GatewayError::Transport(format!(
                    "connection to {address} timed out after {}s",
                    self.connect_timeout.as_secs()
                )))
            }
        }
    }
}

struct BleLink {
    peripheral: Peripheral,
    command_char: btleplug::api::Characteristic,
    notify_char: btleplug::api::Characteristic,
}

#[async_trait]
impl Link for BleLink {
    async fn write(&self, data: &[u8]) -> Result<(), GatewayError> {
        self.peripheral
            .write(&self.command_char, data, WriteType::WithoutResponse)
            .await
            .map_err(|e| transport_err("write", e))
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.peripheral.unsubscribe(&self.notify_char).await {
            debug!("unsubscribe during teardown: {e}");
        }
        if let Err(e) = self.peripheral.disconnect().await {
            debug!("disconnect during teardown: {e}");
        }
    }
}
