//! Abstract wireless transport: scan, connect, write, notifications.
//!
//! The gateway core never touches a BLE stack directly. It sees two traits —
//! [`Transport`] for discovery and connection establishment, [`Link`] for an
//! established session — plus a stream of [`LinkEvent`]s carrying inbound
//! notifications and unsolicited disconnects. The production implementation
//! lives in [`ble`]; tests script a mock.

pub mod ble;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::GatewayError;

/// One device sighting from a discovery burst.
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// Transport-layer address, the stable device key.
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Advertised service UUIDs, lowercase hyphenated.
    pub services: Vec<String>,
}

/// Asynchronous events from an established link.
#[derive(Debug)]
pub enum LinkEvent {
    /// One inbound notification, decoded to text.
    Notification(String),
    /// The transport layer reported the link dropped.
    Disconnected,
}

/// An established connection plus its event stream. The stream closes when
/// the link is gone for good.
pub struct LinkHandle {
    pub link: Box<dyn Link>,
    pub events: mpsc::Receiver<LinkEvent>,
    /// Display name resolved during connection, if any.
    pub name: Option<String>,
    /// Signal strength at connect time, if the stack reports one.
    pub rssi: Option<i16>,
}

/// Discovery and connection establishment. Scanning is reentrant with
/// respect to an open connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run one discovery burst of roughly `duration`.
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>, GatewayError>;

    /// Resolve `address`, open a connection, verify the command/notify
    /// endpoints and subscribe to notifications.
    async fn connect(&self, address: &str) -> Result<LinkHandle, GatewayError>;
}

/// An open session to one node.
#[async_trait]
pub trait Link: Send + Sync {
    /// Write one command's bytes to the command endpoint.
    async fn write(&self, data: &[u8]) -> Result<(), GatewayError>;

    /// Best-effort teardown: unsubscribe and close. Consumes the link; the
    /// caller has already reset its own state and discards the result.
    async fn close(self: Box<Self>);
}
