//! Transport seam between the protocol engine and a BLE stack.
//!
//! A [`Connector`] opens a link to a selected printer and hands back a
//! [`Transport`] for writes plus a stream of [`LinkEvent`]s for notifications
//! and disconnects. The btleplug backend lives in [`crate::ble`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;

/// Advertised name prefixes of supported printers.
pub const PRINTER_NAME_PREFIXES: &[&str] = &["FICHERO", "D11s_"];

/// Something the lower layer reports asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bytes delivered on the notify characteristic.
    Notification(Vec<u8>),
    /// The device dropped the connection.
    Disconnected,
}

/// Write side of an open link.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write bytes to the write characteristic without link-layer acknowledgment.
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Close the link. Must be safe to call more than once.
    async fn disconnect(&self) -> Result<()>;
}

/// A connected, subscribed link.
pub struct OpenedLink {
    pub device_name: Option<String>,
    pub transport: Arc<dyn Transport>,
    /// Closing of this channel is treated as a disconnect.
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens links to printers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Select a device, connect, resolve the write/notify characteristics and
    /// subscribe to notifications.
    async fn open(&self, selector: &DeviceSelector) -> Result<OpenedLink>;
}

/// Which printer to connect to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceSelector {
    /// First device advertising a supported name prefix.
    #[default]
    FirstAvailable,
    /// Platform id or MAC address; separators and case are ignored.
    Address(String),
    /// Exact advertised name, case-insensitive.
    Name(String),
}

impl DeviceSelector {
    /// Interpret user input: anything that looks like an address selects by
    /// address, otherwise by name.
    pub fn parse(target: &str) -> Self {
        let target = target.trim();
        if target.is_empty() {
            Self::FirstAvailable
        } else if looks_like_address(target) {
            Self::Address(target.to_string())
        } else {
            Self::Name(target.to_string())
        }
    }

    pub fn matches(&self, id: &str, name: &str) -> bool {
        match self {
            Self::FirstAvailable => is_supported_name(name),
            Self::Address(addr) => {
                id.eq_ignore_ascii_case(addr) || normalize_device_id(id) == normalize_device_id(addr)
            }
            Self::Name(wanted) => !name.is_empty() && name.eq_ignore_ascii_case(wanted),
        }
    }
}

/// Whether an advertised name belongs to a supported printer.
pub fn is_supported_name(name: &str) -> bool {
    PRINTER_NAME_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

pub fn normalize_device_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn looks_like_address(raw: &str) -> bool {
    let normalized = normalize_device_id(raw);
    let is_hex = normalized.chars().all(|c| c.is_ascii_hexdigit());
    is_hex && (normalized.len() == 12 || normalized.len() == 32)
}
