//! Control library for Fichero / D11s BLE thermal label printers.
//!
//! Provides the command/response channel over BLE notifications, paced bulk
//! transfer, raster encoding, the per-job print task and a heartbeat monitor.

use std::time::Duration;

pub mod ble;
pub mod channel;
pub mod client;
pub mod events;
pub mod heartbeat;
pub mod imaging;
pub mod info;
pub mod options;
pub mod print_task;
pub mod protocol;
pub mod raster;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use ble::BleConnector;
pub use channel::CommandChannel;
pub use client::FicheroClient;
pub use events::{EventEmitter, HeartbeatData, Packet, PrintProgress, PrinterEvent};
pub use heartbeat::HeartbeatMonitor;
pub use info::PrinterInfo;
pub use options::{ClientConfig, LabelType, PrintTaskOptions};
pub use print_task::{PrintTask, PrintTaskState};
pub use protocol::{Command, ModelMetadata, PrintDirection, PrinterModel, PrinterStatus};
pub use raster::EncodedImage;
pub use transport::{Connector, DeviceSelector, LinkEvent, OpenedLink, Transport};

/// Print head width in pixels.
pub const PRINTHEAD_PX: u32 = 96;

/// Bytes per raster row (96 px / 8).
pub const BYTES_PER_ROW: usize = 12;

/// Errors that can occur during printer operations.
#[derive(Debug, thiserror::Error)]
pub enum FicheroError {
    #[error("Printer not found during BLE scan")]
    PrinterNotFound,

    #[error("Missing {0} characteristic on connected device")]
    MissingCharacteristic(&'static str),

    #[error("BLE connection error: {0}")]
    BleConnection(String),

    #[error("BLE write error: {0}")]
    BleWrite(String),

    #[error("BLE scan error: {0}")]
    BleScan(String),

    #[error("Not connected to any device")]
    NotConnected,

    #[error("Printer not ready: {0}")]
    NotReady(PrinterStatus),

    #[error("No stop acknowledgment within {0:?}")]
    StopTimeout(Duration),

    #[error("Operation not supported by this printer: {0}")]
    Unsupported(&'static str),

    #[error("Invalid image dimensions: {width}x{height} ({reason})")]
    InvalidImageSize {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl FicheroError {
    /// Whether this error belongs to device selection or GATT connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::PrinterNotFound
                | Self::MissingCharacteristic(_)
                | Self::BleConnection(_)
                | Self::BleScan(_)
                | Self::NotConnected
        )
    }
}

/// Result type alias for printer operations.
pub type Result<T> = std::result::Result<T, FicheroError>;
