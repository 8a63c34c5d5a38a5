//! Published printer events and the broadcast emitter.
//!
//! Consumers subscribe to a `tokio::sync::broadcast` channel. Event names and
//! payload field names match the JSON shape consumed by front ends.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::info::PrinterInfo;

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

// -- Event name constants --

pub const CONNECT: &str = "connect";
pub const DISCONNECT: &str = "disconnect";
pub const PRINTER_INFO_FETCHED: &str = "printerinfofetched";
pub const HEARTBEAT: &str = "heartbeat";
pub const HEARTBEAT_FAILED: &str = "heartbeatfailed";
pub const PRINT_PROGRESS: &str = "printprogress";
pub const PACKET_SENT: &str = "packetsent";
pub const PACKET_RECEIVED: &str = "packetreceived";

/// Raw bytes on the wire plus the command id derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Packet {
    command: u16,
    bytes: Vec<u8>,
}

impl Packet {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let command = match bytes.as_slice() {
            [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
            [only] => u16::from(*only),
            [] => 0,
        };
        Self { command, bytes }
    }

    /// First two bytes, big-endian (or the single byte of a one-byte packet).
    pub fn command(&self) -> u16 {
        self.command
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Battery sample taken by each successful heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatData {
    pub charge_level: u8,
    pub charging: bool,
}

impl HeartbeatData {
    /// Decode a battery response: last byte is the percentage, the one before
    /// it the charging flag.
    pub fn from_battery_response(response: &[u8]) -> Option<Self> {
        match response {
            [.., charging, level] => Some(Self {
                charge_level: *level,
                charging: *charging != 0,
            }),
            _ => None,
        }
    }
}

/// Per-copy progress, reported once after printing and once after feeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintProgress {
    /// One-based copy number.
    pub page: u32,
    pub page_print_progress: u8,
    pub page_feed_progress: u8,
}

/// Everything the client publishes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrinterEvent {
    Connect {
        #[serde(rename = "deviceName")]
        device_name: Option<String>,
    },
    Disconnect,
    PrinterInfoFetched {
        info: PrinterInfo,
    },
    Heartbeat {
        data: HeartbeatData,
    },
    HeartbeatFailed {
        #[serde(rename = "failedAttempts")]
        failed_attempts: u32,
    },
    PrintProgress(PrintProgress),
    PacketSent {
        packet: Packet,
    },
    PacketReceived {
        packet: Packet,
    },
}

impl PrinterEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => CONNECT,
            Self::Disconnect => DISCONNECT,
            Self::PrinterInfoFetched { .. } => PRINTER_INFO_FETCHED,
            Self::Heartbeat { .. } => HEARTBEAT,
            Self::HeartbeatFailed { .. } => HEARTBEAT_FAILED,
            Self::PrintProgress(_) => PRINT_PROGRESS,
            Self::PacketSent { .. } => PACKET_SENT,
            Self::PacketReceived { .. } => PACKET_RECEIVED,
        }
    }
}

/// Cloneable publisher shared by every component of a client.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<PrinterEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: PrinterEvent) {
        tracing::trace!(event = event.name(), "Emitting printer event");
        let _ = self.tx.send(event);
    }
}
