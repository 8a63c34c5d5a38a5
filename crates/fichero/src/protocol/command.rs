//! Command byte layouts for the D11s (AiYin) protocol.
//!
//! Every command is a fixed opcode prefix optionally followed by parameter
//! bytes. Layouts are dictated by firmware and must not be reordered.

use crate::BYTES_PER_ROW;

// -- Query opcodes --
const CMD_GET_MODEL: [u8; 4] = [0x10, 0xff, 0x20, 0xf0];
const CMD_GET_FIRMWARE: [u8; 4] = [0x10, 0xff, 0x20, 0xf1];
const CMD_GET_SERIAL: [u8; 4] = [0x10, 0xff, 0x20, 0xf2];
const CMD_GET_BOOT_VERSION: [u8; 4] = [0x10, 0xff, 0x20, 0xef];
const CMD_GET_BATTERY: [u8; 4] = [0x10, 0xff, 0x50, 0xf1];
const CMD_GET_STATUS: [u8; 3] = [0x10, 0xff, 0x40];
const CMD_GET_DENSITY: [u8; 3] = [0x10, 0xff, 0x11];
const CMD_GET_SHUTDOWN_TIME: [u8; 3] = [0x10, 0xff, 0x13];
const CMD_GET_ALL_INFO: [u8; 3] = [0x10, 0xff, 0x70];

// -- Configuration opcodes --
const CMD_SET_DENSITY: [u8; 4] = [0x10, 0xff, 0x10, 0x00];
const CMD_SET_PAPER_TYPE: [u8; 3] = [0x10, 0xff, 0x84];
const CMD_SET_SHUTDOWN_TIME: [u8; 3] = [0x10, 0xff, 0x12];
const CMD_FACTORY_RESET: [u8; 3] = [0x10, 0xff, 0x04];

// -- Print control opcodes --
const CMD_ENABLE_PRINTER: [u8; 4] = [0x10, 0xff, 0xfe, 0x01];
const CMD_STOP_PRINT: [u8; 4] = [0x10, 0xff, 0xfe, 0x45];
const CMD_FORM_FEED: [u8; 2] = [0x1d, 0x0c];
const CMD_FEED_DOTS: [u8; 2] = [0x1b, 0x4a];

/// GS v 0, mode 0.
const RASTER_PREFIX: [u8; 4] = [0x1d, 0x76, 0x30, 0x00];

/// Length of the raster frame header.
pub const RASTER_HEADER_LEN: usize = 8;

/// Number of zero bytes in the wake sequence.
pub const WAKE_LEN: usize = 12;

/// An immutable command payload ready to be written to the printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    bytes: Vec<u8>,
}

impl Command {
    fn with_params(opcode: &[u8], params: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(opcode.len() + params.len());
        bytes.extend_from_slice(opcode);
        bytes.extend_from_slice(params);
        Self { bytes }
    }

    fn fixed(opcode: &[u8]) -> Self {
        Self {
            bytes: opcode.to_vec(),
        }
    }

    pub fn get_model() -> Self {
        Self::fixed(&CMD_GET_MODEL)
    }

    pub fn get_firmware() -> Self {
        Self::fixed(&CMD_GET_FIRMWARE)
    }

    pub fn get_serial() -> Self {
        Self::fixed(&CMD_GET_SERIAL)
    }

    pub fn get_boot_version() -> Self {
        Self::fixed(&CMD_GET_BOOT_VERSION)
    }

    pub fn get_battery() -> Self {
        Self::fixed(&CMD_GET_BATTERY)
    }

    pub fn get_status() -> Self {
        Self::fixed(&CMD_GET_STATUS)
    }

    pub fn get_density() -> Self {
        Self::fixed(&CMD_GET_DENSITY)
    }

    pub fn get_shutdown_time() -> Self {
        Self::fixed(&CMD_GET_SHUTDOWN_TIME)
    }

    /// Pipe-delimited summary of name, MACs, firmware, serial and battery.
    pub fn get_all_info() -> Self {
        Self::fixed(&CMD_GET_ALL_INFO)
    }

    /// Density level: 0 = light, 1 = medium, 2 = thick.
    pub fn set_density(level: u8) -> Self {
        Self::with_params(&CMD_SET_DENSITY, &[level])
    }

    /// Paper byte: 0 = gap, 1 = black mark, 2 = continuous.
    pub fn set_paper_type(paper: u8) -> Self {
        Self::with_params(&CMD_SET_PAPER_TYPE, &[paper])
    }

    /// Auto power-off delay in minutes, big-endian.
    pub fn set_shutdown_time(minutes: u16) -> Self {
        Self::with_params(&CMD_SET_SHUTDOWN_TIME, &minutes.to_be_bytes())
    }

    pub fn factory_reset() -> Self {
        Self::fixed(&CMD_FACTORY_RESET)
    }

    pub fn wake() -> Self {
        Self {
            bytes: vec![0u8; WAKE_LEN],
        }
    }

    pub fn enable_printer() -> Self {
        Self::fixed(&CMD_ENABLE_PRINTER)
    }

    pub fn stop_print() -> Self {
        Self::fixed(&CMD_STOP_PRINT)
    }

    /// Advance to the next label.
    pub fn form_feed() -> Self {
        Self::fixed(&CMD_FORM_FEED)
    }

    pub fn feed_dots(dots: u8) -> Self {
        Self::with_params(&CMD_FEED_DOTS, &[dots])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for Command {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Raster frame header: GS v 0 m xL xH yL yH, with x fixed at 12 bytes.
pub fn raster_header(rows: u16) -> [u8; RASTER_HEADER_LEN] {
    let [lo, hi] = rows.to_le_bytes();
    [
        RASTER_PREFIX[0],
        RASTER_PREFIX[1],
        RASTER_PREFIX[2],
        RASTER_PREFIX[3],
        BYTES_PER_ROW as u8,
        0x00,
        lo,
        hi,
    ]
}

/// Whether a stop-print response acknowledges completion (0xAA or "OK").
pub fn is_stop_ack(response: &[u8]) -> bool {
    response.first() == Some(&0xaa) || response.starts_with(b"OK")
}

/// Whether a configuration response is the literal "OK".
pub fn is_ok_response(response: &[u8]) -> bool {
    response == b"OK"
}
