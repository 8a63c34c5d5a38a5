//! Printer status byte decoding.
//!
//! The bit layout is fixed across D11s firmware revisions:
//! 0x01 printing, 0x02 cover open, 0x04 no paper, 0x08 low battery,
//! 0x10 or 0x40 overheated, 0x20 charging.

use std::fmt;

use serde::Serialize;

const BIT_PRINTING: u8 = 0x01;
const BIT_COVER_OPEN: u8 = 0x02;
const BIT_NO_PAPER: u8 = 0x04;
const BIT_LOW_BATTERY: u8 = 0x08;
const BIT_OVERHEATED: u8 = 0x10;
const BIT_CHARGING: u8 = 0x20;
const BIT_OVERHEATED_ALT: u8 = 0x40;

/// Bits that must be clear before a print job may start.
const BLOCKING_MASK: u8 = BIT_COVER_OPEN | BIT_NO_PAPER | BIT_OVERHEATED | BIT_OVERHEATED_ALT;

/// Decoded status byte returned by `10 FF 40`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrinterStatus {
    raw: u8,
}

impl PrinterStatus {
    pub fn from_byte(raw: u8) -> Self {
        Self { raw }
    }

    /// Decode the last byte of a status response, if any.
    pub fn from_response(response: &[u8]) -> Option<Self> {
        response.last().copied().map(Self::from_byte)
    }

    pub fn raw(&self) -> u8 {
        self.raw
    }

    pub fn printing(&self) -> bool {
        self.raw & BIT_PRINTING != 0
    }

    pub fn cover_open(&self) -> bool {
        self.raw & BIT_COVER_OPEN != 0
    }

    pub fn no_paper(&self) -> bool {
        self.raw & BIT_NO_PAPER != 0
    }

    pub fn low_battery(&self) -> bool {
        self.raw & BIT_LOW_BATTERY != 0
    }

    /// Either overheat bit; which one fired is not distinguished.
    pub fn overheated(&self) -> bool {
        self.raw & (BIT_OVERHEATED | BIT_OVERHEATED_ALT) != 0
    }

    pub fn charging(&self) -> bool {
        self.raw & BIT_CHARGING != 0
    }

    /// True unless the cover is open, paper is missing or the head is overheated.
    pub fn ready_to_print(&self) -> bool {
        self.raw & BLOCKING_MASK == 0
    }

    /// Active conditions in bit order.
    pub fn flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.printing() {
            flags.push("printing");
        }
        if self.cover_open() {
            flags.push("cover open");
        }
        if self.no_paper() {
            flags.push("no paper");
        }
        if self.low_battery() {
            flags.push("low battery");
        }
        if self.overheated() {
            flags.push("overheated");
        }
        if self.charging() {
            flags.push("charging");
        }
        flags
    }

    /// Comma-joined flags, or "ready" when no bit is set.
    pub fn description(&self) -> String {
        let flags = self.flags();
        if flags.is_empty() {
            "ready".to_string()
        } else {
            flags.join(", ")
        }
    }
}

impl fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_ready() {
        let status = PrinterStatus::from_byte(0x00);
        assert_eq!(status.description(), "ready");
        assert!(status.ready_to_print());
    }

    #[test]
    fn test_printing_bit() {
        let status = PrinterStatus::from_byte(0x01);
        assert!(status.description().contains("printing"));
        assert!(status.ready_to_print());
    }

    #[test]
    fn test_both_overheat_bits_map_to_one_flag() {
        assert_eq!(PrinterStatus::from_byte(0x10).description(), "overheated");
        assert_eq!(PrinterStatus::from_byte(0x40).description(), "overheated");
        assert_eq!(PrinterStatus::from_byte(0x50).description(), "overheated");
        assert!(!PrinterStatus::from_byte(0x40).ready_to_print());
    }

    #[test]
    fn test_flags_in_bit_order() {
        let status = PrinterStatus::from_byte(0xff);
        assert_eq!(
            status.description(),
            "printing, cover open, no paper, low battery, overheated, charging"
        );
    }

    #[test]
    fn test_blocking_conditions() {
        assert!(!PrinterStatus::from_byte(0x02).ready_to_print());
        assert!(!PrinterStatus::from_byte(0x04).ready_to_print());
        assert!(PrinterStatus::from_byte(0x08 | 0x20).ready_to_print());
    }

    #[test]
    fn test_from_response_uses_last_byte() {
        assert_eq!(
            PrinterStatus::from_response(&[0x10, 0xff, 0x04]).map(|s| s.raw()),
            Some(0x04)
        );
        assert!(PrinterStatus::from_response(&[]).is_none());
    }
}
