//! Client and print-task configuration.
//!
//! `ClientConfig` controls session behavior (timeouts, heartbeat, what runs
//! on connect). `PrintTaskOptions` is fixed for the lifetime of one job.

use std::time::Duration;

use serde::Serialize;

use crate::channel::DEFAULT_RESPONSE_TIMEOUT;
use crate::heartbeat::HEARTBEAT_INTERVAL;
use crate::{FicheroError, Result};

/// Highest accepted print density.
pub const DENSITY_MAX: u8 = 2;

/// Physical media category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum LabelType {
    /// Labels separated by gaps.
    #[default]
    WithGaps = 1,
    /// Media with printed black marks.
    Black = 2,
    Continuous = 3,
}

impl LabelType {
    /// Paper type byte for `10 FF 84`.
    pub fn paper_byte(self) -> u8 {
        match self {
            Self::WithGaps => 0x00,
            Self::Black => 0x01,
            Self::Continuous => 0x02,
        }
    }

    /// Accepts the numeric value (1-3) or a name such as "gap" or "continuous".
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "gap" | "gaps" | "gapped" => Some(Self::WithGaps),
            "2" | "black" | "black-mark" | "blackmark" => Some(Self::Black),
            "3" | "continuous" => Some(Self::Continuous),
            _ => None,
        }
    }
}

impl TryFrom<u8> for LabelType {
    type Error = FicheroError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::WithGaps),
            2 => Ok(Self::Black),
            3 => Ok(Self::Continuous),
            other => Err(FicheroError::InvalidOption(format!(
                "label type must be 1-3, got {other}"
            ))),
        }
    }
}

/// Options for a single print job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintTaskOptions {
    /// Copies printed by `print_image`/`print_encoded`.
    pub total_pages: u32,
    /// 0 = light, 1 = medium, 2 = thick.
    pub density: u8,
    pub speed: u8,
    pub label_type: LabelType,
    pub status_poll_interval: Duration,
    pub status_timeout: Duration,
}

impl Default for PrintTaskOptions {
    fn default() -> Self {
        Self {
            total_pages: 1,
            density: DENSITY_MAX,
            speed: 0,
            label_type: LabelType::WithGaps,
            status_poll_interval: Duration::from_millis(300),
            status_timeout: Duration::from_secs(5),
        }
    }
}

impl PrintTaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total_pages(mut self, val: u32) -> Self {
        self.total_pages = val;
        self
    }

    /// Builder: set print density.
    ///
    /// # Panics
    /// Panics if value is greater than 2.
    pub fn with_density(mut self, val: u8) -> Self {
        assert!(
            val <= DENSITY_MAX,
            "Density must be between 0 and {DENSITY_MAX}, got {val}"
        );
        self.density = val;
        self
    }

    pub fn with_speed(mut self, val: u8) -> Self {
        self.speed = val;
        self
    }

    pub fn with_label_type(mut self, val: LabelType) -> Self {
        self.label_type = val;
        self
    }

    pub fn with_status_poll_interval(mut self, val: Duration) -> Self {
        self.status_poll_interval = val;
        self
    }

    pub fn with_status_timeout(mut self, val: Duration) -> Self {
        self.status_timeout = val;
        self
    }

    /// Check options assembled without the builder.
    pub fn validate(&self) -> Result<()> {
        if self.density > DENSITY_MAX {
            return Err(FicheroError::InvalidOption(format!(
                "density must be 0-{DENSITY_MAX}, got {}",
                self.density
            )));
        }
        if self.total_pages == 0 {
            return Err(FicheroError::InvalidOption(
                "total pages must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Session-level settings for [`crate::FicheroClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Wait for a response notification before giving up with an empty result.
    pub response_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Query model, firmware, serial, battery and status after connecting.
    pub fetch_info_on_connect: bool,
    pub heartbeat_on_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            fetch_info_on_connect: true,
            heartbeat_on_connect: true,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response_timeout(mut self, val: Duration) -> Self {
        self.response_timeout = val;
        self
    }

    pub fn with_heartbeat_interval(mut self, val: Duration) -> Self {
        self.heartbeat_interval = val;
        self
    }

    pub fn with_fetch_info_on_connect(mut self, val: bool) -> Self {
        self.fetch_info_on_connect = val;
        self
    }

    pub fn with_heartbeat_on_connect(mut self, val: bool) -> Self {
        self.heartbeat_on_connect = val;
        self
    }
}
