//! Printer protocol definitions.
//!
//! Each supported printer family implements [`PrinterModel`], the capability
//! interface the client dispatches to. Only the D11s / Fichero family
//! (AiYin command set) is implemented; [`select_model`] picks it at connect time.

pub mod command;
pub mod d11s;
pub mod status;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

pub use command::Command;
pub use d11s::D11s;
pub use status::PrinterStatus;

use crate::Result;
use crate::channel::CommandChannel;
use crate::events::EventEmitter;
use crate::options::{LabelType, PrintTaskOptions};
use crate::print_task::PrintTask;

/// Feed direction of the print head relative to the authored image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintDirection {
    /// Image is rotated 90° clockwise before encoding.
    Left,
    Top,
}

/// Static facts about a printer model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub model: String,
    pub printhead_pixels: u32,
    pub print_direction: PrintDirection,
    pub density_min: u8,
    pub density_max: u8,
    pub density_default: u8,
    pub paper_types: Vec<LabelType>,
}

/// RFID consumable data, keyed by field name.
pub type RfidInfo = BTreeMap<String, String>;

/// Device sound channels that some printer families can toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SoundSetting {
    BluetoothConnectionSound = 1,
    PowerSound = 2,
}

/// Capability interface implemented once per printer family.
///
/// Operations a family does not support return
/// [`FicheroError::Unsupported`](crate::FicheroError::Unsupported) instead of
/// silently succeeding.
#[async_trait]
pub trait PrinterModel: Send + Sync {
    /// Human-readable family name (e.g. "D11s").
    fn name(&self) -> &str;

    /// Model facts; `model_id` is the id reported by the printer, if fetched.
    fn metadata(&self, model_id: Option<&str>) -> ModelMetadata;

    /// Create a task for one print job.
    fn new_print_task(
        &self,
        channel: Arc<CommandChannel>,
        events: EventEmitter,
        options: PrintTaskOptions,
    ) -> Box<dyn PrintTask>;

    /// Session-level cleanup after a job.
    async fn print_end(&self, channel: &CommandChannel) -> Result<()>;

    /// Restore factory settings. Returns whether the printer acknowledged.
    async fn printer_reset(&self, channel: &CommandChannel) -> Result<bool>;

    async fn rfid_info(&self, channel: &CommandChannel) -> Result<RfidInfo>;

    async fn set_sound_enabled(
        &self,
        channel: &CommandChannel,
        sound: SoundSetting,
        enabled: bool,
    ) -> Result<()>;

    async fn firmware_upgrade(
        &self,
        channel: &CommandChannel,
        data: &[u8],
        version: &str,
    ) -> Result<()>;
}

/// Pick the capability implementation for a connected device.
pub fn select_model(device_name: Option<&str>) -> Arc<dyn PrinterModel> {
    match device_name {
        Some(name) if crate::transport::is_supported_name(name) => {}
        other => tracing::warn!(
            device = other.unwrap_or(""),
            "Unrecognized device name, assuming D11s protocol"
        ),
    }
    Arc::new(D11s::new())
}
