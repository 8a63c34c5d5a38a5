//! D11s / Fichero protocol (AiYin command set).
//!
//! Write characteristic: 2af1. Notify characteristic: 2af0. Service: 18f0.
//! Commands are unframed; responses carry no request id.

use std::sync::Arc;

use async_trait::async_trait;

use super::command::{Command, is_ok_response};
use super::{ModelMetadata, PrintDirection, PrinterModel, RfidInfo, SoundSetting};
use crate::channel::CommandChannel;
use crate::events::EventEmitter;
use crate::options::{DENSITY_MAX, LabelType, PrintTaskOptions};
use crate::print_task::{D11sPrintTask, PrintTask};
use crate::{FicheroError, PRINTHEAD_PX, Result};

/// BLE service UUID (one of four equivalent UART services on the device).
pub const SERVICE_UUID: uuid::Uuid =
    uuid::Uuid::from_u128(0x0000_18f0_0000_1000_8000_00805f9b34fb);

/// Write-without-response characteristic.
pub const WRITE_CHARACTERISTIC: uuid::Uuid =
    uuid::Uuid::from_u128(0x0000_2af1_0000_1000_8000_00805f9b34fb);

/// Notify characteristic carrying responses.
pub const NOTIFY_CHARACTERISTIC: uuid::Uuid =
    uuid::Uuid::from_u128(0x0000_2af0_0000_1000_8000_00805f9b34fb);

const DEFAULT_MODEL: &str = "D11s";

/// D11s series capability implementation.
#[derive(Debug, Clone, Default)]
pub struct D11s;

impl D11s {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PrinterModel for D11s {
    fn name(&self) -> &str {
        DEFAULT_MODEL
    }

    fn metadata(&self, model_id: Option<&str>) -> ModelMetadata {
        ModelMetadata {
            model: model_id.unwrap_or(DEFAULT_MODEL).to_string(),
            printhead_pixels: PRINTHEAD_PX,
            print_direction: PrintDirection::Left,
            density_min: 0,
            density_max: DENSITY_MAX,
            density_default: DENSITY_MAX,
            paper_types: vec![LabelType::WithGaps, LabelType::Black, LabelType::Continuous],
        }
    }

    fn new_print_task(
        &self,
        channel: Arc<CommandChannel>,
        events: EventEmitter,
        options: PrintTaskOptions,
    ) -> Box<dyn PrintTask> {
        Box::new(D11sPrintTask::new(channel, events, options))
    }

    async fn print_end(&self, _channel: &CommandChannel) -> Result<()> {
        // Stop is acknowledged per copy; there is no session-level command.
        Ok(())
    }

    async fn printer_reset(&self, channel: &CommandChannel) -> Result<bool> {
        tracing::info!("Factory reset requested");
        let r = channel.request(Command::factory_reset().as_bytes()).await?;
        Ok(is_ok_response(&r))
    }

    async fn rfid_info(&self, _channel: &CommandChannel) -> Result<RfidInfo> {
        Ok(RfidInfo::new())
    }

    async fn set_sound_enabled(
        &self,
        _channel: &CommandChannel,
        _sound: SoundSetting,
        _enabled: bool,
    ) -> Result<()> {
        Err(FicheroError::Unsupported("sound settings"))
    }

    async fn firmware_upgrade(
        &self,
        _channel: &CommandChannel,
        _data: &[u8],
        _version: &str,
    ) -> Result<()> {
        Err(FicheroError::Unsupported("firmware upgrade"))
    }
}
