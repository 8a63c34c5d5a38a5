//! Printer identity and health snapshot fetched after connecting.

use serde::Serialize;

use crate::channel::CommandChannel;
use crate::events::HeartbeatData;
use crate::protocol::{Command, PrinterStatus};
use crate::Result;

/// Snapshot of model, firmware, serial, battery and status.
///
/// Fields stay `None` when the printer did not answer the matching query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterInfo {
    pub model_id: Option<String>,
    pub firmware: Option<String>,
    pub serial: Option<String>,
    pub battery: Option<u8>,
    pub charging: Option<bool>,
    pub status: Option<String>,
}

impl PrinterInfo {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Fields of the pipe-delimited `10 FF 70` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllInfo {
    pub bt_name: String,
    pub mac_classic: String,
    pub mac_ble: String,
    pub firmware: String,
    pub serial: String,
    pub battery: String,
}

impl AllInfo {
    pub fn parse(response: &[u8]) -> Option<Self> {
        let text = decode_text(response)?;
        let parts: Vec<&str> = text.split('|').collect();
        match parts.as_slice() {
            [bt_name, mac_classic, mac_ble, firmware, serial, battery, ..] => Some(Self {
                bt_name: bt_name.to_string(),
                mac_classic: mac_classic.to_string(),
                mac_ble: mac_ble.to_string(),
                firmware: firmware.to_string(),
                serial: serial.to_string(),
                battery: battery.to_string(),
            }),
            _ => None,
        }
    }
}

/// Trimmed text payload, `None` for an empty response.
pub fn decode_text(response: &[u8]) -> Option<String> {
    if response.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(response).trim().to_string())
}

/// Query model, firmware, serial, battery and status one after another.
///
/// Queries share the single-flight response buffer and are never issued in
/// parallel. An unanswered query leaves its field empty.
pub async fn fetch(channel: &CommandChannel) -> Result<PrinterInfo> {
    let mut info = PrinterInfo::default();

    let r = channel.request(Command::get_model().as_bytes()).await?;
    info.model_id = decode_text(&r);

    let r = channel.request(Command::get_firmware().as_bytes()).await?;
    info.firmware = decode_text(&r);

    let r = channel.request(Command::get_serial().as_bytes()).await?;
    info.serial = decode_text(&r);

    let r = channel.request(Command::get_battery().as_bytes()).await?;
    if let Some(battery) = HeartbeatData::from_battery_response(&r) {
        info.battery = Some(battery.charge_level);
        info.charging = Some(battery.charging);
    }

    let r = channel.request(Command::get_status().as_bytes()).await?;
    info.status = PrinterStatus::from_response(&r).map(|s| s.description());

    tracing::info!(
        model = info.model_id.as_deref().unwrap_or("?"),
        firmware = info.firmware.as_deref().unwrap_or("?"),
        battery = ?info.battery,
        status = info.status.as_deref().unwrap_or("?"),
        "Printer info fetched"
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::channel::DEFAULT_RESPONSE_TIMEOUT;
    use crate::events::EventEmitter;
    use crate::testing::{MockTransport, d11s_responder, scripted};

    fn channel_for(responder: crate::testing::Responder) -> Arc<CommandChannel> {
        let channel = Arc::new(CommandChannel::new(
            EventEmitter::new(),
            DEFAULT_RESPONSE_TIMEOUT,
        ));
        let (transport, link) = MockTransport::new(responder);
        channel.attach(transport);
        let pump = channel.clone();
        tokio::spawn(async move { pump.pump(link).await });
        channel
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_decodes_all_fields() {
        let channel = channel_for(d11s_responder(0x20));
        let info = fetch(&channel).await.unwrap();

        assert_eq!(info.model_id.as_deref(), Some("D11s"));
        assert_eq!(info.firmware.as_deref(), Some("2.4.6"));
        assert_eq!(info.serial.as_deref(), Some("SN0042"));
        assert_eq!(info.battery, Some(75));
        assert_eq!(info.charging, Some(true));
        assert_eq!(info.status.as_deref(), Some("charging"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_tolerates_silent_printer() {
        let channel = channel_for(scripted(|_| Vec::new()));
        let info = fetch(&channel).await.unwrap();
        assert!(info.is_empty());
    }

    #[test]
    fn test_all_info_parse() {
        let parsed = AllInfo::parse(b"D11s_AB12|AA:01|AA:02|2.4.6|SN0042|80\r\n").unwrap();
        assert_eq!(parsed.bt_name, "D11s_AB12");
        assert_eq!(parsed.firmware, "2.4.6");
        assert_eq!(parsed.battery, "80");
        assert!(AllInfo::parse(b"garbage").is_none());
        assert!(AllInfo::parse(b"").is_none());
    }

    #[test]
    fn test_info_serializes_camel_case() {
        let info = PrinterInfo {
            model_id: Some("D11s".into()),
            ..PrinterInfo::default()
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["modelId"], "D11s");
    }
}
