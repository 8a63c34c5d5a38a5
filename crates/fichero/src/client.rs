//! Session owner for one printer.
//!
//! `FicheroClient` opens a link through a [`Connector`], binds it to the
//! shared [`CommandChannel`], fetches printer info and runs the heartbeat.
//! Explicit disconnects and link-level drops go through one teardown path,
//! so dependent state is always reset and `disconnect` is emitted once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use image::DynamicImage;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::channel::CommandChannel;
use crate::events::{EventEmitter, PrinterEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::info::{self, AllInfo, PrinterInfo, decode_text};
use crate::options::{ClientConfig, LabelType, PrintTaskOptions};
use crate::print_task::PrintTask;
use crate::protocol::command::is_ok_response;
use crate::protocol::{
    Command, D11s, ModelMetadata, PrinterModel, PrinterStatus, RfidInfo, SoundSetting,
    select_model,
};
use crate::raster::{self, EncodedImage};
use crate::transport::{Connector, DeviceSelector, Transport};
use crate::{FicheroError, Result};

/// Auto-shutdown range accepted by the firmware, in minutes.
pub const SHUTDOWN_MINUTES_MAX: u16 = 480;

struct Session {
    id: u64,
    device_name: Option<String>,
    transport: Arc<dyn Transport>,
    pump: Option<JoinHandle<()>>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    events: EventEmitter,
    channel: Arc<CommandChannel>,
    session: Mutex<Option<Session>>,
    next_session: AtomicU64,
    info: RwLock<Option<PrinterInfo>>,
    model: RwLock<Arc<dyn PrinterModel>>,
    heartbeat: HeartbeatMonitor,
    /// Serializes connect/disconnect against each other.
    lifecycle: tokio::sync::Mutex<()>,
}

/// Printer client. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct FicheroClient {
    inner: Arc<Inner>,
}

impl FicheroClient {
    pub fn new(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        let events = EventEmitter::new();
        let channel = Arc::new(CommandChannel::new(events.clone(), config.response_timeout));
        let heartbeat = HeartbeatMonitor::new(config.heartbeat_interval);
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                events,
                channel,
                session: Mutex::new(None),
                next_session: AtomicU64::new(1),
                info: RwLock::new(None),
                model: RwLock::new(Arc::new(D11s::new())),
                heartbeat,
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    pub fn channel(&self) -> Arc<CommandChannel> {
        self.inner.channel.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .session
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn device_name(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(|s| s.device_name.clone()))
    }

    /// Open a session with the selected printer.
    ///
    /// Any existing session is torn down first. Selection and GATT failures
    /// are returned to the caller; nothing is retried.
    pub async fn connect(&self, selector: &DeviceSelector) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.teardown(None).await;

        tracing::info!(?selector, "Connecting to printer");
        let link = self.inner.connector.open(selector).await?;
        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);

        self.inner.channel.attach(link.transport.clone());

        let model = select_model(link.device_name.as_deref());
        if let Ok(mut slot) = self.inner.model.write() {
            *slot = model;
        }
        let device_name = link.device_name;
        if let Ok(mut slot) = self.inner.session.lock() {
            *slot = Some(Session {
                id,
                device_name: device_name.clone(),
                transport: link.transport,
                pump: None,
            });
        }

        tracing::info!(
            device = device_name.as_deref().unwrap_or(""),
            session = id,
            "Connected"
        );
        self.inner.events.emit(PrinterEvent::Connect {
            device_name: device_name.clone(),
        });

        // The session is in the slot before the pump runs. A link that is
        // already gone is torn down once this connect releases the lifecycle lock.
        let channel = self.inner.channel.clone();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let link_events = link.events;
        let pump = tokio::spawn(async move {
            channel.pump(link_events).await;
            if let Some(inner) = weak.upgrade() {
                tracing::info!(session = id, "Link closed by device");
                let _lifecycle = inner.lifecycle.lock().await;
                inner.teardown(Some(id)).await;
            }
        });
        if let Ok(mut slot) = self.inner.session.lock() {
            if let Some(session) = slot.as_mut().filter(|s| s.id == id) {
                session.pump = Some(pump);
            }
        }

        if self.inner.config.fetch_info_on_connect {
            if let Err(e) = self.fetch_printer_info().await {
                tracing::warn!(error = %e, "Initial info fetch failed");
            }
        }
        if self.inner.config.heartbeat_on_connect {
            self.start_heartbeat();
        }
        Ok(())
    }

    /// End the session. Safe to call when not connected.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.teardown(None).await;
    }

    /// Send raw bytes through the serialized channel.
    pub async fn send_command(&self, data: &[u8], wait: bool) -> Result<Vec<u8>> {
        let channel = &self.inner.channel;
        channel.send(data, wait, channel.response_timeout()).await
    }

    /// Query identity and health, cache the snapshot and emit it.
    pub async fn fetch_printer_info(&self) -> Result<PrinterInfo> {
        let info = info::fetch(&self.inner.channel).await?;
        if let Ok(mut slot) = self.inner.info.write() {
            *slot = Some(info.clone());
        }
        self.inner
            .events
            .emit(PrinterEvent::PrinterInfoFetched { info: info.clone() });
        Ok(info)
    }

    /// Last fetched snapshot; `None` before the first fetch or after disconnect.
    pub fn printer_info(&self) -> Option<PrinterInfo> {
        self.inner.info.read().ok().and_then(|slot| slot.clone())
    }

    pub fn start_heartbeat(&self) {
        self.inner
            .heartbeat
            .start(self.inner.channel.clone(), self.inner.events.clone());
    }

    pub fn stop_heartbeat(&self) {
        self.inner.heartbeat.stop();
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.inner.heartbeat.is_running()
    }

    fn model(&self) -> Arc<dyn PrinterModel> {
        match self.inner.model.read() {
            Ok(slot) => slot.clone(),
            Err(_) => Arc::new(D11s::new()),
        }
    }

    pub fn model_metadata(&self) -> ModelMetadata {
        let model_id = self.printer_info().and_then(|i| i.model_id);
        self.model().metadata(model_id.as_deref())
    }

    pub fn new_print_task(&self, options: PrintTaskOptions) -> Box<dyn PrintTask> {
        self.model().new_print_task(
            self.inner.channel.clone(),
            self.inner.events.clone(),
            options,
        )
    }

    /// Encode `image` for the model and print `options.total_pages` copies of it.
    pub async fn print_image(&self, image: &DynamicImage, options: PrintTaskOptions) -> Result<()> {
        let meta = self.model_metadata();
        let encoded = raster::encode(image, meta.print_direction);
        self.print_encoded(&encoded, options).await
    }

    /// Print an already encoded raster. Use this for bitmaps that are laid
    /// out along the print head already, such as [`crate::imaging::prepare_image`] output.
    pub async fn print_encoded(
        &self,
        encoded: &EncodedImage,
        options: PrintTaskOptions,
    ) -> Result<()> {
        let copies = options.total_pages;
        tracing::info!(rows = encoded.rows(), copies, "Starting print job");

        let mut task = self.new_print_task(options);
        task.print_init().await?;
        task.print_page(encoded, copies).await?;
        task.wait_for_finished().await?;
        task.print_end().await?;
        self.model().print_end(&self.inner.channel).await
    }

    pub async fn status(&self) -> Result<Option<PrinterStatus>> {
        let r = self.inner.channel.request(Command::get_status().as_bytes()).await?;
        Ok(PrinterStatus::from_response(&r))
    }

    pub async fn boot_version(&self) -> Result<Option<String>> {
        let r = self
            .inner
            .channel
            .request(Command::get_boot_version().as_bytes())
            .await?;
        Ok(decode_text(&r))
    }

    pub async fn density(&self) -> Result<Option<u8>> {
        let r = self.inner.channel.request(Command::get_density().as_bytes()).await?;
        Ok(r.last().copied())
    }

    /// Auto-shutdown timeout in minutes.
    pub async fn shutdown_time(&self) -> Result<Option<u16>> {
        let r = self
            .inner
            .channel
            .request(Command::get_shutdown_time().as_bytes())
            .await?;
        Ok(match r.as_slice() {
            [.., hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        })
    }

    pub async fn set_shutdown_time(&self, minutes: u16) -> Result<bool> {
        if !(1..=SHUTDOWN_MINUTES_MAX).contains(&minutes) {
            return Err(FicheroError::InvalidOption(format!(
                "shutdown time must be 1-{SHUTDOWN_MINUTES_MAX} minutes, got {minutes}"
            )));
        }
        let r = self
            .inner
            .channel
            .request(Command::set_shutdown_time(minutes).as_bytes())
            .await?;
        Ok(is_ok_response(&r))
    }

    pub async fn all_info(&self) -> Result<Option<AllInfo>> {
        let r = self.inner.channel.request(Command::get_all_info().as_bytes()).await?;
        Ok(AllInfo::parse(&r))
    }

    pub async fn set_density(&self, density: u8) -> Result<bool> {
        let meta = self.model_metadata();
        if !(meta.density_min..=meta.density_max).contains(&density) {
            return Err(FicheroError::InvalidOption(format!(
                "density must be {}-{}, got {density}",
                meta.density_min, meta.density_max
            )));
        }
        let r = self
            .inner
            .channel
            .request(Command::set_density(density).as_bytes())
            .await?;
        Ok(is_ok_response(&r))
    }

    pub async fn set_paper_type(&self, label_type: LabelType) -> Result<bool> {
        let r = self
            .inner
            .channel
            .request(Command::set_paper_type(label_type.paper_byte()).as_bytes())
            .await?;
        Ok(is_ok_response(&r))
    }

    /// Advance the paper by `dots` rows (8 dots per mm).
    pub async fn feed_dots(&self, dots: u8) -> Result<()> {
        self.inner.channel.write(Command::feed_dots(dots).as_bytes()).await
    }

    pub async fn printer_reset(&self) -> Result<bool> {
        self.model().printer_reset(&self.inner.channel).await
    }

    pub async fn rfid_info(&self) -> Result<RfidInfo> {
        self.model().rfid_info(&self.inner.channel).await
    }

    pub async fn set_sound_enabled(&self, sound: SoundSetting, enabled: bool) -> Result<()> {
        self.model()
            .set_sound_enabled(&self.inner.channel, sound, enabled)
            .await
    }

    pub async fn firmware_upgrade(&self, data: &[u8], version: &str) -> Result<()> {
        self.model()
            .firmware_upgrade(&self.inner.channel, data, version)
            .await
    }
}

impl Inner {
    /// Reset all session state and emit `disconnect` once.
    ///
    /// `only` restricts teardown to a specific session so a late link-closed
    /// notification cannot end a newer session.
    async fn teardown(&self, only: Option<u64>) {
        let session = match self.session.lock() {
            Ok(mut slot) => {
                let stale = matches!((slot.as_ref(), only), (Some(s), Some(id)) if s.id != id);
                if stale {
                    None
                } else {
                    slot.take()
                }
            }
            Err(_) => None,
        };
        let Some(session) = session else {
            return;
        };

        self.heartbeat.stop();
        if let Ok(mut slot) = self.info.write() {
            *slot = None;
        }
        self.channel.detach();
        if only.is_none() {
            if let Some(pump) = session.pump {
                pump.abort();
            }
        }
        if let Err(e) = session.transport.disconnect().await {
            tracing::warn!(error = %e, "Transport disconnect failed");
        }

        tracing::info!(session = session.id, "Disconnected");
        self.events.emit(PrinterEvent::Disconnect);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{MockConnector, d11s_responder};

    fn client(connector: Arc<MockConnector>) -> FicheroClient {
        FicheroClient::new(connector, ClientConfig::default())
    }

    fn drain(rx: &mut broadcast::Receiver<PrinterEvent>) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        names
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_fetches_info() {
        let connector = Arc::new(MockConnector::new(d11s_responder(0x00)));
        let client = client(connector);
        let mut rx = client.subscribe();

        client.connect(&DeviceSelector::FirstAvailable).await.unwrap();
        assert!(client.is_connected());
        assert_eq!(client.device_name().as_deref(), Some("D11s_AB12"));

        let info = client.printer_info().unwrap();
        assert_eq!(info.model_id.as_deref(), Some("D11s"));
        assert_eq!(info.firmware.as_deref(), Some("2.4.6"));
        assert_eq!(info.serial.as_deref(), Some("SN0042"));
        assert_eq!(info.battery, Some(75));
        assert_eq!(info.charging, Some(true));
        assert_eq!(info.status.as_deref(), Some("ready"));
        assert!(client.is_heartbeat_running());

        let names = drain(&mut rx);
        assert_eq!(names.first(), Some(&"connect"));
        assert!(names.contains(&"printerinfofetched"));

        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_event_carries_device_name() {
        let connector = Arc::new(MockConnector::new(d11s_responder(0x00)));
        let client = FicheroClient::new(
            connector,
            ClientConfig::new()
                .with_fetch_info_on_connect(false)
                .with_heartbeat_on_connect(false),
        );
        let mut rx = client.subscribe();

        client.connect(&DeviceSelector::FirstAvailable).await.unwrap();

        match rx.try_recv().unwrap() {
            PrinterEvent::Connect { device_name } => {
                assert_eq!(device_name.as_deref(), Some("D11s_AB12"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        client.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_link_lost_during_connect_is_torn_down() {
        let connector = Arc::new(MockConnector::dropping(d11s_responder(0x00)));
        let client = FicheroClient::new(
            connector.clone(),
            ClientConfig::new().with_fetch_info_on_connect(false),
        );
        let mut rx = client.subscribe();

        for _ in 0..200 {
            client.connect(&DeviceSelector::FirstAvailable).await.unwrap();

            let mut names = Vec::new();
            while names.last() != Some(&"disconnect") {
                let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                    .await
                    .expect("no disconnect after the link closed")
                    .unwrap();
                names.push(event.name());
            }

            assert_eq!(names, vec!["connect", "disconnect"]);
            assert!(!client.is_connected());
            assert!(!client.is_heartbeat_running());
            assert_eq!(connector.last_transport().disconnect_calls(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_is_connection_error() {
        let client = client(Arc::new(MockConnector::failing()));
        let mut rx = client.subscribe();

        let err = client.connect(&DeviceSelector::FirstAvailable).await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(!client.is_connected());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let connector = Arc::new(MockConnector::new(d11s_responder(0x00)));
        let client = client(connector.clone());

        client.disconnect().await;

        client.connect(&DeviceSelector::FirstAvailable).await.unwrap();
        let mut rx = client.subscribe();
        client.disconnect().await;
        client.disconnect().await;

        let names = drain(&mut rx);
        assert_eq!(names.iter().filter(|n| **n == "disconnect").count(), 1);
        assert_eq!(connector.last_transport().disconnect_calls(), 1);
        assert!(client.printer_info().is_none());
        assert!(!client.is_heartbeat_running());
        assert!(matches!(
            client.status().await,
            Err(FicheroError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_disconnect_resets_state() {
        let connector = Arc::new(MockConnector::new(d11s_responder(0x00)));
        let client = client(connector.clone());
        client.connect(&DeviceSelector::FirstAvailable).await.unwrap();
        let mut rx = client.subscribe();

        connector.last_transport().simulate_disconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!client.is_connected());
        assert!(client.printer_info().is_none());
        assert!(!client.is_heartbeat_running());
        assert_eq!(drain(&mut rx), vec!["disconnect"]);

        client.disconnect().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replaces_session() {
        let connector = Arc::new(MockConnector::new(d11s_responder(0x00)));
        let client = client(connector.clone());

        client.connect(&DeviceSelector::FirstAvailable).await.unwrap();
        let first = connector.last_transport();
        let mut rx = client.subscribe();

        client.connect(&DeviceSelector::FirstAvailable).await.unwrap();
        assert_eq!(first.disconnect_calls(), 1);

        // A late close from the old link must not end the new session.
        first.simulate_disconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(client.is_connected());

        let names = drain(&mut rx);
        assert_eq!(names.iter().filter(|n| **n == "disconnect").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "connect").count(), 1);
        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_operations() {
        let connector = Arc::new(MockConnector::new(d11s_responder(0x00)));
        let client = FicheroClient::new(
            connector.clone(),
            ClientConfig::new()
                .with_fetch_info_on_connect(false)
                .with_heartbeat_on_connect(false),
        );
        client.connect(&DeviceSelector::FirstAvailable).await.unwrap();
        assert!(client.printer_info().is_none());

        assert!(client.set_density(1).await.unwrap());
        assert!(matches!(
            client.set_density(3).await,
            Err(FicheroError::InvalidOption(_))
        ));
        assert!(client.set_paper_type(LabelType::Continuous).await.unwrap());
        assert_eq!(client.shutdown_time().await.unwrap(), Some(30));
        assert!(client.set_shutdown_time(60).await.unwrap());
        assert!(client.set_shutdown_time(0).await.is_err());
        assert!(client.set_shutdown_time(481).await.is_err());
        assert_eq!(client.boot_version().await.unwrap().as_deref(), Some("1.0.1"));
        assert_eq!(client.density().await.unwrap(), Some(2));
        assert!(client.status().await.unwrap().unwrap().ready_to_print());
        assert_eq!(client.all_info().await.unwrap().unwrap().battery, "80");
        client.feed_dots(16).await.unwrap();
        assert!(client.printer_reset().await.unwrap());
        assert!(client.rfid_info().await.unwrap().is_empty());
        assert!(matches!(
            client
                .set_sound_enabled(SoundSetting::BluetoothConnectionSound, true)
                .await,
            Err(FicheroError::Unsupported(_))
        ));

        let writes = connector.last_transport().writes();
        assert!(writes.contains(&vec![0x10, 0xff, 0x10, 0x00, 0x01]));
        assert!(writes.contains(&vec![0x10, 0xff, 0x84, 0x02]));
        assert!(writes.contains(&vec![0x10, 0xff, 0x12, 0x00, 0x3c]));
        assert!(writes.contains(&vec![0x1b, 0x4a, 0x10]));
        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_print_image_end_to_end() {
        let connector = Arc::new(MockConnector::new(d11s_responder(0x00)));
        let client = FicheroClient::new(
            connector.clone(),
            ClientConfig::new().with_heartbeat_on_connect(false),
        );
        client.connect(&DeviceSelector::FirstAvailable).await.unwrap();
        let mut rx = client.subscribe();

        // 10 wide x 96 tall, rotated into 10 rows.
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            10,
            96,
            image::Rgb([0, 0, 0]),
        ));
        client
            .print_image(&img, PrintTaskOptions::default())
            .await
            .unwrap();

        let writes = connector.last_transport().writes();
        let frame = writes
            .iter()
            .find(|w| w.starts_with(&[0x1d, 0x76, 0x30]))
            .unwrap();
        assert_eq!(frame.len(), 8 + 10 * 12);
        assert_eq!(&frame[6..8], &[10, 0]);
        assert!(frame[8..].iter().all(|b| *b == 0xff));

        let progress = drain(&mut rx)
            .into_iter()
            .filter(|n| *n == "printprogress")
            .count();
        assert_eq!(progress, 2);
        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_pages_sets_copy_count() {
        let connector = Arc::new(MockConnector::new(d11s_responder(0x00)));
        let client = FicheroClient::new(
            connector.clone(),
            ClientConfig::new().with_heartbeat_on_connect(false),
        );
        client.connect(&DeviceSelector::FirstAvailable).await.unwrap();
        let mut rx = client.subscribe();

        let encoded = EncodedImage::from_packed(4, vec![0xff; 4 * 12]).unwrap();
        client
            .print_encoded(&encoded, PrintTaskOptions::new().with_total_pages(3))
            .await
            .unwrap();

        let writes = connector.last_transport().writes();
        let frames = writes
            .iter()
            .filter(|w| w.starts_with(&[0x1d, 0x76, 0x30]))
            .count();
        assert_eq!(frames, 3);
        let progress = drain(&mut rx)
            .into_iter()
            .filter(|n| *n == "printprogress")
            .count();
        assert_eq!(progress, 6);

        assert!(matches!(
            client
                .print_encoded(&encoded, PrintTaskOptions::new().with_total_pages(0))
                .await,
            Err(FicheroError::InvalidOption(_))
        ));
        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_print_blocked_by_status() {
        let connector = Arc::new(MockConnector::new(d11s_responder(0x02)));
        let client = FicheroClient::new(
            connector.clone(),
            ClientConfig::new().with_heartbeat_on_connect(false),
        );
        client.connect(&DeviceSelector::FirstAvailable).await.unwrap();
        let before = connector.last_transport().writes().len();

        let img = DynamicImage::new_luma8(96, 10);
        let err = client
            .print_image(&img, PrintTaskOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FicheroError::NotReady(s) if s.cover_open()));
        assert_eq!(connector.last_transport().writes().len(), before + 1);
        client.disconnect().await;
    }
}
