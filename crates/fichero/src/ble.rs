//! BLE backend using btleplug.
//!
//! Provides scanning, connecting and the write/notify link for Fichero
//! peripherals. Notifications and adapter disconnect events are forwarded
//! into the link channel consumed by [`CommandChannel::pump`].
//!
//! [`CommandChannel::pump`]: crate::channel::CommandChannel::pump

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::d11s::{NOTIFY_CHARACTERISTIC, SERVICE_UUID, WRITE_CHARACTERISTIC};
use crate::transport::{
    Connector, DeviceSelector, LinkEvent, OpenedLink, Transport, is_supported_name,
};
use crate::{FicheroError, Result};

/// Default BLE scan window.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(8);

const ADAPTER_ATTEMPTS: usize = 6;
const ADAPTER_RETRY_DELAY: Duration = Duration::from_millis(500);

/// btleplug's CoreBluetooth backend reports the manager state in this message.
const INVALID_MANAGER_STATE: &str = "central manager has invalid state";

/// Discovered BLE device information.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Device display name (may be empty if not advertised).
    pub name: String,
    /// Platform-specific device identifier (address on Linux, UUID on macOS).
    pub id: String,
    /// The underlying btleplug peripheral handle.
    pub peripheral: Peripheral,
}

/// Opens links to printers on the first available BLE adapter.
pub struct BleConnector {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BleConnector {
    /// Initialize the platform BLE adapter (first available).
    ///
    /// Retries while CoreBluetooth is still powering up.
    pub async fn new() -> Result<Self> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match first_adapter().await {
                Ok(adapter) => {
                    return Ok(Self {
                        adapter,
                        scan_timeout: SCAN_TIMEOUT,
                    });
                }
                Err(e) => e,
            };
            match AdapterState::of(&err) {
                AdapterState::PoweringUp if attempt < ADAPTER_ATTEMPTS => {
                    tracing::debug!(attempt, error = %err, "BLE adapter not ready, retrying");
                    tokio::time::sleep(ADAPTER_RETRY_DELAY).await;
                }
                AdapterState::PoweringUp | AdapterState::Unavailable => {
                    return Err(with_permission_hint(err));
                }
                AdapterState::Other => return Err(err),
            }
        }
    }

    pub fn with_scan_timeout(mut self, val: Duration) -> Self {
        self.scan_timeout = val;
        self
    }

    /// List every supported printer seen within the scan window.
    pub async fn scan(&self) -> Result<Vec<DiscoveredDevice>> {
        self.scan_until(|_| false).await
    }

    /// Scan until a device matching `selector` shows up or the window closes.
    async fn find(&self, selector: &DeviceSelector) -> Result<DiscoveredDevice> {
        let found = self
            .scan_until(|d| selector.matches(&d.id, &d.name))
            .await?;
        found
            .into_iter()
            .find(|d| selector.matches(&d.id, &d.name))
            .ok_or(FicheroError::PrinterNotFound)
    }

    /// Collect printers until `done` accepts one or the scan window closes.
    ///
    /// Devices are kept when their name has a supported prefix, or when they
    /// are accepted by `done` (explicit address selection of an unnamed device).
    async fn scan_until<F>(&self, done: F) -> Result<Vec<DiscoveredDevice>>
    where
        F: Fn(&DiscoveredDevice) -> bool,
    {
        tracing::info!(timeout_s = self.scan_timeout.as_secs(), "Starting BLE scan");

        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| FicheroError::BleScan(e.to_string()))?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| FicheroError::BleScan(e.to_string()))?;

        let mut found = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut finished = false;

        // Peripherals cached from earlier scans may not be re-announced.
        let known = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| FicheroError::BleScan(e.to_string()))?;
        for peripheral in known {
            if let Some(device) = describe(peripheral).await {
                if Self::keep(&device, &done, &mut seen_ids, &mut found) {
                    finished = true;
                    break;
                }
            }
        }

        let deadline = tokio::time::sleep(self.scan_timeout);
        tokio::pin!(deadline);

        while !finished {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => {
                    let id = match event {
                        Some(CentralEvent::DeviceDiscovered(id))
                        | Some(CentralEvent::DeviceUpdated(id)) => id,
                        Some(_) => continue,
                        None => break,
                    };
                    let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                        continue;
                    };
                    if let Some(device) = describe(peripheral).await {
                        finished = Self::keep(&device, &done, &mut seen_ids, &mut found);
                    }
                }
            }
        }

        self.adapter
            .stop_scan()
            .await
            .map_err(|e| FicheroError::BleScan(e.to_string()))?;

        tracing::info!(count = found.len(), "BLE scan complete");
        Ok(found)
    }

    fn keep<F>(
        device: &DiscoveredDevice,
        done: &F,
        seen_ids: &mut HashSet<String>,
        found: &mut Vec<DiscoveredDevice>,
    ) -> bool
    where
        F: Fn(&DiscoveredDevice) -> bool,
    {
        if seen_ids.contains(&device.id) {
            return false;
        }
        let accepted = done(device);
        if accepted || is_supported_name(&device.name) {
            tracing::info!(name = %device.name, id = %device.id, "Found printer");
            seen_ids.insert(device.id.clone());
            found.push(device.clone());
        }
        accepted
    }
}

async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|e| FicheroError::BleConnection(e.to_string()))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| FicheroError::BleConnection(e.to_string()))?;

    adapters
        .into_iter()
        .next()
        .ok_or_else(|| FicheroError::BleConnection("No BLE adapter found".into()))
}

/// What an adapter init failure says about the Bluetooth stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdapterState {
    /// CoreBluetooth answers "unknown" (state 0) right after the manager is
    /// created. It usually settles within a second.
    PoweringUp,
    /// Powered off, unauthorized or unsupported.
    Unavailable,
    Other,
}

impl AdapterState {
    fn of(err: &FicheroError) -> Self {
        if !cfg!(target_os = "macos") {
            return Self::Other;
        }
        Self::classify(err)
    }

    fn classify(err: &FicheroError) -> Self {
        let FicheroError::BleConnection(msg) = err else {
            return Self::Other;
        };
        let msg = msg.to_ascii_lowercase();
        if !msg.contains(INVALID_MANAGER_STATE) {
            Self::Other
        } else if msg.contains("have=0") {
            Self::PoweringUp
        } else {
            Self::Unavailable
        }
    }
}

fn with_permission_hint(err: FicheroError) -> FicheroError {
    match err {
        FicheroError::BleConnection(msg) => FicheroError::BleConnection(format!(
            "{msg} (turn Bluetooth on and allow this program under System Settings > Privacy & Security > Bluetooth)"
        )),
        other => other,
    }
}

async fn describe(peripheral: Peripheral) -> Option<DiscoveredDevice> {
    let props = peripheral.properties().await.ok().flatten()?;
    Some(DiscoveredDevice {
        name: props.local_name.unwrap_or_default(),
        id: peripheral.id().to_string(),
        peripheral,
    })
}

/// Prefer the characteristic under the documented service; the device exposes
/// the same characteristic on several equivalent services.
fn find_characteristic(chars: &[Characteristic], uuid: uuid::Uuid) -> Option<Characteristic> {
    chars
        .iter()
        .find(|c| c.uuid == uuid && c.service_uuid == SERVICE_UUID)
        .or_else(|| chars.iter().find(|c| c.uuid == uuid))
        .cloned()
}

#[async_trait]
impl Connector for BleConnector {
    async fn open(&self, selector: &DeviceSelector) -> Result<OpenedLink> {
        let device = self.find(selector).await?;
        let peripheral = device.peripheral;
        tracing::info!(id = %device.id, name = %device.name, "Connecting to device");

        peripheral
            .connect()
            .await
            .map_err(|e| FicheroError::BleConnection(e.to_string()))?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| FicheroError::BleConnection(e.to_string()))?;

        let chars: Vec<Characteristic> = peripheral.characteristics().into_iter().collect();
        let write_char = find_characteristic(&chars, WRITE_CHARACTERISTIC)
            .ok_or(FicheroError::MissingCharacteristic("write"))?;
        let notify_char = find_characteristic(&chars, NOTIFY_CHARACTERISTIC)
            .ok_or(FicheroError::MissingCharacteristic("notify"))?;

        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| FicheroError::BleConnection(e.to_string()))?;
        let adapter_events = self
            .adapter
            .events()
            .await
            .map_err(|e| FicheroError::BleConnection(e.to_string()))?;

        peripheral
            .subscribe(&notify_char)
            .await
            .map_err(|e| FicheroError::BleConnection(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();

        let notify_tx = tx.clone();
        let notify_task = tokio::spawn(async move {
            let mut notifications = notifications;
            while let Some(n) = notifications.next().await {
                if n.uuid != NOTIFY_CHARACTERISTIC {
                    continue;
                }
                if notify_tx.send(LinkEvent::Notification(n.value)).is_err() {
                    return;
                }
            }
            let _ = notify_tx.send(LinkEvent::Disconnected);
        });

        let peripheral_id = peripheral.id();
        let disconnect_task = tokio::spawn(async move {
            let mut adapter_events = adapter_events;
            while let Some(event) = adapter_events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        tracing::info!(id = %id, "Device disconnected");
                        let _ = tx.send(LinkEvent::Disconnected);
                        return;
                    }
                }
            }
        });

        tracing::info!(
            write = %write_char.uuid,
            notify = %notify_char.uuid,
            "Connected and subscribed"
        );

        let name = (!device.name.is_empty()).then_some(device.name);
        Ok(OpenedLink {
            device_name: name,
            transport: Arc::new(BleTransport {
                peripheral,
                write_char,
                tasks: Mutex::new(vec![notify_task, disconnect_task]),
            }),
            events: rx,
        })
    }
}

/// Write side of a connected peripheral.
pub struct BleTransport {
    peripheral: Peripheral,
    write_char: Characteristic,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BleTransport {
    fn stop_forwarding(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn write(&self, data: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.write_char, data, WriteType::WithoutResponse)
            .await
            .map_err(|e| FicheroError::BleWrite(e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_forwarding();
        let connected = self.peripheral.is_connected().await.unwrap_or(false);
        if connected {
            tracing::info!("Disconnecting BLE device");
            self.peripheral
                .disconnect()
                .await
                .map_err(|e| FicheroError::BleConnection(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.stop_forwarding();
    }
}
