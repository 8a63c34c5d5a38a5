//! Command/response channel over the write and notify characteristics.
//!
//! The wire protocol carries no request ids, so a response is simply whatever
//! arrives on the notify characteristic after a command is written. All
//! traffic goes through one async mutex: at most one exchange is in flight,
//! and heartbeat polls cannot interleave with print-task commands.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};

use crate::events::{EventEmitter, Packet, PrinterEvent};
use crate::transport::{LinkEvent, Transport};
use crate::{FicheroError, Result};

/// Default wait for a response notification.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Extra wait after the first notification for trailing fragments.
const NOTIFY_SETTLE: Duration = Duration::from_millis(50);

/// Maximum bytes per bulk write.
pub const CHUNK_SIZE: usize = 200;

/// Pause after each bulk chunk. Open-loop pacing tuned to the firmware.
pub const CHUNK_DELAY: Duration = Duration::from_millis(20);

/// Single-flight command channel bound to the active session's transport.
pub struct CommandChannel {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    /// Receive buffer; every notification appends and bumps the version.
    inbox: watch::Sender<Vec<u8>>,
    in_flight: Mutex<()>,
    events: EventEmitter,
    response_timeout: Duration,
}

impl CommandChannel {
    pub fn new(events: EventEmitter, response_timeout: Duration) -> Self {
        let (inbox, _) = watch::channel(Vec::new());
        Self {
            transport: RwLock::new(None),
            inbox,
            in_flight: Mutex::new(()),
            events,
            response_timeout,
        }
    }

    /// Bind the channel to a freshly opened transport.
    pub fn attach(&self, transport: Arc<dyn Transport>) {
        if let Ok(mut slot) = self.transport.write() {
            *slot = Some(transport);
        }
    }

    /// Release the transport handle. Pending waits time out on their own.
    pub fn detach(&self) -> Option<Arc<dyn Transport>> {
        self.transport.write().ok().and_then(|mut slot| slot.take())
    }

    pub fn is_attached(&self) -> bool {
        self.transport
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or(FicheroError::NotConnected)
    }

    /// Append notification bytes to the receive buffer.
    pub fn push_notification(&self, bytes: &[u8]) {
        tracing::trace!(len = bytes.len(), "Notification received");
        self.inbox.send_modify(|buf| buf.extend_from_slice(bytes));
    }

    /// Feed link notifications into the receive buffer until the link reports
    /// a disconnect or its event channel closes.
    pub async fn pump(&self, mut link: mpsc::UnboundedReceiver<LinkEvent>) {
        while let Some(event) = link.recv().await {
            match event {
                LinkEvent::Notification(bytes) => self.push_notification(&bytes),
                LinkEvent::Disconnected => break,
            }
        }
        tracing::debug!("Link event stream ended");
    }

    /// Write a command and, when `wait` is set, collect the response.
    ///
    /// The receive buffer is cleared before the write so that stale bytes
    /// from an earlier exchange are never returned. If nothing arrives within
    /// `timeout` the result is empty; callers branch on its length.
    /// Non-waiting sends always return an empty buffer.
    pub async fn send(&self, data: &[u8], wait: bool, timeout: Duration) -> Result<Vec<u8>> {
        let _guard = self.in_flight.lock().await;
        let transport = self.transport()?;

        self.events.emit(PrinterEvent::PacketSent {
            packet: Packet::new(data),
        });

        let mut inbox = self.inbox.subscribe();
        if wait {
            self.inbox.send_if_modified(|buf| {
                buf.clear();
                false
            });
        }

        tracing::debug!(len = data.len(), wait, "Writing command");
        transport.write(data).await?;

        if !wait {
            return Ok(Vec::new());
        }

        match tokio::time::timeout(timeout, inbox.changed()).await {
            Ok(Ok(())) => tokio::time::sleep(NOTIFY_SETTLE).await,
            Ok(Err(_)) => tracing::debug!("Receive buffer closed while waiting"),
            Err(_) => tracing::debug!(
                timeout_ms = timeout.as_millis() as u64,
                "No response before timeout"
            ),
        }

        let response = self.inbox.borrow().clone();
        if !response.is_empty() {
            self.events.emit(PrinterEvent::PacketReceived {
                packet: Packet::new(response.clone()),
            });
        }
        Ok(response)
    }

    /// Write without waiting for a response.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.send(data, false, self.response_timeout).await.map(|_| ())
    }

    /// Write and wait for the response using the default timeout.
    pub async fn request(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.send(data, true, self.response_timeout).await
    }

    /// Write a large payload in paced chunks. Delivery is not acknowledged.
    pub async fn send_bulk(&self, data: &[u8]) -> Result<()> {
        let _guard = self.in_flight.lock().await;
        let transport = self.transport()?;

        let total = data.len().div_ceil(CHUNK_SIZE);
        tracing::debug!(
            chunk_count = total,
            chunk_size = CHUNK_SIZE,
            total_bytes = data.len(),
            "Writing data in chunks"
        );

        for (i, chunk) in split_chunks(data).enumerate() {
            if let Err(e) = transport.write(chunk).await {
                tracing::warn!(chunk = i + 1, total, error = %e, "Chunk write failed");
                return Err(e);
            }
            tokio::time::sleep(CHUNK_DELAY).await;
        }

        Ok(())
    }
}

/// Split a payload into consecutive chunks of at most [`CHUNK_SIZE`] bytes.
pub fn split_chunks(data: &[u8]) -> std::slice::Chunks<'_, u8> {
    data.chunks(CHUNK_SIZE)
}
