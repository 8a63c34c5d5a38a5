//! In-memory printer link used by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::transport::{Connector, DeviceSelector, LinkEvent, OpenedLink, Transport};
use crate::{FicheroError, Result};

/// Maps a written command to the notifications the fake printer sends back.
pub(crate) type Responder = Arc<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

pub(crate) fn scripted<F>(f: F) -> Responder
where
    F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A D11s that answers every query, reporting `status` for `10 FF 40`.
pub(crate) fn d11s_responder(status: u8) -> Responder {
    scripted(move |cmd| match cmd {
        [0x10, 0xff, 0x20, 0xf0] => vec![b"D11s\r\n".to_vec()],
        [0x10, 0xff, 0x20, 0xf1] => vec![b" 2.4.6 ".to_vec()],
        [0x10, 0xff, 0x20, 0xf2] => vec![b"SN0042".to_vec()],
        [0x10, 0xff, 0x20, 0xef] => vec![b"1.0.1".to_vec()],
        [0x10, 0xff, 0x50, 0xf1] => vec![vec![0x01, 0x4b]],
        [0x10, 0xff, 0x40] => vec![vec![status]],
        [0x10, 0xff, 0x11] => vec![vec![0x02]],
        [0x10, 0xff, 0x13] => vec![vec![0x00, 0x1e]],
        [0x10, 0xff, 0x70] => vec![b"D11s_AB12|AA:BB:CC:DD:EE:01|AA:BB:CC:DD:EE:02|2.4.6|SN0042|80".to_vec()],
        [0x10, 0xff, 0x10, 0x00, _]
        | [0x10, 0xff, 0x84, _]
        | [0x10, 0xff, 0x12, _, _]
        | [0x10, 0xff, 0x04] => vec![b"OK".to_vec()],
        [0x10, 0xff, 0xfe, 0x45] => vec![vec![0xaa]],
        _ => Vec::new(),
    })
}

/// Records every write and replays scripted notifications.
pub(crate) struct MockTransport {
    writes: Mutex<Vec<Vec<u8>>>,
    link: mpsc::UnboundedSender<LinkEvent>,
    responder: Responder,
    disconnects: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new(responder: Responder) -> (Arc<Self>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (link, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            writes: Mutex::new(Vec::new()),
            link,
            responder,
            disconnects: AtomicUsize::new(0),
        });
        (transport, rx)
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub(crate) fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Drop the link from the device side.
    pub(crate) fn simulate_disconnect(&self) {
        let _ = self.link.send(LinkEvent::Disconnected);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&self, data: &[u8]) -> Result<()> {
        self.writes.lock().unwrap().push(data.to_vec());
        for reply in (self.responder)(data) {
            let _ = self.link.send(LinkEvent::Notification(reply));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens a fresh [`MockTransport`] per connect.
pub(crate) struct MockConnector {
    responder: Responder,
    device_name: Option<String>,
    fail: bool,
    drop_link: bool,
    last: Mutex<Option<Arc<MockTransport>>>,
}

impl MockConnector {
    pub(crate) fn new(responder: Responder) -> Self {
        Self {
            responder,
            device_name: Some("D11s_AB12".into()),
            fail: false,
            drop_link: false,
            last: Mutex::new(None),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(d11s_responder(0x00))
        }
    }

    /// Every link it opens has already been dropped by the device.
    pub(crate) fn dropping(responder: Responder) -> Self {
        Self {
            drop_link: true,
            ..Self::new(responder)
        }
    }

    pub(crate) fn last_transport(&self) -> Arc<MockTransport> {
        self.last.lock().unwrap().clone().expect("no link opened")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _selector: &DeviceSelector) -> Result<OpenedLink> {
        if self.fail {
            return Err(FicheroError::PrinterNotFound);
        }
        let (transport, events) = MockTransport::new(self.responder.clone());
        *self.last.lock().unwrap() = Some(transport.clone());
        if self.drop_link {
            transport.simulate_disconnect();
        }
        Ok(OpenedLink {
            device_name: self.device_name.clone(),
            transport,
            events,
        })
    }
}
