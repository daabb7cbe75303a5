//! In-memory USB backend for tests.
//!
//! A [`MockDevice`] is paired with a [`MockController`] that scripts inbound
//! chunks, injects transfer failures and records outbound chunks. Inbound
//! reads wait until the controller queues something, like a real device that
//! has nothing to say.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::traits::{
    BulkInterface, DeviceHandle, DeviceIdentity, DeviceProvider, Direction, EndpointInfo,
    InterfaceInfo, UsbDevice,
};

type Inbound = std::result::Result<Vec<u8>, io::ErrorKind>;

struct Shared {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    written: Mutex<Vec<Bytes>>,
    write_failure: Mutex<Option<io::ErrorKind>>,
    selected_configuration: Mutex<Option<u8>>,
    claimed_interface: Mutex<Option<u8>>,
    opened: AtomicBool,
    released: AtomicBool,
    live_interfaces: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted device.
#[derive(Clone)]
pub struct MockDevice {
    identity: DeviceIdentity,
    interfaces: Vec<InterfaceInfo>,
    claim_failures: HashSet<u8>,
    fail_open: bool,
    shared: Arc<Shared>,
}

/// Test-side handle for a [`MockDevice`].
#[derive(Clone)]
pub struct MockController {
    shared: Arc<Shared>,
}

impl MockDevice {
    /// Vendor-class device with one interface exposing bulk endpoints
    /// `0x81` (in) and `0x01` (out).
    pub fn new() -> (Self, MockController) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            written: Mutex::new(Vec::new()),
            write_failure: Mutex::new(None),
            selected_configuration: Mutex::new(None),
            claimed_interface: Mutex::new(None),
            opened: AtomicBool::new(false),
            released: AtomicBool::new(false),
            live_interfaces: AtomicUsize::new(0),
        });
        let device = Self {
            identity: DeviceIdentity {
                vendor_id: 0x239a,
                product_id: 0x8018,
                class: crate::filter::VENDOR_CLASS,
                subclass: crate::filter::LINE_SUBCLASS,
                serial: Some("MOCK0001".to_string()),
                product: Some("Mock line device".to_string()),
                interfaces: Vec::new(),
            },
            interfaces: vec![InterfaceInfo {
                number: 0,
                alternate: 0,
                endpoints: vec![EndpointInfo::bulk(0x81), EndpointInfo::bulk(0x01)],
            }],
            claim_failures: HashSet::new(),
            fail_open: false,
            shared: shared.clone(),
        };
        (device, MockController { shared })
    }

    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_interfaces(mut self, interfaces: Vec<InterfaceInfo>) -> Self {
        self.interfaces = interfaces;
        self
    }

    /// Make claiming interface `number` fail.
    pub fn failing_claim(mut self, number: u8) -> Self {
        self.claim_failures.insert(number);
        self
    }

    /// Make opening the device fail.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDevice")
            .field("identity", &self.identity)
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

impl MockController {
    /// Queue one inbound chunk.
    pub fn push_chunk(&self, chunk: &[u8]) {
        let _ = self.shared.inbound_tx.send(Ok(chunk.to_vec()));
    }

    /// Queue one inbound transfer failure.
    pub fn push_error(&self, kind: io::ErrorKind) {
        let _ = self.shared.inbound_tx.send(Err(kind));
    }

    /// Make every following outbound transfer fail.
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        *lock(&self.shared.write_failure) = Some(kind);
    }

    /// Chunks written so far, in order.
    pub fn written(&self) -> Vec<Bytes> {
        lock(&self.shared.written).clone()
    }

    pub fn selected_configuration(&self) -> Option<u8> {
        *lock(&self.shared.selected_configuration)
    }

    pub fn claimed_interface(&self) -> Option<u8> {
        *lock(&self.shared.claimed_interface)
    }

    pub fn is_opened(&self) -> bool {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// True once the device handle and every claimed interface are dropped.
    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::SeqCst) && self.live_interfaces() == 0
    }

    /// Claimed interface objects still alive, transfer clones included.
    pub fn live_interfaces(&self) -> usize {
        self.shared.live_interfaces.load(Ordering::SeqCst)
    }
}

impl UsbDevice for MockDevice {
    type Handle = MockHandle;

    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    fn open(&self) -> Result<MockHandle> {
        if self.fail_open {
            return Err(TransportError::Open {
                device: self.identity.to_string(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        self.shared.opened.store(true, Ordering::SeqCst);
        Ok(MockHandle {
            interfaces: self.interfaces.clone(),
            claim_failures: self.claim_failures.clone(),
            shared: self.shared.clone(),
        })
    }
}

/// Opened [`MockDevice`].
pub struct MockHandle {
    interfaces: Vec<InterfaceInfo>,
    claim_failures: HashSet<u8>,
    shared: Arc<Shared>,
}

impl DeviceHandle for MockHandle {
    type Interface = MockInterface;

    fn select_configuration(&self, value: u8) -> Result<()> {
        *lock(&self.shared.selected_configuration) = Some(value);
        Ok(())
    }

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        Ok(self.interfaces.clone())
    }

    fn claim_interface(&self, number: u8) -> Result<MockInterface> {
        if self.claim_failures.contains(&number) {
            return Err(TransportError::Claim {
                interface: number,
                source: io::Error::from(io::ErrorKind::ResourceBusy),
            });
        }
        *lock(&self.shared.claimed_interface) = Some(number);
        Ok(MockInterface::new(self.shared.clone()))
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.shared.released.store(true, Ordering::SeqCst);
    }
}

/// Claimed interface of a [`MockDevice`].
pub struct MockInterface {
    shared: Arc<Shared>,
}

impl MockInterface {
    fn new(shared: Arc<Shared>) -> Self {
        shared.live_interfaces.fetch_add(1, Ordering::SeqCst);
        Self { shared }
    }
}

impl Clone for MockInterface {
    fn clone(&self) -> Self {
        Self::new(self.shared.clone())
    }
}

impl Drop for MockInterface {
    fn drop(&mut self) {
        self.shared.live_interfaces.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BulkInterface for MockInterface {
    async fn bulk_in(&self, endpoint: u8, len: usize) -> Result<Bytes> {
        let next = self.shared.inbound_rx.lock().await.recv().await;
        match next {
            Some(Ok(mut data)) => {
                data.truncate(len);
                Ok(Bytes::from(data))
            }
            Some(Err(kind)) => Err(TransportError::Transfer {
                direction: Direction::In,
                endpoint,
                source: io::Error::from(kind),
            }),
            None => Err(TransportError::Transfer {
                direction: Direction::In,
                endpoint,
                source: io::Error::from(io::ErrorKind::BrokenPipe),
            }),
        }
    }

    async fn bulk_out(&self, endpoint: u8, data: Bytes) -> Result<usize> {
        if let Some(kind) = *lock(&self.shared.write_failure) {
            return Err(TransportError::Transfer {
                direction: Direction::Out,
                endpoint,
                source: io::Error::from(kind),
            });
        }
        let len = data.len();
        lock(&self.shared.written).push(data);
        Ok(len)
    }
}

/// Fixed list of mock devices.
#[derive(Clone, Default)]
pub struct MockProvider {
    devices: Vec<MockDevice>,
}

impl MockProvider {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self { devices }
    }
}

impl DeviceProvider for MockProvider {
    type Device = MockDevice;

    fn devices(&self) -> Result<Vec<MockDevice>> {
        Ok(self.devices.clone())
    }
}
