use std::pin::pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::traits::{
    BulkInterface, ChunkSink, ChunkSource, DeviceHandle, Direction, InterfaceInfo, UsbDevice,
};

/// Capacity of one inbound or outbound transfer, in bytes.
pub const CHUNK_SIZE: usize = 64;

/// Configuration value selected on open (the device's first configuration).
pub const DEFAULT_CONFIGURATION: u8 = 1;

/// Lifecycle of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Opening = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Opening,
            2 => SessionState::Open,
            3 => SessionState::Closing,
            4 => SessionState::Closed,
            _ => SessionState::Disconnected,
        }
    }
}

struct Bound<H: DeviceHandle> {
    // Field order matters: the interface is released before the device.
    interface: H::Interface,
    _handle: H,
}

/// One opened device bound to a claimed interface and its bulk endpoint pair.
///
/// Transfers take `&self`, so the session can be shared through an `Arc`
/// between the receive loop and senders. After [`close`](Self::close) every
/// transfer fails with [`TransportError::Closed`]. A transfer in flight at
/// that moment is cancelled and fails the same way, so nothing keeps the
/// claimed interface alive once its task observes the close.
pub struct DeviceSession<H: DeviceHandle> {
    bound: Mutex<Option<Bound<H>>>,
    state: AtomicU8,
    closed: Notify,
    device: String,
    interface_number: u8,
    endpoint_in: u8,
    endpoint_out: u8,
}

impl<H: DeviceHandle> DeviceSession<H> {
    /// Open a device using its first configuration.
    pub fn open<D>(device: &D) -> Result<Self>
    where
        D: UsbDevice<Handle = H>,
    {
        Self::open_with_configuration(device, DEFAULT_CONFIGURATION)
    }

    /// Open a device, select `configuration`, claim the first claimable
    /// interface and locate its inbound and outbound endpoints.
    pub fn open_with_configuration<D>(device: &D, configuration: u8) -> Result<Self>
    where
        D: UsbDevice<Handle = H>,
    {
        let label = device.identity().to_string();
        debug!(device = %label, state = ?SessionState::Opening, "opening device");

        let handle = device.open()?;
        handle.select_configuration(configuration)?;
        let interfaces = handle.interfaces()?;
        let (info, interface) = claim_first(&handle, &interfaces)?;

        let endpoint_in = endpoint_address(&info, Direction::In)?;
        let endpoint_out = endpoint_address(&info, Direction::Out)?;

        info!(
            device = %label,
            interface = info.number,
            endpoint_in = format_args!("{endpoint_in:#04x}"),
            endpoint_out = format_args!("{endpoint_out:#04x}"),
            "device session open"
        );

        Ok(Self {
            bound: Mutex::new(Some(Bound {
                interface,
                _handle: handle,
            })),
            state: AtomicU8::new(SessionState::Open as u8),
            closed: Notify::new(),
            device: label,
            interface_number: info.number,
            endpoint_in,
            endpoint_out,
        })
    }

    /// Release the device handle and mark the session closed.
    ///
    /// Closing an already closed session returns [`TransportError::Closed`].
    pub fn close(&self) -> Result<()> {
        self.state
            .compare_exchange(
                SessionState::Open as u8,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| TransportError::Closed)?;

        let bound = self.lock().take();
        drop(bound);

        self.state
            .store(SessionState::Closed as u8, Ordering::Release);
        self.closed.notify_waiters();
        info!(device = %self.device, "device session closed");
        Ok(())
    }

    /// Wait for one inbound transfer. The chunk may be empty.
    pub async fn read_chunk(&self) -> Result<Bytes> {
        // Registered before the state check so a concurrent close is never missed.
        let mut closed = pin!(self.closed.notified());
        closed.as_mut().enable();

        let interface = self.interface()?;
        let chunk = tokio::select! {
            chunk = interface.bulk_in(self.endpoint_in, CHUNK_SIZE) => chunk?,
            () = &mut closed => {
                debug!(endpoint = self.endpoint_in, "inbound transfer cancelled by close");
                return Err(TransportError::Closed);
            }
        };
        trace!(endpoint = self.endpoint_in, len = chunk.len(), "inbound chunk");
        Ok(chunk)
    }

    /// Wait for one outbound transfer writing exactly `chunk`.
    pub async fn write_chunk(&self, chunk: Bytes) -> Result<()> {
        let mut closed = pin!(self.closed.notified());
        closed.as_mut().enable();

        let interface = self.interface()?;
        let expected = chunk.len();
        let written = tokio::select! {
            written = interface.bulk_out(self.endpoint_out, chunk) => written?,
            () = &mut closed => {
                debug!(endpoint = self.endpoint_out, "outbound transfer cancelled by close");
                return Err(TransportError::Closed);
            }
        };
        if written != expected {
            return Err(TransportError::Transfer {
                direction: Direction::Out,
                endpoint: self.endpoint_out,
                source: std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("short write ({written} of {expected} bytes)"),
                ),
            });
        }
        trace!(endpoint = self.endpoint_out, len = written, "outbound chunk");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Human-readable device label used in diagnostics.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }

    pub fn endpoint_in(&self) -> u8 {
        self.endpoint_in
    }

    pub fn endpoint_out(&self) -> u8 {
        self.endpoint_out
    }

    fn interface(&self) -> Result<H::Interface> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.lock()
            .as_ref()
            .map(|bound| bound.interface.clone())
            .ok_or(TransportError::Closed)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Bound<H>>> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: DeviceHandle> ChunkSource for DeviceSession<H> {
    async fn read_chunk(&self) -> Result<Bytes> {
        DeviceSession::read_chunk(self).await
    }
}

impl<H: DeviceHandle> ChunkSink for DeviceSession<H> {
    async fn write_chunk(&self, chunk: Bytes) -> Result<()> {
        DeviceSession::write_chunk(self, chunk).await
    }
}

impl<H: DeviceHandle> std::fmt::Debug for DeviceSession<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.device)
            .field("state", &self.state())
            .field("interface", &self.interface_number)
            .field("endpoint_in", &self.endpoint_in)
            .field("endpoint_out", &self.endpoint_out)
            .finish()
    }
}

/// Claim interfaces in declaration order, stopping at the first success.
fn claim_first<H: DeviceHandle>(
    handle: &H,
    interfaces: &[InterfaceInfo],
) -> Result<(InterfaceInfo, H::Interface)> {
    for info in interfaces {
        match handle.claim_interface(info.number) {
            Ok(interface) => {
                debug!(interface = info.number, "claimed interface");
                return Ok((info.clone(), interface));
            }
            Err(err) => {
                debug!(interface = info.number, error = %err, "interface not claimable");
            }
        }
    }
    Err(TransportError::NoClaimableInterface {
        tried: interfaces.len(),
    })
}

fn endpoint_address(info: &InterfaceInfo, direction: Direction) -> Result<u8> {
    info.find_endpoint(direction)
        .map(|ep| ep.address)
        .ok_or(TransportError::EndpointNotFound {
            interface: info.number,
            direction,
        })
}
