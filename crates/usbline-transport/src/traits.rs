use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

/// Transfer direction, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => f.write_str("inbound"),
            Direction::Out => f.write_str("outbound"),
        }
    }
}

/// Endpoint transfer type as declared in the endpoint descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint of an interface alternate setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Endpoint address including the direction bit (e.g. `0x81`).
    pub address: u8,
    pub direction: Direction,
    pub kind: TransferKind,
}

impl EndpointInfo {
    /// Bulk endpoint with the direction derived from the address bit.
    pub fn bulk(address: u8) -> Self {
        let direction = if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        };
        Self {
            address,
            direction,
            kind: TransferKind::Bulk,
        }
    }
}

/// A declared interface together with its active alternate setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub alternate: u8,
    pub endpoints: Vec<EndpointInfo>,
}

impl InterfaceInfo {
    /// First bulk endpoint in the given direction, in descriptor order.
    pub fn find_endpoint(&self, direction: Direction) -> Option<&EndpointInfo> {
        self.endpoints
            .iter()
            .find(|ep| ep.kind == TransferKind::Bulk && ep.direction == direction)
    }
}

/// Class codes an interface declares in its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceClass {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
}

/// Descriptor-level identity of an attached device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub class: u8,
    pub subclass: u8,
    pub serial: Option<String>,
    pub product: Option<String>,
    /// Interface class codes, for composite devices that declare their
    /// function per interface.
    pub interfaces: Vec<InterfaceClass>,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)?;
        if let Some(serial) = &self.serial {
            write!(f, " ({serial})")?;
        }
        Ok(())
    }
}

/// An attached, not yet opened device.
pub trait UsbDevice: Send + Sync {
    type Handle: DeviceHandle;

    /// Identity reported by the device descriptor.
    fn identity(&self) -> DeviceIdentity;

    /// Open the device, acquiring an exclusive handle.
    fn open(&self) -> Result<Self::Handle>;
}

/// An opened device. Dropping the handle releases it.
pub trait DeviceHandle: Send + Sync + 'static {
    type Interface: BulkInterface;

    /// Select a configuration by its `bConfigurationValue`.
    fn select_configuration(&self, value: u8) -> Result<()>;

    /// Interfaces of the active configuration in declaration order, each with
    /// its active alternate setting.
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>>;

    /// Claim an interface for exclusive use.
    fn claim_interface(&self, number: u8) -> Result<Self::Interface>;
}

/// Bulk transfer primitives of a claimed interface.
pub trait BulkInterface: Clone + Send + Sync + 'static {
    /// Submit one inbound transfer of up to `len` bytes and wait for it.
    fn bulk_in(&self, endpoint: u8, len: usize) -> impl Future<Output = Result<Bytes>> + Send;

    /// Submit one outbound transfer and wait for it. Returns bytes written.
    fn bulk_out(&self, endpoint: u8, data: Bytes) -> impl Future<Output = Result<usize>> + Send;
}

/// Enumerates attached devices.
pub trait DeviceProvider {
    type Device: UsbDevice;

    fn devices(&self) -> Result<Vec<Self::Device>>;
}

/// Something that yields raw inbound chunks, one transfer at a time.
pub trait ChunkSource: Send + Sync {
    fn read_chunk(&self) -> impl Future<Output = Result<Bytes>> + Send;
}

/// Something that accepts raw outbound chunks, one transfer at a time.
pub trait ChunkSink: Send + Sync {
    fn write_chunk(&self, chunk: Bytes) -> impl Future<Output = Result<()>> + Send;
}

impl<T: ChunkSource + ?Sized> ChunkSource for Arc<T> {
    fn read_chunk(&self) -> impl Future<Output = Result<Bytes>> + Send {
        (**self).read_chunk()
    }
}

impl<T: ChunkSource + ?Sized> ChunkSource for &T {
    fn read_chunk(&self) -> impl Future<Output = Result<Bytes>> + Send {
        (**self).read_chunk()
    }
}

impl<T: ChunkSink + ?Sized> ChunkSink for Arc<T> {
    fn write_chunk(&self, chunk: Bytes) -> impl Future<Output = Result<()>> + Send {
        (**self).write_chunk(chunk)
    }
}

impl<T: ChunkSink + ?Sized> ChunkSink for &T {
    fn write_chunk(&self, chunk: Bytes) -> impl Future<Output = Result<()>> + Send {
        (**self).write_chunk(chunk)
    }
}
