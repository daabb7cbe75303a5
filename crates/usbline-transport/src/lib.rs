//! USB bulk-endpoint transport for line-framed device links.
//!
//! Provides the lowest layer of usbline:
//! - Device and interface abstractions ([`UsbDevice`], [`DeviceHandle`],
//!   [`BulkInterface`]) with a host backend on `nusb`
//! - [`DeviceSession`]: open, claim, raw 64-byte chunk transfer, close
//! - [`DeviceFilter`]: the class/subclass pair compatible firmware reports
//!
//! Everything else builds on top of the [`DeviceSession`] type provided here.

pub mod error;
pub mod filter;
pub mod session;
pub mod traits;

#[cfg(feature = "nusb")]
pub mod host;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{Result, TransportError};
pub use filter::{select_device, DeviceFilter, LINE_SUBCLASS, VENDOR_CLASS};
pub use session::{DeviceSession, SessionState, CHUNK_SIZE, DEFAULT_CONFIGURATION};
pub use traits::{
    BulkInterface, ChunkSink, ChunkSource, DeviceHandle, DeviceIdentity, DeviceProvider,
    Direction, EndpointInfo, InterfaceClass, InterfaceInfo, TransferKind, UsbDevice,
};

#[cfg(feature = "nusb")]
pub use host::{NusbDevice, NusbHandle, NusbInterface, NusbProvider};
