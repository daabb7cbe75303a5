//! Host USB backend built on `nusb`.
//!
//! Setup calls (open, configure, claim) are synchronous; bulk transfers are
//! submitted to the OS and awaited.

use std::future::Future;
use std::io;

use ::nusb::transfer::{Direction as UsbDirection, EndpointType, RequestBuffer};
use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{
    BulkInterface, DeviceHandle, DeviceIdentity, DeviceProvider, Direction, EndpointInfo,
    InterfaceClass, InterfaceInfo, TransferKind, UsbDevice,
};

/// Enumerates devices through the operating system's USB stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct NusbProvider;

impl DeviceProvider for NusbProvider {
    type Device = NusbDevice;

    fn devices(&self) -> Result<Vec<NusbDevice>> {
        let devices = ::nusb::list_devices()
            .map_err(TransportError::Enumerate)?
            .map(|info| NusbDevice { info })
            .collect::<Vec<_>>();
        debug!(count = devices.len(), "enumerated usb devices");
        Ok(devices)
    }
}

/// An attached device found by [`NusbProvider`].
#[derive(Debug, Clone)]
pub struct NusbDevice {
    info: ::nusb::DeviceInfo,
}

impl UsbDevice for NusbDevice {
    type Handle = NusbHandle;

    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: self.info.vendor_id(),
            product_id: self.info.product_id(),
            class: self.info.class(),
            subclass: self.info.subclass(),
            serial: self.info.serial_number().map(str::to_owned),
            product: self.info.product_string().map(str::to_owned),
            interfaces: self
                .info
                .interfaces()
                .map(|iface| InterfaceClass {
                    number: iface.interface_number(),
                    class: iface.class(),
                    subclass: iface.subclass(),
                })
                .collect(),
        }
    }

    fn open(&self) -> Result<NusbHandle> {
        let device = self.info.open().map_err(|source| TransportError::Open {
            device: self.identity().to_string(),
            source,
        })?;
        Ok(NusbHandle { device })
    }
}

/// Opened device. Dropping it (and every claimed interface) closes the device.
pub struct NusbHandle {
    device: ::nusb::Device,
}

impl DeviceHandle for NusbHandle {
    type Interface = NusbInterface;

    fn select_configuration(&self, value: u8) -> Result<()> {
        self.device
            .set_configuration(value)
            .map_err(|source| TransportError::Configure { value, source })
    }

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        let config = self
            .device
            .active_configuration()
            .map_err(|err| TransportError::Descriptor(io::Error::other(err)))?;

        let interfaces = config
            .interfaces()
            .filter_map(|group| {
                let alt = group
                    .alt_settings()
                    .find(|alt| alt.alternate_setting() == 0)
                    .or_else(|| group.alt_settings().next())?;
                Some(InterfaceInfo {
                    number: group.interface_number(),
                    alternate: alt.alternate_setting(),
                    endpoints: alt
                        .endpoints()
                        .map(|ep| EndpointInfo {
                            address: ep.address(),
                            direction: match ep.direction() {
                                UsbDirection::In => Direction::In,
                                UsbDirection::Out => Direction::Out,
                            },
                            kind: match ep.transfer_type() {
                                EndpointType::Control => TransferKind::Control,
                                EndpointType::Isochronous => TransferKind::Isochronous,
                                EndpointType::Bulk => TransferKind::Bulk,
                                EndpointType::Interrupt => TransferKind::Interrupt,
                            },
                        })
                        .collect(),
                })
            })
            .collect();
        Ok(interfaces)
    }

    fn claim_interface(&self, number: u8) -> Result<NusbInterface> {
        self.device
            .claim_interface(number)
            .map(|inner| NusbInterface { inner })
            .map_err(|source| TransportError::Claim {
                interface: number,
                source,
            })
    }
}

/// Claimed interface of an [`NusbHandle`].
#[derive(Clone)]
pub struct NusbInterface {
    inner: ::nusb::Interface,
}

impl BulkInterface for NusbInterface {
    fn bulk_in(&self, endpoint: u8, len: usize) -> impl Future<Output = Result<Bytes>> + Send {
        let transfer = self.inner.bulk_in(endpoint, RequestBuffer::new(len));
        async move {
            let data = transfer
                .await
                .into_result()
                .map_err(|err| TransportError::Transfer {
                    direction: Direction::In,
                    endpoint,
                    source: io::Error::other(err),
                })?;
            Ok(Bytes::from(data))
        }
    }

    fn bulk_out(&self, endpoint: u8, data: Bytes) -> impl Future<Output = Result<usize>> + Send {
        let transfer = self.inner.bulk_out(endpoint, data.to_vec());
        async move {
            let response = transfer
                .await
                .into_result()
                .map_err(|err| TransportError::Transfer {
                    direction: Direction::Out,
                    endpoint,
                    source: io::Error::other(err),
                })?;
            Ok(response.actual_length())
        }
    }
}
