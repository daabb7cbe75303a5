//! Device selection filter.
//!
//! Pairing is scoped to devices that report a vendor-specific class together
//! with the application-defined subclass, so only compatible firmware is
//! offered. The class pair may sit on the device descriptor or on any one of
//! its interfaces.

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{DeviceIdentity, DeviceProvider, UsbDevice};

/// Vendor-specific device class.
pub const VENDOR_CLASS: u8 = 255;

/// Application-defined subclass advertised by compatible firmware.
pub const LINE_SUBCLASS: u8 = 42;

/// Criteria a device must satisfy to be offered for pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    pub class: u8,
    pub subclass: u8,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub serial: Option<String>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            class: VENDOR_CLASS,
            subclass: LINE_SUBCLASS,
            vendor_id: None,
            product_id: None,
            serial: None,
        }
    }
}

impl DeviceFilter {
    /// Restrict to a specific serial number.
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        if !self.matches_class(identity) {
            return false;
        }
        if self.vendor_id.is_some_and(|vid| vid != identity.vendor_id) {
            return false;
        }
        if self.product_id.is_some_and(|pid| pid != identity.product_id) {
            return false;
        }
        match &self.serial {
            Some(serial) => identity.serial.as_deref() == Some(serial.as_str()),
            None => true,
        }
    }

    fn matches_class(&self, identity: &DeviceIdentity) -> bool {
        let wanted = |class: u8, subclass: u8| class == self.class && subclass == self.subclass;
        wanted(identity.class, identity.subclass)
            || identity
                .interfaces
                .iter()
                .any(|iface| wanted(iface.class, iface.subclass))
    }
}

/// Pick the first enumerated device accepted by `filter`.
///
/// Returns [`TransportError::DeviceUnavailable`] when nothing matches.
pub fn select_device<P: DeviceProvider>(provider: &P, filter: &DeviceFilter) -> Result<P::Device> {
    let device = provider
        .devices()?
        .into_iter()
        .find(|device| filter.matches(&device.identity()))
        .ok_or(TransportError::DeviceUnavailable)?;
    debug!(device = %device.identity(), "selected device");
    Ok(device)
}
