use crate::traits::Direction;

/// Errors that can occur in USB transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No device matched the selection filter, or selection was abandoned.
    #[error("no matching device available")]
    DeviceUnavailable,

    /// Failed to enumerate attached devices.
    #[error("failed to enumerate USB devices: {0}")]
    Enumerate(std::io::Error),

    /// Failed to open the device handle.
    #[error("failed to open device {device}: {source}")]
    Open {
        device: String,
        source: std::io::Error,
    },

    /// Failed to select the requested configuration.
    #[error("failed to select configuration {value}: {source}")]
    Configure { value: u8, source: std::io::Error },

    /// Failed to read the configuration descriptors.
    #[error("failed to read configuration descriptor: {0}")]
    Descriptor(std::io::Error),

    /// Claiming a single interface failed.
    #[error("failed to claim interface {interface}: {source}")]
    Claim {
        interface: u8,
        source: std::io::Error,
    },

    /// None of the declared interfaces could be claimed.
    #[error("no claimable interface ({tried} tried)")]
    NoClaimableInterface { tried: usize },

    /// The claimed interface lacks a bulk endpoint in the given direction.
    #[error("interface {interface} has no {direction} bulk endpoint")]
    EndpointNotFound { interface: u8, direction: Direction },

    /// An inbound or outbound transfer failed.
    #[error("{direction} transfer on endpoint {endpoint:#04x} failed: {source}")]
    Transfer {
        direction: Direction,
        endpoint: u8,
        source: std::io::Error,
    },

    /// The session has been closed.
    #[error("session closed")]
    Closed,
}

impl TransportError {
    /// True for errors raised by a single transfer rather than by session setup.
    pub fn is_transfer(&self) -> bool {
        matches!(self, TransportError::Transfer { .. })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
