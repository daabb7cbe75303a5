use usbline_transport::TransportError;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A chunk carried no line-feed terminator.
    #[error("unterminated frame ({len} bytes without line-feed)")]
    UnterminatedFrame { len: usize },

    /// Buffered continuation chunks exceeded the configured frame limit.
    #[error("frame too large ({size} bytes buffered, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The outbound payload does not fit into one chunk.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The outbound payload contains the terminator byte.
    #[error("payload contains a line-feed at byte {index}")]
    EmbeddedTerminator { index: usize },

    /// The underlying transfer failed or the session is closed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl FrameError {
    /// True when the stream can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::UnterminatedFrame { .. } | FrameError::FrameTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
