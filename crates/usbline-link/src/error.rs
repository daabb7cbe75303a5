/// Errors that can occur in link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] usbline_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] usbline_frame::FrameError),

    /// A receiving link was opened outside a tokio runtime.
    #[error("receive loop needs a tokio runtime")]
    NoRuntime,
}

impl LinkError {
    /// True when the link was closed underneath the operation.
    pub fn is_closed(&self) -> bool {
        use usbline_frame::FrameError;
        use usbline_transport::TransportError;

        matches!(
            self,
            LinkError::Transport(TransportError::Closed)
                | LinkError::Frame(FrameError::Transport(TransportError::Closed))
        )
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
