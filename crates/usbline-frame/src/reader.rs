use bytes::BytesMut;
use tracing::{trace, warn};
use usbline_transport::ChunkSource;

use crate::codec::{
    decode_chunk, decode_payload, find_terminator, Frame, FrameConfig, UnterminatedPolicy,
    HEADER_SIZE,
};
use crate::error::{FrameError, Result};

/// Turns raw inbound chunks into frames.
///
/// Each call to [`read_once`](Self::read_once) issues exactly one inbound
/// transfer; [`read_frame`](Self::read_frame) repeats it until a frame is
/// complete.
pub struct FrameReader<S> {
    inner: S,
    partial: Option<BytesMut>,
    config: FrameConfig,
}

impl<S: ChunkSource> FrameReader<S> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: S, config: FrameConfig) -> Self {
        Self {
            inner,
            partial: None,
            config,
        }
    }

    /// Read one chunk and decode it.
    ///
    /// Returns `Ok(None)` when the chunk was empty, dropped, or only
    /// continued a buffered frame.
    pub async fn read_once(&mut self) -> Result<Option<Frame>> {
        let chunk = self.inner.read_chunk().await?;
        self.accept(&chunk)
    }

    /// Read chunks until a complete frame is available.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.read_once().await? {
                return Ok(frame);
            }
        }
    }

    /// Borrow the underlying chunk source.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Consume the reader and return the inner source.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<S> FrameReader<S> {
    /// Feed one chunk through the codec.
    pub fn accept(&mut self, chunk: &[u8]) -> Result<Option<Frame>> {
        if chunk.is_empty() {
            trace!("empty chunk");
            return Ok(None);
        }

        if self.partial.is_some() {
            return self.continue_partial(chunk);
        }

        match decode_chunk(chunk) {
            Err(FrameError::UnterminatedFrame { len }) => match self.config.unterminated {
                UnterminatedPolicy::Drop => {
                    warn!(len, "dropping unterminated chunk");
                    Ok(None)
                }
                UnterminatedPolicy::Error => Err(FrameError::UnterminatedFrame { len }),
                UnterminatedPolicy::Buffer => {
                    trace!(len, "buffering unterminated chunk");
                    let body = chunk.get(HEADER_SIZE..).unwrap_or_default();
                    self.extend_partial(BytesMut::new(), body)
                }
            },
            other => other,
        }
    }

    /// Discard any partially buffered frame.
    pub fn reset(&mut self) {
        self.partial = None;
    }

    /// Number of bytes held for an incomplete frame.
    pub fn buffered(&self) -> usize {
        self.partial.as_ref().map_or(0, BytesMut::len)
    }

    fn continue_partial(&mut self, chunk: &[u8]) -> Result<Option<Frame>> {
        let mut partial = self.partial.take().unwrap_or_default();
        // Every wire unit carries its own header byte.
        let body = chunk.get(HEADER_SIZE..).unwrap_or_default();
        match find_terminator(body) {
            Some(end) => {
                partial.extend_from_slice(&body[..end]);
                if partial.len() > self.config.max_frame_size {
                    return Err(self.too_large(partial.len()));
                }
                Ok(Some(Frame::new(decode_payload(&partial))))
            }
            None => self.extend_partial(partial, body),
        }
    }

    fn extend_partial(&mut self, mut partial: BytesMut, bytes: &[u8]) -> Result<Option<Frame>> {
        partial.extend_from_slice(bytes);
        if partial.len() > self.config.max_frame_size {
            return Err(self.too_large(partial.len()));
        }
        self.partial = Some(partial);
        Ok(None)
    }

    fn too_large(&self, size: usize) -> FrameError {
        warn!(
            size,
            max = self.config.max_frame_size,
            "discarding oversized frame"
        );
        FrameError::FrameTooLarge {
            size,
            max: self.config.max_frame_size,
        }
    }
}
