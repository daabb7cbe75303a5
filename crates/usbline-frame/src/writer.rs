use bytes::BytesMut;
use tokio::sync::Mutex;
use tracing::debug;
use usbline_transport::ChunkSink;

use crate::codec::{encode_message, Frame, FrameConfig, CHUNK_SIZE};
use crate::error::Result;

/// Encodes messages into chunks and writes them, one transfer per message.
///
/// [`send`](Self::send) takes `&self`; concurrent sends are serialized so
/// chunks never interleave on the outbound endpoint.
pub struct FrameWriter<S> {
    inner: S,
    buf: Mutex<BytesMut>,
    config: FrameConfig,
}

impl<S: ChunkSink> FrameWriter<S> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: S, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: Mutex::new(BytesMut::with_capacity(CHUNK_SIZE)),
            config,
        }
    }

    /// Encode and write one message. No acknowledgement is awaited.
    pub async fn send(&self, message: &str) -> Result<()> {
        let mut buf = self.buf.lock().await;
        buf.clear();
        encode_message(message, self.config.outbound_header, &mut buf)?;

        let chunk = buf.split().freeze();
        self.inner.write_chunk(chunk).await?;
        debug!(len = message.len(), "message sent");
        Ok(())
    }

    /// Write a complete frame.
    pub async fn write_frame(&self, frame: &Frame) -> Result<()> {
        self.send(frame.as_str()).await
    }

    /// Borrow the underlying chunk sink.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Consume the writer and return the inner sink.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use usbline_transport::mock::MockDevice;
    use usbline_transport::{DeviceSession, TransportError};

    use super::*;
    use crate::codec::{decode_chunk, MAX_PAYLOAD, TERMINATOR};
    use crate::error::FrameError;

    #[derive(Default)]
    struct RecordingSink {
        chunks: std::sync::Mutex<Vec<Bytes>>,
    }

    impl ChunkSink for RecordingSink {
        async fn write_chunk(&self, chunk: Bytes) -> usbline_transport::Result<()> {
            self.chunks.lock().unwrap().push(chunk);
            Ok(())
        }
    }

    /// Yields inside every write and records how many writes overlap.
    #[derive(Default)]
    struct SlowSink {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        chunks: std::sync::Mutex<Vec<Bytes>>,
    }

    impl ChunkSink for SlowSink {
        async fn write_chunk(&self, chunk: Bytes) -> usbline_transport::Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.chunks.lock().unwrap().push(chunk);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn writes_one_padded_chunk_per_message() {
        let writer = FrameWriter::new(RecordingSink::default());

        writer.send("go").await.unwrap();

        let chunks = writer.get_ref().chunks.lock().unwrap().clone();
        assert_eq!(chunks.len(), 1);
        let mut expected = vec![b'g', b'o', TERMINATOR];
        expected.resize(CHUNK_SIZE, 0);
        assert_eq!(chunks[0].as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn header_byte_prepended_when_configured() {
        let cfg = FrameConfig {
            outbound_header: Some(0x02),
            ..FrameConfig::default()
        };
        let writer = FrameWriter::with_config(RecordingSink::default(), cfg);

        writer.send("go").await.unwrap();

        let chunk = writer.get_ref().chunks.lock().unwrap()[0].clone();
        assert_eq!(&chunk[..4], &[0x02, b'g', b'o', TERMINATOR]);
        assert_eq!(decode_chunk(&chunk).unwrap().unwrap().as_str(), "go");
    }

    #[tokio::test]
    async fn oversized_message_rejected_before_transfer() {
        let writer = FrameWriter::new(RecordingSink::default());

        let err = writer.send(&"x".repeat(MAX_PAYLOAD + 1)).await.unwrap_err();

        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(writer.get_ref().chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_frame_method() {
        let writer = FrameWriter::new(RecordingSink::default());
        writer.write_frame(&Frame::new("abc")).await.unwrap();

        let chunk = writer.get_ref().chunks.lock().unwrap()[0].clone();
        assert_eq!(&chunk[..4], b"abc\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_do_not_overlap() {
        let writer = Arc::new(FrameWriter::new(SlowSink::default()));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let writer = Arc::clone(&writer);
                tokio::spawn(async move { writer.send(&format!("msg-{i}")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let sink = writer.get_ref();
        assert_eq!(sink.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(sink.chunks.lock().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn writes_to_device_session() {
        let (device, control) = MockDevice::new();
        let session = DeviceSession::open(&device).unwrap();
        let writer = FrameWriter::new(&session);

        writer.send("go").await.unwrap();

        let written = control.written();
        assert_eq!(written.len(), 1);
        assert_eq!(&written[0][..3], b"go\n");
        assert_eq!(written[0].len(), CHUNK_SIZE);
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (device, _control) = MockDevice::new();
        let session = DeviceSession::open(&device).unwrap();
        let writer = FrameWriter::new(&session);

        session.close().unwrap();

        let err = writer.send("late").await.unwrap_err();
        assert!(matches!(err, FrameError::Transport(TransportError::Closed)));
    }

    #[test]
    fn accessors_and_into_inner() {
        let writer = FrameWriter::new(RecordingSink::default());
        let _ = writer.get_ref();
        let _ = writer.config();
        let _inner = writer.into_inner();
    }
}
