use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

pub use usbline_transport::CHUNK_SIZE;

/// Line-feed byte terminating every frame.
pub const TERMINATOR: u8 = b'\n';

/// Inbound header: one format/identifier byte, never inspected.
pub const HEADER_SIZE: usize = 1;

/// Largest outbound payload: one chunk minus the terminator.
pub const MAX_PAYLOAD: usize = CHUNK_SIZE - 1;

/// Default limit for frames reassembled from several chunks.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * CHUNK_SIZE;

/// One decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message text, without header byte or terminator.
    pub payload: String,
}

impl Frame {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.payload
    }

    pub fn into_payload(self) -> String {
        self.payload
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.payload)
    }
}

/// What to do with an inbound chunk that has no terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnterminatedPolicy {
    /// Log and discard the chunk.
    #[default]
    Drop,
    /// Keep the bytes and continue the frame with the following chunks.
    Buffer,
    /// Report [`FrameError::UnterminatedFrame`].
    Error,
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Handling of chunks without a terminator. Default: drop.
    pub unterminated: UnterminatedPolicy,
    /// Maximum reassembled payload under [`UnterminatedPolicy::Buffer`].
    pub max_frame_size: usize,
    /// Header byte to prepend on outbound chunks. Default: none, the
    /// firmware reads outbound chunks without a header.
    pub outbound_header: Option<u8>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            unterminated: UnterminatedPolicy::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_header: None,
        }
    }
}

impl FrameConfig {
    /// Outbound payload capacity for this configuration.
    pub fn max_payload(&self) -> usize {
        MAX_PAYLOAD - usize::from(self.outbound_header.is_some())
    }
}

/// Encode a message into one zero-padded chunk.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬────────────────┬──────┬──────────────────┐
/// │ Header (0/1B)    │ UTF-8 payload  │ 0x0A │ zero padding     │
/// │ optional         │ (≤ 63B)        │      │ (to 64B)         │
/// └──────────────────┴────────────────┴──────┴──────────────────┘
/// ```
pub fn encode_message(message: &str, header: Option<u8>, dst: &mut BytesMut) -> Result<()> {
    let max = MAX_PAYLOAD - usize::from(header.is_some());
    if message.len() > max {
        return Err(FrameError::PayloadTooLarge {
            size: message.len(),
            max,
        });
    }
    if let Some(index) = message.bytes().position(|b| b == TERMINATOR) {
        return Err(FrameError::EmbeddedTerminator { index });
    }

    let start = dst.len();
    dst.reserve(CHUNK_SIZE);
    if let Some(header) = header {
        dst.put_u8(header);
    }
    dst.put_slice(message.as_bytes());
    dst.put_u8(TERMINATOR);
    dst.resize(start + CHUNK_SIZE, 0);
    Ok(())
}

/// Encode a message into a standalone chunk.
pub fn encode_chunk(message: &str, header: Option<u8>) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    encode_message(message, header, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode one inbound chunk.
///
/// Returns `Ok(None)` for an empty chunk. The header byte at offset 0 is
/// skipped without inspection; the payload runs up to the first terminator
/// after it, and anything past the terminator is ignored. Invalid UTF-8 is
/// replaced with U+FFFD.
pub fn decode_chunk(chunk: &[u8]) -> Result<Option<Frame>> {
    if chunk.is_empty() {
        return Ok(None);
    }

    let body = chunk.get(HEADER_SIZE..).unwrap_or_default();
    let end = find_terminator(body).ok_or(FrameError::UnterminatedFrame { len: chunk.len() })?;

    Ok(Some(Frame::new(decode_payload(&body[..end]))))
}

pub(crate) fn find_terminator(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == TERMINATOR)
}

pub(crate) fn decode_payload(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(header: u8, payload: &[u8]) -> Vec<u8> {
        let mut chunk = vec![header];
        chunk.extend_from_slice(payload);
        chunk.push(TERMINATOR);
        chunk.resize(CHUNK_SIZE, 0);
        chunk
    }

    #[test]
    fn decodes_header_prefixed_chunk() {
        let frame = decode_chunk(&inbound(0x01, b"hi")).unwrap().unwrap();
        assert_eq!(frame.as_str(), "hi");
    }

    #[test]
    fn encodes_message_without_header() {
        let chunk = encode_chunk("go", None).unwrap();

        assert_eq!(chunk.len(), CHUNK_SIZE);
        assert_eq!(&chunk[..3], b"go\n");
        assert!(chunk[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn encodes_message_with_configured_header() {
        let chunk = encode_chunk("go", Some(0x01)).unwrap();
        assert_eq!(&chunk[..4], &[0x01, b'g', b'o', b'\n']);
        assert_eq!(chunk.len(), CHUNK_SIZE);
    }

    #[test]
    fn roundtrip_with_reinserted_header() {
        let longest = "x".repeat(62);
        for payload in ["", "a", "hello, device", "ünïcødé ✓", longest.as_str()] {
            let outbound = encode_chunk(payload, None).unwrap();
            let mut wire = vec![0x7f];
            wire.extend_from_slice(&outbound[..CHUNK_SIZE - 1]);

            let frame = decode_chunk(&wire).unwrap().unwrap();
            assert_eq!(frame.as_str(), payload);
        }
    }

    #[test]
    fn payload_excludes_header_and_terminator_at_every_position() {
        for k in 1..CHUNK_SIZE {
            let mut chunk = vec![b'#'; CHUNK_SIZE];
            chunk[0] = TERMINATOR.wrapping_add(1);
            chunk[k] = TERMINATOR;

            let frame = decode_chunk(&chunk).unwrap().unwrap();
            assert_eq!(frame.payload.len(), k - 1);
            assert!(frame.payload.bytes().all(|b| b == b'#'));
        }
    }

    #[test]
    fn header_byte_is_never_inspected() {
        let chunk = inbound(TERMINATOR, b"ok");
        assert_eq!(decode_chunk(&chunk).unwrap().unwrap().as_str(), "ok");
    }

    #[test]
    fn bytes_after_terminator_are_ignored() {
        let chunk = b"\x01one\ntwo\n";
        assert_eq!(decode_chunk(chunk).unwrap().unwrap().as_str(), "one");
    }

    #[test]
    fn empty_chunk_yields_nothing() {
        assert!(decode_chunk(&[]).unwrap().is_none());
    }

    #[test]
    fn missing_terminator_is_reported() {
        let err = decode_chunk(b"\x01abc").unwrap_err();
        assert!(matches!(err, FrameError::UnterminatedFrame { len: 4 }));

        let err = decode_chunk(&[0x0A]).unwrap_err();
        assert!(matches!(err, FrameError::UnterminatedFrame { len: 1 }));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let frame = decode_chunk(b"\x01a\xffb\n").unwrap().unwrap();
        assert_eq!(frame.as_str(), "a\u{FFFD}b");
    }

    #[test]
    fn oversized_payload_rejected() {
        let err = encode_chunk(&"x".repeat(MAX_PAYLOAD + 1), None).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 64, max: 63 }));

        assert!(encode_chunk(&"x".repeat(MAX_PAYLOAD), None).is_ok());

        let err = encode_chunk(&"x".repeat(MAX_PAYLOAD), Some(0)).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { max: 62, .. }));
    }

    #[test]
    fn embedded_terminator_rejected() {
        let err = encode_chunk("a\nb", None).unwrap_err();
        assert!(matches!(err, FrameError::EmbeddedTerminator { index: 1 }));
    }

    #[test]
    fn encode_appends_to_existing_buffer() {
        let mut buf = BytesMut::new();
        encode_message("one", None, &mut buf).unwrap();
        encode_message("two", None, &mut buf).unwrap();

        assert_eq!(buf.len(), 2 * CHUNK_SIZE);
        assert_eq!(&buf[CHUNK_SIZE..CHUNK_SIZE + 4], b"two\n");
    }

    #[test]
    fn config_capacity_accounts_for_header() {
        assert_eq!(FrameConfig::default().max_payload(), 63);
        let cfg = FrameConfig {
            outbound_header: Some(0x01),
            ..FrameConfig::default()
        };
        assert_eq!(cfg.max_payload(), 62);
    }
}
