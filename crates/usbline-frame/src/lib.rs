//! Fixed-size line framing for USB bulk-endpoint messaging.
//!
//! Every transfer is exactly one 64-byte chunk carrying one message:
//! - Inbound: 1 header byte (skipped), UTF-8 payload, `0x0A`, zero padding
//! - Outbound: UTF-8 payload, `0x0A`, zero padding (no header byte)
//!
//! No reassembly by default, no batching: one chunk, one message.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_chunk, encode_chunk, encode_message, Frame, FrameConfig, UnterminatedPolicy,
    CHUNK_SIZE, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE, MAX_PAYLOAD, TERMINATOR,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
