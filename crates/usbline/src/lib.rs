//! Line-framed text messaging with USB microcontrollers.
//!
//! usbline pairs with one attached device that advertises the vendor class
//! and line subclass, then exchanges newline-terminated messages over a bulk
//! endpoint pair, one 64-byte chunk per message.
//!
//! # Crate Structure
//!
//! - [`transport`]: Device selection and sessions, raw chunk transfer
//! - [`frame`]: Chunk encoding and decoding
//! - [`link`]: Pairing, receive loop and message delivery (behind `link` feature)

/// Re-export transport types.
pub mod transport {
    pub use usbline_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use usbline_frame::*;
}

/// Re-export link types (requires `link` feature).
#[cfg(feature = "link")]
pub mod link {
    pub use usbline_link::*;
}
