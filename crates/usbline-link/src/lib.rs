//! Device links for usbline.
//!
//! This is the "just works" layer. Pair with a device, receive its messages
//! through a [`MessageSink`], send messages back, disconnect.

pub mod error;
pub mod link;
pub mod pairing;
pub mod sink;

pub use error::{LinkError, Result};
pub use link::{Link, LinkConfig};
pub use pairing::{disconnect, pair};
pub use sink::{ChannelSink, LinkEvent, LoopExit, MessageSink};
