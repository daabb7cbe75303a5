//! Delivery of received messages to the application.

use tokio::sync::mpsc;

use crate::error::LinkError;

/// Why a receive loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The session was closed.
    Closed,
    /// A transfer failed past the configured retries.
    Failed,
}

/// Consumer of decoded messages.
///
/// Called from the receive loop task. The loop does not issue the next
/// inbound transfer until `on_message` returns, so implementations should
/// hand work off rather than block.
pub trait MessageSink: Send + Sync + 'static {
    fn on_message(&self, message: String);

    /// A steady-state error the loop observed.
    fn on_error(&self, error: &LinkError) {
        let _ = error;
    }

    /// The loop terminated. Called exactly once.
    fn on_closed(&self, exit: LoopExit) {
        let _ = exit;
    }
}

impl<F> MessageSink for F
where
    F: Fn(String) + Send + Sync + 'static,
{
    fn on_message(&self, message: String) {
        self(message)
    }
}

/// Event forwarded by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Message(String),
    Error(String),
    Closed(LoopExit),
}

/// Sink forwarding every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageSink for ChannelSink {
    fn on_message(&self, message: String) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(LinkEvent::Message(message));
    }

    fn on_error(&self, error: &LinkError) {
        let _ = self.tx.send(LinkEvent::Error(error.to_string()));
    }

    fn on_closed(&self, exit: LoopExit) {
        let _ = self.tx.send(LinkEvent::Closed(exit));
    }
}
