use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use usbline_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use usbline_transport::{
    DeviceHandle, DeviceSession, SessionState, TransportError, UsbDevice, DEFAULT_CONFIGURATION,
};

use crate::error::{LinkError, Result};
use crate::sink::{LoopExit, MessageSink};

/// Link behavior configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Codec settings for both directions.
    pub frame: FrameConfig,
    /// Configuration value selected on open.
    pub configuration: u8,
    /// Consecutive inbound transfer failures tolerated before the receive
    /// loop gives up. Default: 0, the first failure ends the loop.
    pub transfer_retries: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            configuration: DEFAULT_CONFIGURATION,
            transfer_retries: 0,
        }
    }
}

/// A paired device: one open session, its sender, and at most one receive
/// loop.
///
/// Dropping a link closes its session.
pub struct Link<H: DeviceHandle> {
    session: Arc<DeviceSession<H>>,
    writer: FrameWriter<Arc<DeviceSession<H>>>,
    receiver: Option<JoinHandle<LoopExit>>,
    exit: Option<LoopExit>,
}

impl<H: DeviceHandle> Link<H> {
    /// Open `device` and, when a sink is given, start the receive loop on
    /// the current tokio runtime.
    pub fn open<D>(
        device: &D,
        config: LinkConfig,
        sink: Option<Arc<dyn MessageSink>>,
    ) -> Result<Self>
    where
        D: UsbDevice<Handle = H>,
    {
        let runtime = match sink {
            Some(_) => Some(Handle::try_current().map_err(|_| LinkError::NoRuntime)?),
            None => None,
        };

        let session = Arc::new(DeviceSession::open_with_configuration(
            device,
            config.configuration,
        )?);
        let writer = FrameWriter::with_config(Arc::clone(&session), config.frame.clone());

        let receiver = match (runtime, sink) {
            (Some(runtime), Some(sink)) => {
                let reader = FrameReader::with_config(Arc::clone(&session), config.frame);
                debug!(device = session.device(), "starting receive loop");
                Some(runtime.spawn(receive_loop(reader, sink, config.transfer_retries)))
            }
            _ => None,
        };

        Ok(Self {
            session,
            writer,
            receiver,
            exit: None,
        })
    }

    /// Send one message. Returns once the outbound transfer completed.
    pub async fn send(&self, message: &str) -> Result<()> {
        self.writer.send(message).await?;
        Ok(())
    }

    /// Close the session. The receive loop stops at its next check; a read
    /// already in flight finishes on its own and its result is discarded.
    pub fn close(&self) -> Result<()> {
        self.session.close()?;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    /// True while the receive loop task is running.
    pub fn is_receiving(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the receive loop to stop.
    ///
    /// Returns `None` when the link was opened without a sink. Cancel safe.
    pub async fn wait(&mut self) -> Option<LoopExit> {
        if let Some(handle) = self.receiver.as_mut() {
            let exit = match handle.await {
                Ok(exit) => exit,
                Err(err) => {
                    error!(error = %err, "receive loop task aborted");
                    LoopExit::Failed
                }
            };
            self.receiver = None;
            self.exit = Some(exit);
        }
        self.exit
    }

    pub fn session(&self) -> &DeviceSession<H> {
        &self.session
    }
}

impl<H: DeviceHandle> Drop for Link<H> {
    fn drop(&mut self) {
        if self.session.is_open() {
            if let Err(err) = self.session.close() {
                debug!(error = %err, "close on drop failed");
            }
        }
    }
}

impl<H: DeviceHandle> std::fmt::Debug for Link<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("session", &self.session)
            .field("receiving", &self.is_receiving())
            .finish()
    }
}

/// Read chunks one at a time and hand every frame to `sink` until the
/// session closes or transfers keep failing.
async fn receive_loop<H: DeviceHandle>(
    mut reader: FrameReader<Arc<DeviceSession<H>>>,
    sink: Arc<dyn MessageSink>,
    retries: u32,
) -> LoopExit {
    let session = Arc::clone(reader.get_ref());
    let mut failures = 0u32;

    let exit = loop {
        if !session.is_open() {
            break LoopExit::Closed;
        }

        let result = reader.read_once().await;

        // Closed while the transfer was in flight: drop whatever it produced.
        if !session.is_open() {
            trace!("discarding read completed after close");
            break LoopExit::Closed;
        }

        match result {
            Ok(Some(frame)) => {
                failures = 0;
                trace!(len = frame.payload.len(), "frame received");
                sink.on_message(frame.into_payload());
            }
            Ok(None) => failures = 0,
            Err(FrameError::Transport(TransportError::Closed)) => break LoopExit::Closed,
            Err(err) if err.is_recoverable() => {
                failures = 0;
                warn!(error = %err, "inbound frame discarded");
                sink.on_error(&err.into());
            }
            Err(err) => {
                failures += 1;
                if failures <= retries {
                    warn!(
                        error = %err,
                        attempt = failures,
                        retries,
                        "inbound transfer failed, retrying"
                    );
                    continue;
                }
                error!(error = %err, device = session.device(), "receive loop stopped");
                sink.on_error(&err.into());
                break LoopExit::Failed;
            }
        }
    };

    info!(device = session.device(), exit = ?exit, "receive loop finished");
    sink.on_closed(exit);
    exit
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;
    use usbline_frame::UnterminatedPolicy;
    use usbline_transport::mock::{MockDevice, MockHandle};
    use usbline_transport::{EndpointInfo, InterfaceInfo, CHUNK_SIZE};

    use super::*;
    use crate::sink::{ChannelSink, LinkEvent};

    const WAIT: Duration = Duration::from_secs(2);

    fn chunk(header: u8, payload: &str) -> Vec<u8> {
        let mut chunk = vec![header];
        chunk.extend_from_slice(payload.as_bytes());
        chunk.push(b'\n');
        chunk.resize(CHUNK_SIZE, 0);
        chunk
    }

    fn open_receiving(
        device: &MockDevice,
        config: LinkConfig,
    ) -> (Link<MockHandle>, UnboundedReceiver<LinkEvent>) {
        let (sink, rx) = ChannelSink::new();
        let link = Link::open(device, config, Some(Arc::new(sink))).unwrap();
        (link, rx)
    }

    async fn next_event(rx: &mut UnboundedReceiver<LinkEvent>) -> LinkEvent {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    async fn settle() {
        // Let the loop drain what was queued so far.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn delivers_decoded_message() {
        let (device, control) = MockDevice::new();
        let (link, mut rx) = open_receiving(&device, LinkConfig::default());

        control.push_chunk(&chunk(0x01, "hi"));

        assert_eq!(next_event(&mut rx).await, LinkEvent::Message("hi".into()));
        assert!(link.is_receiving());
        assert_eq!(link.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn empty_chunks_produce_nothing_and_keep_loop_running() {
        let (device, control) = MockDevice::new();
        let (link, mut rx) = open_receiving(&device, LinkConfig::default());

        control.push_chunk(&[]);
        control.push_chunk(&[]);
        control.push_chunk(&chunk(0x01, "ok"));

        assert_eq!(next_event(&mut rx).await, LinkEvent::Message("ok".into()));
        settle().await;
        assert!(rx.try_recv().is_err());
        assert!(link.is_receiving());
    }

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let (device, control) = MockDevice::new();
        let (_link, mut rx) = open_receiving(&device, LinkConfig::default());

        for msg in ["one", "two", "three"] {
            control.push_chunk(&chunk(0x01, msg));
        }

        for msg in ["one", "two", "three"] {
            assert_eq!(next_event(&mut rx).await, LinkEvent::Message(msg.into()));
        }
    }

    #[tokio::test]
    async fn no_delivery_after_close() {
        let (device, control) = MockDevice::new();
        let (mut link, mut rx) = open_receiving(&device, LinkConfig::default());

        control.push_chunk(&chunk(0x01, "before"));
        assert_eq!(next_event(&mut rx).await, LinkEvent::Message("before".into()));

        // The loop is now parked in a read; closing cancels it.
        link.close().unwrap();
        control.push_chunk(&chunk(0x01, "after"));

        assert_eq!(timeout(WAIT, link.wait()).await.unwrap(), Some(LoopExit::Closed));
        assert!(control.is_released());
        assert_eq!(next_event(&mut rx).await, LinkEvent::Closed(LoopExit::Closed));
        assert!(rx.try_recv().is_err());
        assert!(!link.is_receiving());
        assert_eq!(link.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn transfer_failure_stops_loop_and_notifies_sink() {
        let (device, control) = MockDevice::new();
        let (mut link, mut rx) = open_receiving(&device, LinkConfig::default());

        control.push_error(ErrorKind::BrokenPipe);

        assert!(matches!(next_event(&mut rx).await, LinkEvent::Error(_)));
        assert_eq!(next_event(&mut rx).await, LinkEvent::Closed(LoopExit::Failed));
        assert_eq!(timeout(WAIT, link.wait()).await.unwrap(), Some(LoopExit::Failed));
        assert!(!link.is_receiving());
        // Sending still works; only the receive side gave up.
        assert!(link.is_open());
        link.send("still here").await.unwrap();
    }

    #[tokio::test]
    async fn transfer_failures_retried_up_to_limit() {
        let (device, control) = MockDevice::new();
        let config = LinkConfig {
            transfer_retries: 2,
            ..LinkConfig::default()
        };
        let (mut link, mut rx) = open_receiving(&device, config);

        control.push_error(ErrorKind::TimedOut);
        control.push_error(ErrorKind::TimedOut);
        control.push_chunk(&chunk(0x01, "recovered"));
        assert_eq!(next_event(&mut rx).await, LinkEvent::Message("recovered".into()));

        for _ in 0..3 {
            control.push_error(ErrorKind::TimedOut);
        }
        assert!(matches!(next_event(&mut rx).await, LinkEvent::Error(_)));
        assert_eq!(timeout(WAIT, link.wait()).await.unwrap(), Some(LoopExit::Failed));
    }

    #[tokio::test]
    async fn unterminated_chunk_reported_and_loop_continues() {
        let (device, control) = MockDevice::new();
        let config = LinkConfig {
            frame: FrameConfig {
                unterminated: UnterminatedPolicy::Error,
                ..FrameConfig::default()
            },
            ..LinkConfig::default()
        };
        let (link, mut rx) = open_receiving(&device, config);

        control.push_chunk(b"\x01no terminator");
        control.push_chunk(&chunk(0x01, "fine"));

        assert!(matches!(next_event(&mut rx).await, LinkEvent::Error(_)));
        assert_eq!(next_event(&mut rx).await, LinkEvent::Message("fine".into()));
        assert!(link.is_receiving());
    }

    #[tokio::test]
    async fn binds_second_interface_when_first_claim_fails() {
        let interfaces = vec![
            InterfaceInfo {
                number: 0,
                alternate: 0,
                endpoints: vec![EndpointInfo::bulk(0x81), EndpointInfo::bulk(0x01)],
            },
            InterfaceInfo {
                number: 1,
                alternate: 0,
                endpoints: vec![EndpointInfo::bulk(0x82), EndpointInfo::bulk(0x02)],
            },
        ];
        let (device, control) = MockDevice::new();
        let device = device.with_interfaces(interfaces).failing_claim(0);
        let (link, mut rx) = open_receiving(&device, LinkConfig::default());

        assert_eq!(control.claimed_interface(), Some(1));
        assert_eq!(link.session().endpoint_in(), 0x82);
        assert_eq!(link.session().endpoint_out(), 0x02);

        control.push_chunk(&chunk(0x01, "second"));
        assert_eq!(next_event(&mut rx).await, LinkEvent::Message("second".into()));
    }

    #[tokio::test]
    async fn send_writes_padded_chunk() {
        let (device, control) = MockDevice::new();
        let link = Link::open(&device, LinkConfig::default(), None).unwrap();

        link.send("go").await.unwrap();

        let written = control.written();
        assert_eq!(written.len(), 1);
        let mut expected = b"go\n".to_vec();
        expected.resize(CHUNK_SIZE, 0);
        assert_eq!(written[0].as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn send_without_sink_has_no_loop() {
        let (device, _control) = MockDevice::new();
        let mut link = Link::open(&device, LinkConfig::default(), None).unwrap();

        assert!(!link.is_receiving());
        assert_eq!(link.wait().await, None);
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let (device, _control) = MockDevice::new();
        let link = Link::open(&device, LinkConfig::default(), None).unwrap();
        link.close().unwrap();

        let err = link.send("late").await.unwrap_err();
        assert!(err.is_closed());

        let err = link.close().unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn configured_configuration_is_selected() {
        let (device, control) = MockDevice::new();
        let config = LinkConfig {
            configuration: 2,
            ..LinkConfig::default()
        };
        let _link = Link::open(&device, config, None).unwrap();
        assert_eq!(control.selected_configuration(), Some(2));
    }

    #[tokio::test]
    async fn failed_open_propagates() {
        let (device, _control) = MockDevice::new();
        let device = device.failing_open();
        let err = Link::open(&device, LinkConfig::default(), None).unwrap_err();
        assert!(matches!(err, LinkError::Transport(TransportError::Open { .. })));
    }

    #[test]
    fn receiving_link_requires_runtime() {
        let (device, control) = MockDevice::new();
        let sink: Arc<dyn MessageSink> = Arc::new(|_msg: String| {});

        let err = Link::open(&device, LinkConfig::default(), Some(sink)).unwrap_err();

        assert!(matches!(err, LinkError::NoRuntime));
        assert!(!control.is_opened());
    }

    #[tokio::test]
    async fn drop_closes_session() {
        let (device, control) = MockDevice::new();
        let link = Link::open(&device, LinkConfig::default(), None).unwrap();
        drop(link);
        assert!(control.is_released());
    }
}
