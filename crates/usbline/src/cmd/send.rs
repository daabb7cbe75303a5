use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;
use usbline_frame::encode_chunk;
use usbline_link::{disconnect, pair, ChannelSink, LinkEvent, MessageSink};
use usbline_transport::DeviceProvider;

use crate::cmd::SendArgs;
use crate::exit::{
    frame_error, link_error, CliError, CliResult, SUCCESS, TIMEOUT, TRANSPORT_ERROR, USAGE,
};
use crate::output::{print_message, OutputFormat};

pub async fn run<P: DeviceProvider>(
    provider: &P,
    args: SendArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let config = args.link.config();

    // Reject what cannot be framed before touching the device.
    encode_chunk(&args.message, config.frame.outbound_header)
        .map_err(|err| frame_error("invalid message", err))?;

    let (sink, mut events) = ChannelSink::new();
    let sink: Option<Arc<dyn MessageSink>> = if args.wait {
        Some(Arc::new(sink))
    } else {
        None
    };

    let link = pair(provider, &args.device.filter(), config, sink)
        .await
        .map_err(|err| link_error("pair failed", err))?;

    link.send(&args.message)
        .await
        .map_err(|err| link_error("send failed", err))?;

    if args.wait {
        let reply = tokio::time::timeout(wait_timeout, wait_for_reply(&mut events))
            .await
            .map_err(|_| {
                CliError::new(
                    TIMEOUT,
                    format!("no reply within {}ms", wait_timeout.as_millis()),
                )
            })??;
        print_message(&reply, link.session().device(), format);
    }

    disconnect(link)
        .await
        .map_err(|err| link_error("disconnect failed", err))?;
    Ok(SUCCESS)
}

async fn wait_for_reply(events: &mut UnboundedReceiver<LinkEvent>) -> CliResult<String> {
    loop {
        match events.recv().await {
            Some(LinkEvent::Message(message)) => return Ok(message),
            Some(LinkEvent::Error(err)) => warn!(error = %err, "receive error"),
            Some(LinkEvent::Closed(_)) | None => {
                return Err(CliError::new(
                    TRANSPORT_ERROR,
                    "receive stopped before a reply arrived",
                ))
            }
        }
    }
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use usbline_transport::mock::{MockDevice, MockProvider};
    use usbline_transport::CHUNK_SIZE;

    use super::*;
    use crate::cmd::{DeviceArgs, LinkArgs, Unterminated};
    use crate::exit::{DATA_INVALID, DEVICE_UNAVAILABLE};

    fn args(message: &str, wait: bool, wait_timeout: &str) -> SendArgs {
        SendArgs {
            message: message.to_string(),
            device: DeviceArgs {
                class: usbline_transport::VENDOR_CLASS,
                subclass: usbline_transport::LINE_SUBCLASS,
                vid: None,
                pid: None,
                serial: None,
            },
            link: LinkArgs {
                unterminated: Unterminated::Drop,
                max_frame_size: usbline_frame::DEFAULT_MAX_FRAME_SIZE,
                header: None,
                retries: 0,
                configuration: usbline_transport::DEFAULT_CONFIGURATION,
            },
            wait,
            wait_timeout: wait_timeout.to_string(),
        }
    }

    #[tokio::test]
    async fn sends_one_padded_chunk() {
        let (device, control) = MockDevice::new();
        let provider = MockProvider::new(vec![device]);

        let code = run(&provider, args("go", false, "5s"), OutputFormat::Raw)
            .await
            .unwrap();

        assert_eq!(code, SUCCESS);
        let written = control.written();
        assert_eq!(written.len(), 1);
        assert_eq!(&written[0][..3], b"go\n");
        assert_eq!(written[0].len(), CHUNK_SIZE);
        assert!(control.is_released());
    }

    #[tokio::test]
    async fn waits_for_reply() {
        let (device, control) = MockDevice::new();
        let mut reply = b"\x01pong\n".to_vec();
        reply.resize(CHUNK_SIZE, 0);
        control.push_chunk(&reply);
        let provider = MockProvider::new(vec![device]);

        let code = run(&provider, args("ping", true, "2s"), OutputFormat::Raw)
            .await
            .unwrap();

        assert_eq!(code, SUCCESS);
        assert_eq!(&control.written()[0][..5], b"ping\n");
    }

    #[tokio::test]
    async fn wait_times_out_without_reply() {
        let (device, _control) = MockDevice::new();
        let provider = MockProvider::new(vec![device]);

        let err = run(&provider, args("ping", true, "50ms"), OutputFormat::Raw)
            .await
            .unwrap_err();

        assert_eq!(err.code, TIMEOUT);
    }

    #[tokio::test]
    async fn wait_fails_when_receive_stops() {
        let (device, control) = MockDevice::new();
        control.push_error(ErrorKind::BrokenPipe);
        let provider = MockProvider::new(vec![device]);

        let err = run(&provider, args("ping", true, "2s"), OutputFormat::Raw)
            .await
            .unwrap_err();

        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[tokio::test]
    async fn unframeable_message_never_opens_device() {
        let (device, control) = MockDevice::new();
        let provider = MockProvider::new(vec![device]);

        let err = run(&provider, args("a\nb", false, "5s"), OutputFormat::Raw)
            .await
            .unwrap_err();
        assert_eq!(err.code, DATA_INVALID);

        let err = run(&provider, args(&"x".repeat(64), false, "5s"), OutputFormat::Raw)
            .await
            .unwrap_err();
        assert_eq!(err.code, DATA_INVALID);

        assert!(!control.is_opened());
    }

    #[tokio::test]
    async fn missing_device_is_unavailable() {
        let err = run(&MockProvider::default(), args("go", false, "5s"), OutputFormat::Raw)
            .await
            .unwrap_err();
        assert_eq!(err.code, DEVICE_UNAVAILABLE);
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }
}
