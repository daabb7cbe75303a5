use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use usbline_frame::FrameError;
use usbline_link::{disconnect, pair, ChannelSink, Link, LinkError, LinkEvent, LoopExit};
use usbline_transport::{DeviceHandle, DeviceProvider};

use crate::cmd::{interrupted, ConsoleArgs};
use crate::exit::{link_error, CliError, CliResult, FAILURE, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_message, OutputFormat};

pub async fn run<P: DeviceProvider>(
    provider: &P,
    args: ConsoleArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let (sink, events) = ChannelSink::new();
    let link = pair(
        provider,
        &args.device.filter(),
        args.link.config(),
        Some(Arc::new(sink)),
    )
    .await
    .map_err(|err| link_error("pair failed", err))?;
    info!(device = link.session().device(), "console open, Ctrl-D to disconnect");

    let input = BufReader::new(tokio::io::stdin()).lines();
    let result = converse(&link, input, events, format, interrupted()).await;

    disconnect(link)
        .await
        .map_err(|err| link_error("disconnect failed", err))?;
    result
}

/// Forward input lines to the device and print its messages until input
/// ends, the receive loop stops, or `shutdown` resolves.
async fn converse<H, R>(
    link: &Link<H>,
    mut input: Lines<R>,
    mut events: UnboundedReceiver<LinkEvent>,
    format: OutputFormat,
    shutdown: impl Future<Output = ()>,
) -> CliResult<i32>
where
    H: DeviceHandle,
    R: AsyncBufRead + Unpin,
{
    tokio::pin!(shutdown);
    let device = link.session().device().to_string();

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(SUCCESS),
            line = input.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim_end_matches('\r');
                    match link.send(line).await {
                        Ok(()) => {}
                        Err(LinkError::Frame(err)) if !matches!(err, FrameError::Transport(_)) => {
                            warn!(error = %err, "line not sent");
                        }
                        Err(err) => return Err(link_error("send failed", err)),
                    }
                }
                Ok(None) => return Ok(SUCCESS),
                Err(err) => {
                    return Err(CliError::new(FAILURE, format!("reading input failed: {err}")))
                }
            },
            event = events.recv() => match event {
                Some(LinkEvent::Message(message)) => print_message(&message, &device, format),
                Some(LinkEvent::Error(err)) => warn!(error = %err, "receive error"),
                Some(LinkEvent::Closed(LoopExit::Failed)) => {
                    return Err(CliError::new(TRANSPORT_ERROR, "receive failed"))
                }
                Some(LinkEvent::Closed(LoopExit::Closed)) | None => return Ok(SUCCESS),
            },
        }
    }
}
