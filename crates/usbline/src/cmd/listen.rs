use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use usbline_link::{disconnect, pair, ChannelSink, LinkEvent, LoopExit};
use usbline_transport::DeviceProvider;

use crate::cmd::{interrupted, ListenArgs};
use crate::exit::{link_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_message, OutputFormat};

pub async fn run<P: DeviceProvider>(
    provider: &P,
    args: ListenArgs,
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

    let device = link.session().device().to_string();
    info!(device = %device, "listening");

    let result = print_events(events, &device, args.count, format, interrupted()).await;
    disconnect(link)
        .await
        .map_err(|err| link_error("disconnect failed", err))?;
    result
}

async fn print_events(
    mut events: UnboundedReceiver<LinkEvent>,
    device: &str,
    count: Option<usize>,
    format: OutputFormat,
    shutdown: impl Future<Output = ()>,
) -> CliResult<i32> {
    tokio::pin!(shutdown);
    let mut printed = 0usize;
    let mut last_error = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(SUCCESS),
            event = events.recv() => match event {
                Some(LinkEvent::Message(message)) => {
                    print_message(&message, device, format);
                    printed = printed.saturating_add(1);
                    if count.is_some_and(|count| printed >= count) {
                        return Ok(SUCCESS);
                    }
                }
                Some(LinkEvent::Error(err)) => {
                    warn!(error = %err, "receive error");
                    last_error = Some(err);
                }
                Some(LinkEvent::Closed(LoopExit::Failed)) => {
                    let reason = last_error.unwrap_or_else(|| "unknown error".to_string());
                    return Err(CliError::new(
                        TRANSPORT_ERROR,
                        format!("receive failed: {reason}"),
                    ));
                }
                Some(LinkEvent::Closed(LoopExit::Closed)) | None => return Ok(SUCCESS),
            },
        }
    }
}
