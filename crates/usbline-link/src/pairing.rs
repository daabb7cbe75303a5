use std::sync::Arc;

use tracing::info;
use usbline_transport::{select_device, DeviceFilter, DeviceHandle, DeviceProvider, UsbDevice};

use crate::error::Result;
use crate::link::{Link, LinkConfig};
use crate::sink::MessageSink;

type HandleOf<P> = <<P as DeviceProvider>::Device as UsbDevice>::Handle;

/// Pair with the first attached device matching `filter` and start
/// receiving into `sink`.
///
/// Setup failures (no device, nothing claimable, missing endpoints) are
/// returned; nothing is retried.
pub async fn pair<P>(
    provider: &P,
    filter: &DeviceFilter,
    config: LinkConfig,
    sink: Option<Arc<dyn MessageSink>>,
) -> Result<Link<HandleOf<P>>>
where
    P: DeviceProvider,
{
    let device = select_device(provider, filter)?;
    info!(device = %device.identity(), "pairing with device");
    Link::open(&device, config, sink)
}

/// Close a paired link and wait for its receive loop to stop.
///
/// Closing cancels the loop's pending transfer, so the device is fully
/// released once this returns.
pub async fn disconnect<H: DeviceHandle>(mut link: Link<H>) -> Result<()> {
    link.close()?;
    let exit = link.wait().await;
    info!(device = link.session().device(), exit = ?exit, "disconnected");
    Ok(())
}
