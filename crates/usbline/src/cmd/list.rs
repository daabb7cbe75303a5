use usbline_transport::{DeviceIdentity, DeviceProvider, UsbDevice};

use crate::cmd::ListArgs;
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_devices, OutputFormat};

pub fn run<P: DeviceProvider>(provider: &P, args: ListArgs, format: OutputFormat) -> CliResult<i32> {
    let devices = matching(provider, &args)?;
    tracing::debug!(count = devices.len(), "devices listed");
    print_devices(&devices, format);
    Ok(SUCCESS)
}

fn matching<P: DeviceProvider>(provider: &P, args: &ListArgs) -> CliResult<Vec<DeviceIdentity>> {
    let filter = args.device.filter();
    let devices = provider
        .devices()
        .map_err(|err| transport_error("enumeration failed", err))?;

    Ok(devices
        .iter()
        .map(UsbDevice::identity)
        .filter(|identity| args.all || filter.matches(identity))
        .collect())
}
