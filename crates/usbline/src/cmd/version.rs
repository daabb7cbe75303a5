use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("usbline {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: usbline");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("USBLINE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: link={}, nusb={}, mock={}, cli=true",
        cfg!(feature = "link"),
        cfg!(feature = "nusb"),
        cfg!(feature = "mock")
    );
    println!(
        "device filter: class={} subclass={}",
        usbline_transport::VENDOR_CLASS,
        usbline_transport::LINE_SUBCLASS
    );

    Ok(SUCCESS)
}
