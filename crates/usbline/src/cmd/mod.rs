use clap::{Args, Subcommand, ValueEnum};
use usbline_frame::{FrameConfig, UnterminatedPolicy, DEFAULT_MAX_FRAME_SIZE};
use usbline_link::LinkConfig;
use usbline_transport::{
    DeviceFilter, NusbProvider, DEFAULT_CONFIGURATION, LINE_SUBCLASS, VENDOR_CLASS,
};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod console;
pub mod list;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List attached devices matching the filter.
    List(ListArgs),
    /// Pair with a device and print received messages.
    Listen(ListenArgs),
    /// Send a single message.
    Send(SendArgs),
    /// Interactive session: stdin lines are sent, received messages printed.
    Console(ConsoleArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    let provider = NusbProvider;
    match command {
        Command::List(args) => list::run(&provider, args, format),
        Command::Listen(args) => listen::run(&provider, args, format).await,
        Command::Send(args) => send::run(&provider, args, format).await,
        Command::Console(args) => console::run(&provider, args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Resolves on Ctrl-C. Never resolves when the handler cannot be installed.
pub(crate) async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "signal handler setup failed");
        std::future::pending::<()>().await;
    }
    tracing::info!("interrupted");
}

/// Which device to pair with.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Device class to match.
    #[arg(long, default_value_t = VENDOR_CLASS, env = "USBLINE_CLASS")]
    pub class: u8,
    /// Device subclass to match.
    #[arg(long, default_value_t = LINE_SUBCLASS, env = "USBLINE_SUBCLASS")]
    pub subclass: u8,
    /// Vendor id in hex (e.g. 239a).
    #[arg(long, value_parser = parse_usb_id, env = "USBLINE_VID")]
    pub vid: Option<u16>,
    /// Product id in hex.
    #[arg(long, value_parser = parse_usb_id, env = "USBLINE_PID")]
    pub pid: Option<u16>,
    /// Serial number to match.
    #[arg(long, env = "USBLINE_SERIAL")]
    pub serial: Option<String>,
}

impl DeviceArgs {
    pub fn filter(&self) -> DeviceFilter {
        DeviceFilter {
            class: self.class,
            subclass: self.subclass,
            vendor_id: self.vid,
            product_id: self.pid,
            serial: self.serial.clone(),
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Unterminated {
    /// Log and discard the chunk.
    Drop,
    /// Continue the message with the following chunks.
    Buffer,
    /// Report an error and continue.
    Error,
}

impl From<Unterminated> for UnterminatedPolicy {
    fn from(value: Unterminated) -> Self {
        match value {
            Unterminated::Drop => UnterminatedPolicy::Drop,
            Unterminated::Buffer => UnterminatedPolicy::Buffer,
            Unterminated::Error => UnterminatedPolicy::Error,
        }
    }
}

/// Session and codec tuning.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Handling of inbound chunks without a line-feed.
    #[arg(long, value_enum, default_value = "drop", env = "USBLINE_UNTERMINATED")]
    pub unterminated: Unterminated,
    /// Largest message reassembled with `--unterminated buffer`.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE, env = "USBLINE_MAX_FRAME_SIZE")]
    pub max_frame_size: usize,
    /// Header byte to prepend to outbound messages (e.g. 0x01).
    #[arg(long, value_parser = parse_byte, env = "USBLINE_OUTBOUND_HEADER")]
    pub header: Option<u8>,
    /// Consecutive inbound transfer failures tolerated.
    #[arg(long, default_value_t = 0, env = "USBLINE_TRANSFER_RETRIES")]
    pub retries: u32,
    /// USB configuration value to select.
    #[arg(long, default_value_t = DEFAULT_CONFIGURATION, env = "USBLINE_CONFIGURATION")]
    pub configuration: u8,
}

impl LinkArgs {
    pub fn config(&self) -> LinkConfig {
        LinkConfig {
            frame: FrameConfig {
                unterminated: self.unterminated.into(),
                max_frame_size: self.max_frame_size,
                outbound_header: self.header,
            },
            configuration: self.configuration,
            transfer_retries: self.retries,
        }
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Show every attached device, ignoring the filter.
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    #[command(flatten)]
    pub link: LinkArgs,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Message text, without the trailing line-feed.
    pub message: String,
    #[command(flatten)]
    pub device: DeviceArgs,
    #[command(flatten)]
    pub link: LinkArgs,
    /// Wait for one reply message and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for a reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ConsoleArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Hex USB id, with or without a `0x` prefix.
fn parse_usb_id(input: &str) -> Result<u16, String> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    u16::from_str_radix(digits, 16).map_err(|err| format!("invalid USB id {input:?}: {err}"))
}

/// Byte value: `0x`-prefixed hex or decimal.
fn parse_byte(input: &str) -> Result<u8, String> {
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|err| format!("invalid byte value {input:?}: {err}"))
}
