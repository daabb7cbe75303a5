use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use usbline_transport::DeviceIdentity;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    device: &'a str,
    payload_size: usize,
    payload: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct DeviceOutput<'a> {
    vendor_id: String,
    product_id: String,
    class: u8,
    subclass: u8,
    serial: Option<&'a str>,
    product: Option<&'a str>,
}

impl<'a> From<&'a DeviceIdentity> for DeviceOutput<'a> {
    fn from(identity: &'a DeviceIdentity) -> Self {
        Self {
            vendor_id: format!("{:04x}", identity.vendor_id),
            product_id: format!("{:04x}", identity.product_id),
            class: identity.class,
            subclass: identity.subclass,
            serial: identity.serial.as_deref(),
            product: identity.product.as_deref(),
        }
    }
}

pub fn print_message(message: &str, device: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                device,
                payload_size: message.len(),
                payload: message,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DEVICE", "SIZE", "MESSAGE"])
                .add_row(vec![
                    device.to_string(),
                    message.len().to_string(),
                    message.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{device} < {message}");
        }
        OutputFormat::Raw => {
            print_raw(message);
        }
    }
}

pub fn print_devices(devices: &[DeviceIdentity], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<DeviceOutput<'_>> = devices.iter().map(DeviceOutput::from).collect();
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["VID", "PID", "CLASS", "SUBCLASS", "SERIAL", "PRODUCT"]);
            for identity in devices {
                table.add_row(vec![
                    format!("{:04x}", identity.vendor_id),
                    format!("{:04x}", identity.product_id),
                    identity.class.to_string(),
                    identity.subclass.to_string(),
                    identity.serial.clone().unwrap_or_default(),
                    identity.product.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for identity in devices {
                match &identity.product {
                    Some(product) => println!("{identity} {product}"),
                    None => println!("{identity}"),
                }
            }
        }
    }
}

/// Write one message followed by a line-feed, flushing immediately.
pub fn print_raw(message: &str) {
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(message.as_bytes());
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_output_uses_hex_ids() {
        let identity = DeviceIdentity {
            vendor_id: 0x239a,
            product_id: 0x8018,
            class: 255,
            subclass: 42,
            serial: Some("ABC".into()),
            product: None,
            interfaces: Vec::new(),
        };
        let json = serde_json::to_value(DeviceOutput::from(&identity)).unwrap();
        assert_eq!(json["vendor_id"], "239a");
        assert_eq!(json["product_id"], "8018");
        assert_eq!(json["serial"], "ABC");
        assert!(json["product"].is_null());
    }
}
