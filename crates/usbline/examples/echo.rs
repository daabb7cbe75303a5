//! Pair with the first compatible device and echo every message back to it.
//!
//! Run with: cargo run -p usbline --example echo

use std::sync::Arc;

use usbline::link::{disconnect, pair, ChannelSink, LinkConfig, LinkEvent};
use usbline::transport::{DeviceFilter, NusbProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (sink, mut events) = ChannelSink::new();
    let link = pair(
        &NusbProvider,
        &DeviceFilter::default(),
        LinkConfig::default(),
        Some(Arc::new(sink)),
    )
    .await?;
    println!("paired with {}", link.session().device());

    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Message(message) => {
                println!("< {message}");
                link.send(&message).await?;
            }
            LinkEvent::Error(err) => eprintln!("receive error: {err}"),
            LinkEvent::Closed(exit) => {
                println!("receive loop finished: {exit:?}");
                break;
            }
        }
    }

    disconnect(link).await?;
    Ok(())
}
