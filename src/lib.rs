//! Rust library for controlling Marantz and Denon networked AV receivers
//!
//! This library provides an async API for discovering receivers on the local
//! network and controlling them over their line-based telnet protocol. It
//! supports:
//!
//! - Discovery via SSDP multicast and UPnP device descriptions
//! - Power, mute and volume control for the main zone and zones 2 and 3
//! - Source, surround mode, picture mode and eco mode selection
//! - Per-channel level (bias) adjustment
//! - Real-time status change notifications
//!
//! # Quick Start
//!
//! ```no_run
//! use madeavr::{scan_devices, Avr, ScanConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let devices = scan_devices(&ScanConfig::default()).await?;
//!
//!     if let Some(device) = devices.first() {
//!         println!("Found {} at {}", device.name, device.ip);
//!
//!         let avr = Avr::connect(&device.name, &device.ip, 23).await?;
//!         let mut updates = avr.subscribe();
//!
//!         avr.turn_on();
//!         avr.set_volume(40.0);
//!
//!         while let Ok(update) = updates.recv().await {
//!             println!("{} = {}", update.label, update.value);
//!             break; // Just show one update
//!         }
//!
//!         avr.close();
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Discovery**: one-shot SSDP scan plus device-description fetch
//! - **Registry**: serial number to session mapping
//! - **Avr**: high-level control API for one receiver
//! - **Connection**: writer and reader tasks over the TCP stream
//! - **Status**: label to value map derived from inbound lines
//! - **Protocol**: command codes, value tables and wire encoding

mod avr;
mod connection;
mod discovery;
mod error;
pub mod protocol;
mod registry;
mod status;
mod subscription;
mod types;

// Public exports
pub use avr::{Avr, ConnectConfig, DEFAULT_PORT};
pub use discovery::{scan, scan_devices, ScanConfig, DEVICE_SIGNATURE, MULTICAST6_ADDR, MULTICAST_ADDR};
pub use error::{AvrError, Result};
pub use registry::Registry;
pub use status::{StatusModel, DEFAULT_MAX_VOLUME};
pub use subscription::{Listener, StatusReceiver, StatusUpdate};
pub use types::{
    ChannelLevels, DiscoveredDevice, Label, StatusValue, ValueSpace, Zone, AUDIO_INPUTS, CHANNELS,
    ECO_MODES, INPUT_SOURCES, PICTURE_MODES, POWER, SURROUND_MODES,
};
