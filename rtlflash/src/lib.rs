//! # rtlflash
//!
//! A library for flashing Realtek Bluetooth chips.
//!
//! This crate provides the core functionality for reprogramming a Realtek
//! Bluetooth controller over serial, USB-bulk, or HID:
//!
//! - Transport abstraction over the three physical channels, with the
//!   USB/HID variants tunneled through the bridge MCU's 64-byte framing
//! - HCI vendor commands for the boot ROM (chip type, mode switches, raw
//!   firmware download)
//! - MP flash protocol (erase, write, read, verify, reset) with CRC-16/ARC
//!   framing
//! - Merged flash-image container parsing
//! - A download orchestrator tying the above into one sequence
//!
//! ## Example
//!
//! ```rust,no_run
//! use rtlflash::{ProgressCounter, TransportParams, open_transport};
//! use std::path::Path;
//!
//! fn main() -> rtlflash::Result<()> {
//!     let transport = open_transport(&TransportParams::Serial {
//!         tty: "/dev/ttyUSB0".into(),
//!         baud: 115200,
//!     })?;
//!
//!     let progress = ProgressCounter::new();
//!     rtlflash::download(
//!         transport,
//!         921600,
//!         Path::new("firmware0.bin"),
//!         Path::new("app.bin"),
//!         &progress,
//!     )
//! }
//! ```
//!
//! A UI can clone the [`ProgressCounter`] and poll it from another thread
//! while `download` runs; every update is a single atomic store.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod flasher;
pub mod image;
pub mod progress;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use {
    error::{Error, Result},
    flasher::{Downloader, Phase, download},
    image::merged::{DownloadRegion, ImageHeader, MergedImage, RegionHeader},
    progress::ProgressCounter,
    protocol::{HciHost, MpLink, crc16_arc},
    transport::{Transport, TransportParams, open_transport},
};
