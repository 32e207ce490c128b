//! Error types for rtlflash.

use std::io;
use thiserror::Error;

/// Result type for rtlflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rtlflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, closed handles).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// USB error.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// HID error.
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// No matching device was found, or it vanished before it could be
    /// claimed.
    #[error("Device not found")]
    DeviceNotFound,

    /// MCU frame checksum, length, or status mismatch.
    #[error("MCU framing error: {0}")]
    Framing(String),

    /// HCI or MP response did not correlate with the request.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A bounded wait ran out of attempts.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// CRC checksum mismatch.
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// CRC carried by the frame.
        expected: u16,
        /// CRC recomputed over the body.
        actual: u16,
    },

    /// Invalid flash image container.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// The chip itself reported a non-zero status code.
    #[error("Device reported status {status:#04x}")]
    DeviceStatus {
        /// Raw status byte from the response.
        status: u8,
    },

    /// A region download failed; carries the failing region's location.
    #[error("region at offset {offset:#x} (flash {addr:#010x}): {source}")]
    Region {
        /// File offset of the region.
        offset: u32,
        /// Resolved flash address of the region.
        addr: u32,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A download phase failed.
    #[error("{phase} failed: {source}")]
    Phase {
        /// The phase that failed.
        phase: crate::flasher::Phase,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Unsupported parameter or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}
