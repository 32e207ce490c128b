//! Transport abstraction over the three physical channels.
//!
//! The downloader only ever sees the four-operation capability set below;
//! whether bytes travel over a raw serial line or are tunneled through the
//! bridge MCU's 64-byte frames is decided once, at open time.
//!
//! ```text
//! +-------------------+   +-------------------+   +-------------------+
//! |  Protocol layers  |   |  Protocol layers  |   |  Protocol layers  |
//! |  (hci, mp, ...)   |   |  (hci, mp, ...)   |   |  (hci, mp, ...)   |
//! +---------+---------+   +---------+---------+   +---------+---------+
//!           |                       |                       |
//!           v                       v                       v
//! +---------+---------+   +---------+---------+   +---------+---------+
//! |  Transport trait  |   |  Transport trait  |   |  Transport trait  |
//! +---------+---------+   +---------+---------+   +---------+---------+
//!           |                       |                       |
//!           v                       v                       v
//! +---------+---------+   +---------+---------+   +---------+---------+
//! |  SerialTransport  |   |   McuTransport    |   |   McuTransport    |
//! |   (serialport)    |   |  over UsbBulk-    |   |  over HidReport-  |
//! |                   |   |  Device (rusb)    |   |  Device (hidapi)  |
//! +-------------------+   +-------------------+   +-------------------+
//! ```

pub mod hid;
pub mod mcu;
pub mod serial;
pub mod usb;

use crate::error::Result;

/// Capability set shared by every channel a download can run over.
///
/// A handle has exactly one owner; protocol layers borrow it for the
/// duration of a request/response exchange and never interleave operations.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` means no data arrived within
    /// the channel's timeout window; callers decide whether to retry.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf`, returning how many bytes the channel accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Reconfigure the channel's line rate in place, without reopening.
    fn set_baudrate(&mut self, baud: u32) -> Result<()>;

    /// Release the underlying device. MCU-framed channels terminate their
    /// session first.
    fn close(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn set_baudrate(&mut self, baud: u32) -> Result<()> {
        (**self).set_baudrate(baud)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Parameters for opening a transport, keyed by interface kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportParams {
    /// Raw serial line.
    Serial {
        /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
        tty: String,
        /// Initial baud rate.
        baud: u32,
    },
    /// USB interrupt endpoints through the bridge MCU.
    UsbBulk {
        /// USB vendor id.
        vid: u16,
        /// USB product id.
        pid: u16,
        /// Interface number to claim.
        iface: u8,
        /// Detach a bound kernel driver before claiming.
        auto_detach: bool,
    },
    /// HID reports through the bridge MCU.
    Hid {
        /// USB vendor id.
        vid: u16,
        /// USB product id.
        pid: u16,
    },
}

/// Open the transport described by `params`.
pub fn open_transport(params: &TransportParams) -> Result<Box<dyn Transport>> {
    match params {
        TransportParams::Serial { tty, baud } => {
            Ok(Box::new(serial::SerialTransport::open(tty, *baud)?))
        },
        TransportParams::UsbBulk {
            vid,
            pid,
            iface,
            auto_detach,
        } => Ok(Box::new(usb::open(*vid, *pid, *iface, *auto_detach)?)),
        TransportParams::Hid { vid, pid } => Ok(Box::new(hid::open(*vid, *pid)?)),
    }
}

/// Empty reads tolerated by [`read_fully`] before giving up.
const READ_RETRIES: u32 = 3;

/// Fill `buf`, tolerating a bounded number of empty reads.
///
/// Returns how many bytes were actually placed in `buf`; a short count means
/// the retry budget ran out, not that the stream is intact.
pub(crate) fn read_fully<T: Transport + ?Sized>(transport: &mut T, buf: &mut [u8]) -> Result<usize> {
    let mut got = 0;
    let mut retries = READ_RETRIES;

    while got < buf.len() {
        let n = transport.read(&mut buf[got..])?;
        if n == 0 {
            if retries == 0 {
                return Ok(got);
            }
            retries -= 1;
        }
        got += n;
    }

    Ok(got)
}
