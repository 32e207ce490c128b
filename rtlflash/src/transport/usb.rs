//! USB-bulk MCU channel backed by `rusb`.
//!
//! The bridge MCU shows up as a vendor interface with one interrupt IN and
//! one interrupt OUT endpoint; frames travel as single interrupt transfers.

use {
    crate::{
        error::{Error, Result},
        transport::mcu::{McuDevice, McuTransport},
    },
    log::{debug, warn},
    rusb::{DeviceHandle, GlobalContext},
    std::{
        thread,
        time::{Duration, Instant},
    },
};

/// Per-transfer timeout.
const TRANSFER_TIMEOUT: Duration = Duration::from_millis(2000);

/// How long to wait for the device to enumerate.
const ARRIVAL_WAIT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for enumeration.
const ARRIVAL_POLL: Duration = Duration::from_millis(500);

/// Claimed USB device exposing the MCU frame endpoints.
pub struct UsbBulkDevice {
    handle: DeviceHandle<GlobalContext>,
    iface: u8,
}

impl UsbBulkDevice {
    /// Wait for `vid:pid` to enumerate and claim `iface`.
    ///
    /// The device is often still re-enumerating when the tool starts (it has
    /// just been plugged in or rebooted), so absence is polled for a bounded
    /// window before giving up with [`Error::DeviceNotFound`].
    pub fn open(vid: u16, pid: u16, iface: u8, auto_detach: bool) -> Result<Self> {
        let deadline = Instant::now() + ARRIVAL_WAIT;
        let mut handle = loop {
            match rusb::open_device_with_vid_pid(vid, pid) {
                Some(handle) => break handle,
                None if Instant::now() < deadline => thread::sleep(ARRIVAL_POLL),
                None => {
                    warn!("no USB device {vid:04x}:{pid:04x}");
                    return Err(Error::DeviceNotFound);
                },
            }
        };

        if auto_detach {
            // Unsupported on some platforms; claim_interface will surface
            // the conflict if it mattered.
            if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
                debug!("auto-detach kernel driver: {e}");
            }
        }

        handle.claim_interface(iface)?;
        debug!("claimed {vid:04x}:{pid:04x} interface {iface}");

        Ok(Self { handle, iface })
    }
}

impl McuDevice for UsbBulkDevice {
    fn read_report(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize> {
        Ok(self.handle.read_interrupt(endpoint, buf, TRANSFER_TIMEOUT)?)
    }

    fn write_report(&mut self, endpoint: u8, buf: &[u8]) -> Result<usize> {
        Ok(self.handle.write_interrupt(endpoint, buf, TRANSFER_TIMEOUT)?)
    }

    fn close(&mut self) {
        if let Err(e) = self.handle.release_interface(self.iface) {
            warn!("release interface {}: {e}", self.iface);
        }
    }
}

/// Open the USB-bulk transport: claim the device, then start an MCU session
/// on it.
pub fn open(
    vid: u16,
    pid: u16,
    iface: u8,
    auto_detach: bool,
) -> Result<McuTransport<UsbBulkDevice>> {
    McuTransport::open(UsbBulkDevice::open(vid, pid, iface, auto_detach)?)
}
