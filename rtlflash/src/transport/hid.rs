//! HID MCU channel backed by `hidapi`.

use {
    crate::{
        error::{Error, Result},
        transport::mcu::{McuDevice, McuTransport},
    },
    hidapi::HidApi,
    log::debug,
};

/// Per-read timeout in milliseconds.
const READ_TIMEOUT_MS: i32 = 2000;

/// Open HID device exposing the MCU frame channel.
pub struct HidReportDevice {
    dev: hidapi::HidDevice,
}

impl HidReportDevice {
    /// Open the first HID device matching `vid:pid`.
    pub fn open(vid: u16, pid: u16) -> Result<Self> {
        let api = HidApi::new()?;
        let dev = api.open(vid, pid).map_err(|e| {
            debug!("hid open {vid:04x}:{pid:04x}: {e}");
            Error::DeviceNotFound
        })?;
        Ok(Self { dev })
    }
}

impl McuDevice for HidReportDevice {
    // The frame's leading tag byte doubles as the HID report id, so frames
    // pass through unmodified; the endpoint ids only matter to the USB
    // backend.
    fn read_report(&mut self, _endpoint: u8, buf: &mut [u8]) -> Result<usize> {
        Ok(self.dev.read_timeout(buf, READ_TIMEOUT_MS)?)
    }

    fn write_report(&mut self, _endpoint: u8, buf: &[u8]) -> Result<usize> {
        Ok(self.dev.write(buf)?)
    }

    fn close(&mut self) {}
}

/// Open the HID transport: find the device, then start an MCU session on it.
pub fn open(vid: u16, pid: u16) -> Result<McuTransport<HidReportDevice>> {
    McuTransport::open(HidReportDevice::open(vid, pid)?)
}
