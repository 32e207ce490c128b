//! MCU command/response framing shared by the USB-bulk and HID channels.
//!
//! The bridge MCU tunnels the chip's UART through fixed 64-byte frames:
//!
//! ```text
//! +-----+-----+-----+----------------+----------+
//! | tag | cmd | len |  payload (60)  | checksum |
//! +-----+-----+-----+----------------+----------+
//! | 1   | 1   | 1   |      60        |    1     |
//! +-----+-----+-----+----------------+----------+
//! ```
//!
//! Host frames carry tag 0x03, MCU acks carry tag 0x01. The checksum is the
//! 8-bit sum of bytes 0..=62. An error ack echoes the command it answers:
//! `[0x01, 0x00, 0x02, cmd, status, ...]`; a READ data ack instead carries
//! the READ command code in byte 1 and the payload length in byte 2.
//!
//! [`McuTransport`] wraps any [`McuDevice`] (one frame in, one frame out)
//! and exposes the plain [`Transport`] capability set upward, so the HCI and
//! MP layers never know the UART is tunneled.

use {
    crate::{
        error::{Error, Result},
        transport::Transport,
    },
    log::{debug, trace, warn},
    std::{thread, time::Duration},
};

/// Wire size of every frame.
pub const FRAME_LEN: usize = 64;

/// Payload capacity of one frame.
pub const BLOCK_LEN: usize = 60;

const HOST_TAG: u8 = 0x03;
const ACK_TAG: u8 = 0x01;

/// OUT endpoint for the USB backend; the HID backend ignores it.
const EP_OUT: u8 = 0x02;
/// IN endpoint for the USB backend; the HID backend ignores it.
const EP_IN: u8 = 0x81;

const CMD_START: u8 = 0x01;
const CMD_SET_BAUDRATE: u8 = 0x02;
const CMD_WRITE: u8 = 0x03;
const CMD_READ: u8 = 0x04;
const CMD_FINISH: u8 = 0x05;

/// Acks examined per command before giving up.
const ACK_ATTEMPTS: u32 = 10;

/// Empty READ acks tolerated per [`Transport::read`] call.
const READ_ATTEMPTS: u32 = 300;

/// Backoff between empty READ acks.
const READ_BACKOFF: Duration = Duration::from_millis(1);

/// Baud rate announced in the session START command.
const START_BAUD: u32 = 115200;

/// One 64-byte frame in, one 64-byte frame out.
///
/// This is the whole surface the USB-bulk and HID backends have to provide;
/// everything else lives in [`McuTransport`].
pub trait McuDevice: Send {
    /// Receive a single frame from `endpoint` into `buf`.
    fn read_report(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize>;

    /// Send a single frame to `endpoint`.
    fn write_report(&mut self, endpoint: u8, buf: &[u8]) -> Result<usize>;

    /// Release the device.
    fn close(&mut self);
}

fn checksum(frame: &[u8; FRAME_LEN]) -> u8 {
    frame[..FRAME_LEN - 1]
        .iter()
        .fold(0u8, |sum, &b| sum.wrapping_add(b))
}

#[allow(clippy::cast_possible_truncation)] // param.len() <= BLOCK_LEN
fn command_frame(cmd: u8, param: &[u8]) -> [u8; FRAME_LEN] {
    debug_assert!(param.len() <= BLOCK_LEN);

    let mut frame = [0u8; FRAME_LEN];
    frame[0] = HOST_TAG;
    frame[1] = cmd;
    frame[2] = param.len() as u8;
    frame[3..3 + param.len()].copy_from_slice(param);
    frame[FRAME_LEN - 1] = checksum(&frame);
    frame
}

/// MCU-framed transport over a raw frame device.
pub struct McuTransport<D: McuDevice> {
    dev: Option<D>,
}

impl<D: McuDevice> McuTransport<D> {
    /// Start a session on `dev`. The START command must be acknowledged
    /// before the channel is usable; on failure the device is released
    /// rather than returned half-open.
    pub fn open(dev: D) -> Result<Self> {
        let mut mcu = Self { dev: Some(dev) };

        if let Err(e) = mcu.write_command(CMD_START, &START_BAUD.to_le_bytes()) {
            warn!("MCU session start failed: {e}");
            let _ = Transport::close(&mut mcu);
            return Err(e);
        }

        debug!("MCU session started");
        Ok(mcu)
    }

    fn dev_mut(&mut self) -> Result<&mut D> {
        self.dev.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "MCU session closed",
            ))
        })
    }

    fn write_frame(&mut self, frame: &[u8; FRAME_LEN]) -> Result<()> {
        let n = self.dev_mut()?.write_report(EP_OUT, frame)?;
        if n != FRAME_LEN {
            return Err(Error::Framing(format!(
                "short frame write: {n} of {FRAME_LEN} bytes"
            )));
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<[u8; FRAME_LEN]> {
        let mut rsp = [0u8; FRAME_LEN];
        let n = self.dev_mut()?.read_report(EP_IN, &mut rsp)?;
        if n != FRAME_LEN {
            return Err(Error::Framing(format!(
                "short frame read: {n} of {FRAME_LEN} bytes"
            )));
        }
        if rsp[0] != ACK_TAG {
            return Err(Error::Framing(format!("unexpected frame tag {:#04x}", rsp[0])));
        }
        Ok(rsp)
    }

    /// Send a command and wait for its matching ack.
    fn write_command(&mut self, cmd: u8, param: &[u8]) -> Result<()> {
        self.write_frame(&command_frame(cmd, param))?;

        for _ in 0..ACK_ATTEMPTS {
            let rsp = self.read_frame()?;
            if rsp[1] == 0x00 && rsp[2] == 2 && rsp[3] == cmd {
                if rsp[4] == 0 {
                    return Ok(());
                }
                return Err(Error::DeviceStatus { status: rsp[4] });
            }
            trace!("discarding unmatched ack while waiting on command {cmd:#04x}");
        }

        Err(Error::Framing(format!("no ack for command {cmd:#04x}")))
    }

    /// Request up to `buf.len()` bytes of tunneled UART data. An ack
    /// carrying fewer bytes than requested (or none) is not an error.
    #[allow(clippy::cast_possible_truncation)] // want <= BLOCK_LEN
    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = buf.len().min(BLOCK_LEN) as u8;
        self.write_frame(&command_frame(CMD_READ, &[want]))?;

        let rsp = self.read_frame()?;
        if rsp[1] == 0x00 && rsp[2] == 2 && rsp[3] == CMD_READ {
            return Err(Error::DeviceStatus { status: rsp[4] });
        }
        if rsp[1] != CMD_READ {
            return Err(Error::Framing(format!(
                "READ ack answers command {:#04x}",
                rsp[1]
            )));
        }

        let len = rsp[2] as usize;
        if len > usize::from(want) {
            return Err(Error::Framing(format!(
                "READ ack carries {len} bytes for a {want}-byte request"
            )));
        }

        buf[..len].copy_from_slice(&rsp[3..3 + len]);
        Ok(len)
    }
}

impl<D: McuDevice> Transport for McuTransport<D> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut got = 0;
        let mut attempts = READ_ATTEMPTS;

        while got < buf.len() {
            let n = match self.read_block(&mut buf[got..]) {
                Ok(n) => n,
                Err(e) if got == 0 => return Err(e),
                Err(e) => {
                    warn!("MCU read aborted after {got} bytes: {e}");
                    return Ok(got);
                },
            };

            if n == 0 {
                if attempts == 0 {
                    debug!("MCU read budget exhausted with {got} bytes");
                    return Ok(got);
                }
                attempts -= 1;
                thread::sleep(READ_BACKOFF);
            }
            got += n;
        }

        Ok(got)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut written = 0;

        for chunk in buf.chunks(BLOCK_LEN) {
            match self.write_command(CMD_WRITE, chunk) {
                Ok(()) => written += chunk.len(),
                Err(e) if written == 0 => return Err(e),
                Err(e) => {
                    warn!("MCU write aborted after {written} bytes: {e}");
                    return Ok(written);
                },
            }
        }

        Ok(written)
    }

    fn set_baudrate(&mut self, baud: u32) -> Result<()> {
        debug!("MCU baud rate -> {baud}");
        self.write_command(CMD_SET_BAUDRATE, &baud.to_le_bytes())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut dev) = self.dev.take() {
            // Session terminate is best effort; the device may already be
            // gone.
            let _ = dev.write_report(EP_OUT, &command_frame(CMD_FINISH, &[]));
            let mut rsp = [0u8; FRAME_LEN];
            let _ = dev.read_report(EP_IN, &mut rsp);
            dev.close();
        }
        Ok(())
    }
}

impl<D: McuDevice> Drop for McuTransport<D> {
    fn drop(&mut self) {
        let _ = Transport::close(self);
    }
}
