//! MP (manufacturing/production-test) flash protocol.
//!
//! Once the MP firmware is running, flash is driven by packed little-endian
//! requests, each trailed by a CRC-16/ARC over the preceding bytes:
//!
//! ```text
//! Request:  [magic 0x87] [command:2] [fields ...] [payload] [crc16:2]
//! Response: [magic] [command:2] [pad] [length:4] [payload] [crc16:2]
//! ```
//!
//! Every request has a fixed wire length and so does its response; the
//! stream carries no resynchronization marker, so a response is read for
//! exactly its expected length and a short or corrupt read is fatal. No
//! operation retries on its own.

use {
    crate::{
        error::{Error, Result},
        protocol::crc::crc16_arc,
        transport::{Transport, read_fully},
    },
    byteorder::{ByteOrder, LittleEndian, WriteBytesExt},
    log::{debug, trace},
};

const MAGIC: u8 = 0x87;

const CMD_CHANGE_BAUDRATE: u16 = 0x1010;
const CMD_ERASE_FLASH: u16 = 0x1030;
const CMD_ACCESS_FLASH: u16 = 0x1032;
const CMD_RESET: u16 = 0x1041;
const CMD_VERIFY_FLASH: u16 = 0x1050;

/// Fixed response header: magic, command, padding, length.
const RSP_HEADER_LEN: usize = 8;

/// Upper bound on a single write or read payload.
pub const MAX_DATA_LEN: usize = 4096;

/// MP command link, borrowed over a transport.
pub struct MpLink<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: Transport + ?Sized> MpLink<'a, T> {
    /// Bind to `transport`.
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    fn send_request(&mut self, body: &[u8]) -> Result<()> {
        let mut wire = Vec::with_capacity(body.len() + 2);
        wire.extend_from_slice(body);
        wire.write_u16::<LittleEndian>(crc16_arc(body)).unwrap();

        let n = self.transport.write(&wire)?;
        if n != wire.len() {
            return Err(Error::Protocol(format!(
                "short MP write: {n} of {} bytes",
                wire.len()
            )));
        }
        Ok(())
    }

    /// Read a response carrying exactly `payload_len` payload bytes.
    fn read_response(&mut self, payload_len: usize) -> Result<Vec<u8>> {
        let wire_len = RSP_HEADER_LEN + payload_len + 2;
        let mut wire = vec![0u8; wire_len];
        let got = read_fully(self.transport, &mut wire)?;
        if got != wire_len {
            return Err(Error::Timeout(format!(
                "MP response: {got} of {wire_len} bytes"
            )));
        }

        let (body, trailer) = wire.split_at(wire_len - 2);
        let expected = LittleEndian::read_u16(trailer);
        let actual = crc16_arc(body);
        if actual != expected {
            return Err(Error::CrcMismatch { expected, actual });
        }
        if body[0] != MAGIC {
            return Err(Error::Protocol(format!(
                "MP response magic {:#04x}",
                body[0]
            )));
        }

        trace!(
            "MP response: command {:#06x}, length {}",
            LittleEndian::read_u16(&body[1..3]),
            LittleEndian::read_u32(&body[4..8])
        );
        Ok(body[RSP_HEADER_LEN..].to_vec())
    }

    fn request(&mut self, body: &[u8], rsp_payload_len: usize) -> Result<Vec<u8>> {
        self.send_request(body)?;
        self.read_response(rsp_payload_len)
    }

    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    fn body(command: u16) -> Vec<u8> {
        let mut body = Vec::with_capacity(16);
        body.push(MAGIC);
        body.write_u16::<LittleEndian>(command).unwrap();
        body
    }

    /// Reset the chip. Mode 0x01 reboots into the written image.
    pub fn reset(&mut self, mode: u8) -> Result<()> {
        debug!("MP reset, mode {mode:#04x}");
        let mut body = Self::body(CMD_RESET);
        body.push(mode);
        self.request(&body, 0)?;
        Ok(())
    }

    /// Change the chip's UART rate. The host side has to follow separately.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn change_baudrate(&mut self, baud: u32) -> Result<()> {
        debug!("MP baud rate -> {baud}");
        let mut body = Self::body(CMD_CHANGE_BAUDRATE);
        body.write_u32::<LittleEndian>(baud).unwrap();
        body.push(0xff); // padding
        self.request(&body, 0)?;
        Ok(())
    }

    /// Erase `size` bytes of flash at `addr`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn erase_flash(&mut self, addr: u32, size: u32) -> Result<()> {
        trace!("MP erase {size:#x} bytes at {addr:#010x}");
        let mut body = Self::body(CMD_ERASE_FLASH);
        body.write_u32::<LittleEndian>(addr).unwrap();
        body.write_u32::<LittleEndian>(size).unwrap();
        self.request(&body, 0)?;
        Ok(())
    }

    /// Write `data` to flash at `addr`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)] // data.len() <= MAX_DATA_LEN
    pub fn write_flash(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if data.len() > MAX_DATA_LEN {
            return Err(Error::Protocol(format!(
                "flash write of {} bytes exceeds {MAX_DATA_LEN}",
                data.len()
            )));
        }

        trace!("MP write {:#x} bytes at {addr:#010x}", data.len());
        let mut body = Self::body(CMD_ACCESS_FLASH);
        body.write_u32::<LittleEndian>(addr).unwrap();
        body.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        body.extend_from_slice(data);
        self.request(&body, 0)?;
        Ok(())
    }

    /// Read `size` bytes of flash at `addr`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn read_flash(&mut self, addr: u32, size: u32) -> Result<Vec<u8>> {
        if size as usize > MAX_DATA_LEN {
            return Err(Error::Protocol(format!(
                "flash read of {size} bytes exceeds {MAX_DATA_LEN}"
            )));
        }

        trace!("MP read {size:#x} bytes at {addr:#010x}");
        let mut body = Self::body(CMD_ACCESS_FLASH);
        body.write_u32::<LittleEndian>(addr).unwrap();
        body.write_u32::<LittleEndian>(size).unwrap();
        self.request(&body, size as usize)
    }

    /// Ask the chip to CRC-check `size` bytes at `addr` against `crc`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn verify_flash(&mut self, addr: u32, size: u32, crc: u16) -> Result<()> {
        trace!("MP verify {size:#x} bytes at {addr:#010x}, crc {crc:#06x}");
        let mut body = Self::body(CMD_VERIFY_FLASH);
        body.write_u32::<LittleEndian>(addr).unwrap();
        body.write_u32::<LittleEndian>(size).unwrap();
        body.write_u16::<LittleEndian>(crc).unwrap();
        self.request(&body, 0)?;
        Ok(())
    }
}
