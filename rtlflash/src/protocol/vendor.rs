//! Realtek vendor HCI commands.
//!
//! Everything the downloader asks of the chip before MP mode goes through
//! the vendor opcode group: a chip-type register read, the two 0x62
//! mode-switch blocks, the raw firmware DOWNLOAD stream, and a controller
//! baud change using the chip's encoded rate representation.

use {
    crate::{
        error::{Error, Result},
        protocol::hci::{HciHost, OGF_VENDOR, opcode},
        transport::Transport,
    },
    log::{debug, info},
};

/// Change the controller's UART rate.
pub const OCF_CHANGE_BAUD: u16 = 0x17;

/// Raw firmware download stream.
pub const OCF_DOWNLOAD: u16 = 0x20;

/// Chip type register read.
pub const OCF_READ_CHIP_TYPE: u16 = 0x61;

/// Mode-switch command.
pub const OCF_CMD62: u16 = 0x62;

/// 0x62 block that puts the boot ROM into firmware-download mode.
pub const CMD62_ENTER_DOWNLOAD: [u8; 9] = [0x20, 0xa8, 0x02, 0x00, 0x40, 0x04, 0x02, 0x00, 0x01];

/// 0x62 block that hands control to the freshly downloaded MP firmware.
pub const CMD62_ENTER_MP: [u8; 9] = [0x20, 0x34, 0x12, 0x20, 0x00, 0x31, 0x38, 0x20, 0x00];

/// Chip type register address block.
const CHIP_TYPE_PARAMS: [u8; 5] = [0x20, 0xa8, 0x02, 0x00, 0x40];

/// Encode a line rate into the controller's vendor representation.
fn encode_baudrate(baud: u32) -> u32 {
    match baud {
        230400 => 0x0252C00A,
        921600 => 0x05F75004,
        1500000 => 0x04928002,
        2000000 => 0x00005002,
        2500000 => 0x0000B001,
        3000000 => 0x04928001,
        3500000 => 0x052A6001,
        4000000 => 0x00005001,
        // 115200 and 1000000 share an encoding, and it doubles as the
        // fallback for rates the chip has no table entry for.
        _ => 0x0252C014,
    }
}

/// Query the chip type register.
pub fn read_chip_type<T: Transport + ?Sized>(transport: &mut T) -> Result<u8> {
    let rsp = HciHost::new(transport).send_command_sync(
        opcode(OGF_VENDOR, OCF_READ_CHIP_TYPE),
        &CHIP_TYPE_PARAMS,
        5,
    )?;
    if rsp[0] != 0 {
        return Err(Error::DeviceStatus { status: rsp[0] });
    }

    debug!("chip type {:#04x}", rsp[1]);
    Ok(rsp[1])
}

/// Issue one of the 0x62 mode-switch blocks.
pub fn vendor_cmd62<T: Transport + ?Sized>(transport: &mut T, params: &[u8; 9]) -> Result<()> {
    let rsp = HciHost::new(transport).send_command_sync(opcode(OGF_VENDOR, OCF_CMD62), params, 1)?;
    if rsp[0] != 0 {
        return Err(Error::DeviceStatus { status: rsp[0] });
    }
    Ok(())
}

/// Ask the controller itself to change its UART rate.
///
/// This changes only the chip side; the host transport has to follow
/// separately or the link desynchronizes.
pub fn change_baudrate<T: Transport + ?Sized>(transport: &mut T, baud: u32) -> Result<()> {
    let encoded = encode_baudrate(baud);
    info!("controller baud rate -> {baud} (vendor code {encoded:#010x})");

    let rsp = HciHost::new(transport).send_command_sync(
        opcode(OGF_VENDOR, OCF_CHANGE_BAUD),
        &encoded.to_le_bytes(),
        1,
    )?;
    if rsp[0] != 0 {
        return Err(Error::DeviceStatus { status: rsp[0] });
    }
    Ok(())
}
