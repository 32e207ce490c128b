//! Protocol implementations.

pub mod crc;
pub mod hci;
pub mod mp;
pub mod vendor;

// Re-export common types
pub use {
    crc::crc16_arc,
    hci::{HciHost, opcode},
    mp::MpLink,
};
