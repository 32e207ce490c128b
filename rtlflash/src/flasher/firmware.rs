//! Raw boot-firmware upload.
//!
//! The boot ROM accepts firmware through the vendor DOWNLOAD command: each
//! chunk is prefixed with a rolling 7-bit sequence number (the top bit is
//! reserved) and acknowledged with `{status, sequence}`. There is no
//! completion signal from the chip; the transfer is done when the cumulative
//! byte count reaches the file size.

use {
    crate::{
        error::{Error, Result},
        progress::ProgressTracker,
        protocol::{
            hci::{HciHost, OGF_VENDOR, opcode},
            vendor::OCF_DOWNLOAD,
        },
        transport::Transport,
    },
    log::{debug, info},
    std::io::Read,
};

/// Firmware bytes per DOWNLOAD command; one more byte carries the sequence.
pub const CHUNK_LEN: usize = 252;

const SEQ_MASK: u8 = 0x7f;

/// Stream `total` bytes of boot firmware from `reader`.
pub(crate) fn download<T, R>(
    transport: &mut T,
    reader: &mut R,
    total: u64,
    tracker: &mut ProgressTracker,
) -> Result<()>
where
    T: Transport + ?Sized,
    R: Read,
{
    let dl_opcode = opcode(OGF_VENDOR, OCF_DOWNLOAD);
    let mut buf = [0u8; CHUNK_LEN + 1];
    let mut seq: u8 = 0;
    let mut sent: u64 = 0;

    info!("downloading {total} bytes of boot firmware");
    loop {
        #[allow(clippy::cast_possible_truncation)] // bounded by CHUNK_LEN
        let want = CHUNK_LEN.min((total - sent) as usize);
        reader.read_exact(&mut buf[1..=want])?;
        buf[0] = seq;

        let rsp = HciHost::new(transport).send_command_sync(dl_opcode, &buf[..=want], 2)?;
        if rsp[0] != 0 {
            return Err(Error::DeviceStatus { status: rsp[0] });
        }
        if rsp[1] != seq {
            return Err(Error::Protocol(format!(
                "download ack echoes sequence {}, expected {seq}",
                rsp[1]
            )));
        }

        seq = (seq + 1) & SEQ_MASK;
        sent += want as u64;
        tracker.advance(want as u64);

        if sent >= total {
            break;
        }
    }

    debug!("boot firmware complete ({sent} bytes)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flasher::sim::ChipSim;
    use crate::progress::{ProgressCounter, ProgressTracker};
    use std::io::Cursor;

    fn run(data: &[u8]) -> ChipSim {
        let mut sim = ChipSim::new();
        let counter = ProgressCounter::new();
        let mut tracker = ProgressTracker::new(data.len() as u64, counter);
        download(
            &mut &mut sim,
            &mut Cursor::new(data.to_vec()),
            data.len() as u64,
            &mut tracker,
        )
        .unwrap();
        sim
    }

    #[test]
    fn test_chunks_and_byte_count() {
        let data = vec![0x5Au8; 600];
        let sim = run(&data);

        assert_eq!(sim.fw_bytes, 600);
        assert_eq!(sim.fw_seqs, vec![0, 1, 2]);
        assert_eq!(sim.fw_data, data);
    }

    #[test]
    fn test_sequence_wraps_after_128_chunks() {
        // 128 full chunks plus one byte: the 129th chunk must carry
        // sequence 0 again, and its ack is checked against 0.
        let data = vec![0u8; 128 * CHUNK_LEN + 1];
        let sim = run(&data);

        assert_eq!(sim.fw_seqs.len(), 129);
        assert_eq!(sim.fw_seqs[127], 127);
        assert_eq!(sim.fw_seqs[128], 0);
        assert_eq!(sim.fw_bytes, data.len());
    }

    #[test]
    fn test_exact_multiple_of_chunk_size_sends_no_trailer() {
        let data = vec![1u8; 2 * CHUNK_LEN];
        let sim = run(&data);

        assert_eq!(sim.fw_seqs, vec![0, 1]);
        assert_eq!(sim.fw_bytes, data.len());
    }

    #[test]
    fn test_empty_firmware_sends_one_empty_chunk() {
        let sim = run(&[]);
        assert_eq!(sim.fw_seqs, vec![0]);
        assert_eq!(sim.fw_bytes, 0);
    }

    #[test]
    fn test_bad_sequence_echo_aborts() {
        let mut sim = ChipSim::new();
        sim.corrupt_fw_seq = true;
        let counter = ProgressCounter::new();
        let mut tracker = ProgressTracker::new(4, counter);

        let result = download(&mut &mut sim, &mut Cursor::new(vec![0u8; 4]), 4, &mut tracker);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
