//! HCI command/event channel for vendor commands.
//!
//! Only the two packet types the downloader needs are modeled:
//!
//! ```text
//! Command: [0x01] [opcode lo] [opcode hi] [len] [params ...]
//! Event:   [0x04] [event code] [len] [payload ...]
//! ```
//!
//! An opcode packs a 6-bit group field (always the vendor group here) and a
//! 10-bit command field. Synchronous commands wait for the matching
//! "command complete" event, discarding everything else on the wire, within
//! an explicit attempt budget.

use {
    crate::{
        error::{Error, Result},
        transport::{Transport, read_fully},
    },
    byteorder::{LittleEndian, WriteBytesExt},
    log::{debug, trace},
};

/// Command packet marker.
pub const PKT_COMMAND: u8 = 0x01;

/// Event packet marker.
pub const PKT_EVENT: u8 = 0x04;

/// "Command complete" event code.
pub const EVT_CMD_COMPLETE: u8 = 0x0e;

/// Vendor opcode group field.
pub const OGF_VENDOR: u8 = 0x3f;

/// Events examined per synchronous command before giving up.
const DEFAULT_EVENT_BUDGET: usize = 64;

/// Stray bytes skipped while hunting for an event marker.
const MARKER_SCAN_BUDGET: usize = 4096;

/// Pack an opcode from its group and command fields.
#[must_use]
pub fn opcode(ogf: u8, ocf: u16) -> u16 {
    (ocf & 0x03ff) | (u16::from(ogf) << 10)
}

/// HCI host side, borrowed over a transport for a command exchange.
pub struct HciHost<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    event_budget: usize,
}

impl<'a, T: Transport + ?Sized> HciHost<'a, T> {
    /// Bind to `transport` with the default event budget.
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            event_budget: DEFAULT_EVENT_BUDGET,
        }
    }

    /// Override how many events may be discarded per synchronous command.
    #[must_use]
    pub fn with_event_budget(mut self, budget: usize) -> Self {
        self.event_budget = budget;
        self
    }

    /// Fire a command without waiting for completion.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)] // params.len() checked <= 255
    pub fn send_command(&mut self, opcode: u16, params: &[u8]) -> Result<()> {
        if params.len() > 255 {
            return Err(Error::Protocol(format!(
                "command parameters too long: {} bytes",
                params.len()
            )));
        }

        let mut pkt = Vec::with_capacity(4 + params.len());
        pkt.push(PKT_COMMAND);
        pkt.write_u16::<LittleEndian>(opcode).unwrap();
        pkt.push(params.len() as u8);
        pkt.extend_from_slice(params);

        trace!("HCI command {opcode:#06x}, {} parameter bytes", params.len());
        let n = self.transport.write(&pkt)?;
        if n != pkt.len() {
            return Err(Error::Protocol(format!(
                "short command write: {n} of {} bytes",
                pkt.len()
            )));
        }
        Ok(())
    }

    /// Read one event packet: hunt for the marker, then the two header
    /// bytes, then exactly `len` payload bytes.
    pub fn read_event(&mut self) -> Result<(u8, Vec<u8>)> {
        let mut byte = [0u8; 1];
        let mut skipped = 0;
        loop {
            if read_fully(self.transport, &mut byte)? != 1 {
                return Err(Error::Timeout("waiting for event marker".into()));
            }
            if byte[0] == PKT_EVENT {
                break;
            }
            skipped += 1;
            if skipped > MARKER_SCAN_BUDGET {
                return Err(Error::Timeout("no event marker in stream".into()));
            }
        }

        let mut hdr = [0u8; 2];
        if read_fully(self.transport, &mut hdr)? != 2 {
            return Err(Error::Timeout("waiting for event header".into()));
        }

        let mut payload = vec![0u8; usize::from(hdr[1])];
        if read_fully(self.transport, &mut payload)? != payload.len() {
            return Err(Error::Timeout("waiting for event payload".into()));
        }

        Ok((hdr[0], payload))
    }

    /// Send a command and wait for its command-complete event.
    ///
    /// Returns `rsp_len` bytes starting at the completion status byte
    /// (status first, then the command's return parameters). Uncorrelated
    /// events are discarded up to the event budget.
    pub fn send_command_sync(
        &mut self,
        opcode: u16,
        params: &[u8],
        rsp_len: usize,
    ) -> Result<Vec<u8>> {
        self.send_command(opcode, params)?;

        for _ in 0..self.event_budget {
            let (code, payload) = self.read_event()?;
            // Command-complete payload: num_packets, opcode, status, params.
            if code != EVT_CMD_COMPLETE || payload.len() < 3 {
                debug!("discarding event {code:#04x} ({} bytes)", payload.len());
                continue;
            }

            let echoed = u16::from(payload[1]) | u16::from(payload[2]) << 8;
            if echoed != opcode {
                debug!("discarding command complete for {echoed:#06x}");
                continue;
            }

            let ret = &payload[3..];
            if ret.len() < rsp_len {
                return Err(Error::Protocol(format!(
                    "command complete for {opcode:#06x} carries {} return bytes, expected {rsp_len}",
                    ret.len()
                )));
            }
            return Ok(ret[..rsp_len].to_vec());
        }

        Err(Error::Timeout(format!(
            "no command complete for opcode {opcode:#06x}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;

    /// Build a command-complete event for `opcode` with the given return
    /// parameters (status first).
    #[allow(clippy::cast_possible_truncation)]
    fn cmd_complete(opcode: u16, ret: &[u8]) -> Vec<u8> {
        let mut ev = vec![PKT_EVENT, EVT_CMD_COMPLETE, (3 + ret.len()) as u8, 0x01];
        ev.extend_from_slice(&opcode.to_le_bytes());
        ev.extend_from_slice(ret);
        ev
    }

    #[test]
    fn test_opcode_packing() {
        assert_eq!(opcode(OGF_VENDOR, 0x20), 0xfc20);
        assert_eq!(opcode(OGF_VENDOR, 0x61), 0xfc61);
        assert_eq!(opcode(0x01, 0x0001), 0x0401);
    }

    #[test]
    fn test_command_packet_layout() {
        let mut mock = MockTransport::new();
        HciHost::new(&mut mock)
            .send_command(0xfc20, &[0xDE, 0xAD])
            .unwrap();

        assert_eq!(mock.written_bytes(), vec![0x01, 0x20, 0xfc, 0x02, 0xDE, 0xAD]);
    }

    #[test]
    fn test_sync_returns_status_and_params() {
        let mut mock = MockTransport::new();
        mock.push_read(cmd_complete(0xfc61, &[0x00, 0x0b, 0x01, 0x02, 0x03]));

        let rsp = HciHost::new(&mut mock)
            .send_command_sync(0xfc61, &[], 5)
            .unwrap();
        assert_eq!(rsp, vec![0x00, 0x0b, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_sync_skips_unrelated_events_and_stray_bytes() {
        let mut mock = MockTransport::new();
        // Stray UART noise, a connection-ish event, a completion for some
        // other opcode, then the real completion.
        mock.push_read([0x55, 0xAA]);
        mock.push_read([PKT_EVENT, 0x13, 0x02, 0x00, 0x00]);
        mock.push_read(cmd_complete(0xfc17, &[0x00]));
        mock.push_read(cmd_complete(0xfc62, &[0x00]));

        let rsp = HciHost::new(&mut mock)
            .send_command_sync(0xfc62, &[0x01], 1)
            .unwrap();
        assert_eq!(rsp, vec![0x00]);
    }

    #[test]
    fn test_sync_times_out_when_budget_exhausted() {
        let mut mock = MockTransport::new();
        for _ in 0..4 {
            mock.push_read(cmd_complete(0xfc17, &[0x00]));
        }

        let result = HciHost::new(&mut mock)
            .with_event_budget(4)
            .send_command_sync(0xfc62, &[], 1);
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_truncated_event_is_a_timeout() {
        let mut mock = MockTransport::new();
        mock.push_read([PKT_EVENT, EVT_CMD_COMPLETE, 0x05, 0x01]);

        let result = HciHost::new(&mut mock).read_event();
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_short_return_params_are_an_error() {
        let mut mock = MockTransport::new();
        mock.push_read(cmd_complete(0xfc61, &[0x00]));

        let result = HciHost::new(&mut mock).send_command_sync(0xfc61, &[], 5);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
