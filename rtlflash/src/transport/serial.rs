//! Serial transport backed by the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        transport::Transport,
    },
    log::{debug, trace},
    serialport::ClearBuffer,
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// Read/write timeout on the serial line.
const SERIAL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Raw serial byte channel, 8N1, no flow control.
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl SerialTransport {
    /// Open `tty` at `baud`.
    pub fn open(tty: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(tty, baud)
            .timeout(SERIAL_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => Error::DeviceNotFound,
                _ => Error::Serial(e),
            })?;

        port.clear(ClearBuffer::All)?;
        debug!("opened {tty} at {baud}");

        Ok(Self {
            port: Some(port),
            name: tty.to_string(),
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "port closed",
            ))
        })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port_mut()?.read(buf) {
            Ok(n) => Ok(n),
            // Nothing arrived within the timeout window; not an error.
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let port = self.port_mut()?;
        let n = port.write(buf)?;
        port.flush()?;
        trace!("serial wrote {n} bytes");
        Ok(n)
    }

    fn set_baudrate(&mut self, baud: u32) -> Result<()> {
        debug!("serial {}: baud rate -> {baud}", self.name);
        let port = self.port_mut()?;
        port.set_baud_rate(baud)?;
        // Whatever was in flight at the old rate is garbage now.
        port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the descriptor.
        self.port.take();
        Ok(())
    }
}
