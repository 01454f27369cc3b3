//! Serial transport implementation

use super::Transport;
use crate::error::{Error, Result};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Poll interval for a single read; request deadlines are enforced by the driver
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Serial transport for UART communication
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialTransport {
    /// Open a serial port at 8N1, no flow control
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyUSB0")
    /// * `baud_rate` - Baud rate (e.g., 115200)
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_POLL_TIMEOUT)
            .open()?;

        port.clear(ClearBuffer::All)?;
        log::info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(SerialTransport {
            port,
            path: path.to_string(),
        })
    }

    /// Port path this transport was opened on
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Find a port whose name or USB description contains `device_name`
pub fn find_port(device_name: &str) -> Result<String> {
    let needle = device_name.to_lowercase();
    let ports = serialport::available_ports()?;

    for port in ports {
        let description = match &port.port_type {
            SerialPortType::UsbPort(usb) => usb.product.clone().unwrap_or_default(),
            _ => String::new(),
        };
        if port.port_name.to_lowercase().contains(&needle)
            || description.to_lowercase().contains(&needle)
        {
            log::info!("Auto-detected sonar port {} ({})", port.port_name, description);
            return Ok(port.port_name);
        }
    }

    Err(Error::DeviceUnavailable(format!(
        "no serial port matching '{}' found",
        device_name
    )))
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.port.write(data)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn close(&mut self) -> Result<()> {
        log::info!("Closing serial port: {}", self.path);
        Ok(())
    }
}
