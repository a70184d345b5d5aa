use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::debug;
use serialport::SerialPort;

use crate::config::{ByteSize, FlowControl, Parity, SerialConfig, StopBits};
use crate::error::{Result, SerialError};
use crate::timeout::{ReadTimer, Timeout};

use super::Backend;

/// Wait slice used when a budget is unbounded.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Backend built on the `serialport` crate.
///
/// The crate exposes a single timeout per port, so the read and write
/// budgets are re-applied through `set_timeout` on every wait.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialportBackend;

impl From<ByteSize> for serialport::DataBits {
    fn from(size: ByteSize) -> Self {
        match size {
            ByteSize::Five => serialport::DataBits::Five,
            ByteSize::Six => serialport::DataBits::Six,
            ByteSize::Seven => serialport::DataBits::Seven,
            ByteSize::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

impl SerialError {
    fn from_serialport(port: &str, err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => Self::DeviceNotFound(port.to_string()),
            serialport::ErrorKind::InvalidInput => Self::InvalidConfiguration(err.description),
            serialport::ErrorKind::Io(kind) => Self::from_open_error(port, io::Error::new(kind, err)),
            _ => Self::Serial(err),
        }
    }
}

impl Backend for SerialportBackend {
    type Handle = Box<dyn SerialPort>;

    fn open(&self, config: &SerialConfig) -> Result<Self::Handle> {
        serialport::new(&config.port, config.baud_rate)
            .data_bits(config.byte_size.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .timeout(config.timeout.read_total_timeout_constant)
            .open()
            .map_err(|e| SerialError::from_serialport(&config.port, e))
    }

    fn close(&self, handle: Self::Handle) -> io::Result<()> {
        drop(handle);
        Ok(())
    }

    fn read(&self, handle: &mut Self::Handle, buf: &mut [u8], timeout: &Timeout) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut timer = ReadTimer::start(timeout, buf.len(), Instant::now());
        let mut filled = 0;
        while filled < buf.len() {
            let wait = match timer.remaining(Instant::now()) {
                Some(Duration::ZERO) => break,
                Some(wait) => wait,
                None => IDLE_WAIT,
            };
            handle.set_timeout(wait).map_err(io::Error::from)?;
            match handle.read(&mut buf[filled..]) {
                // The crate reports an idle line as TimedOut, so an empty read is end of stream.
                Ok(0) if filled > 0 => break,
                Ok(0) => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device hung up")),
                Ok(n) => {
                    filled += n;
                    timer.received(Instant::now());
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn write(&self, handle: &mut Self::Handle, buf: &[u8], timeout: &Timeout) -> io::Result<usize> {
        let deadline = timeout
            .write_budget(buf.len())
            .and_then(|d| Instant::now().checked_add(d));

        let mut written = 0;
        while written < buf.len() {
            let wait = match deadline.map(|d| d.saturating_duration_since(Instant::now())) {
                Some(Duration::ZERO) => break,
                Some(wait) => wait,
                None => IDLE_WAIT,
            };
            handle.set_timeout(wait).map_err(io::Error::from)?;
            match handle.write(&buf[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    fn drain(&self, handle: &mut Self::Handle) -> io::Result<()> {
        handle.flush()
    }

    fn port_names(&self) -> Result<Vec<String>> {
        let ports = serialport::available_ports()
            .map_err(|e| SerialError::Enumeration(io::Error::other(e)))?;
        for port in &ports {
            debug!("found port: {} ({:?})", port.port_name, port.port_type);
        }
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}
