use std::fmt;
use std::io;

use log::{info, trace, warn};

use crate::backend::{Backend, NativeBackend};
use crate::bytes::RawBytes;
use crate::config::SerialConfig;
use crate::error::{Result, SerialError};

/// An exclusively owned serial port.
///
/// A `Serial` is either unopened or owns exactly one OS handle. It cannot be
/// cloned. Moving it moves the handle, and `std::mem::take` leaves the
/// source unopened. Dropping an open port closes it.
///
/// Reads and writes block the calling thread for at most the budget given
/// by the [`Timeout`](crate::Timeout) captured at open time. The handle is
/// not synchronized: concurrent reads and writes need external locking.
pub struct Serial<B: Backend = NativeBackend> {
    backend: B,
    config: Option<SerialConfig>,
    handle: Option<B::Handle>,
}

impl Serial {
    /// Open `config.port` with the native backend.
    pub fn new(config: SerialConfig) -> Result<Self> {
        Self::open_with(NativeBackend::default(), config)
    }

    /// A port that does not own a device yet.
    pub fn unopened() -> Self {
        Self::with_backend(NativeBackend::default())
    }
}

impl<B: Backend> Serial<B> {
    /// An unopened port bound to `backend`.
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            config: None,
            handle: None,
        }
    }

    /// Open `config.port` through `backend`.
    pub fn open_with(backend: B, config: SerialConfig) -> Result<Self> {
        let mut port = Self::with_backend(backend);
        port.open(config)?;
        Ok(port)
    }

    /// Open a device on an unopened port.
    ///
    /// Fails with [`SerialError::AlreadyOpen`] while a device is held; the
    /// existing handle is left untouched in that case.
    pub fn open(&mut self, config: SerialConfig) -> Result<()> {
        if self.handle.is_some() {
            let port = self.port_name().unwrap_or_default().to_string();
            return Err(SerialError::AlreadyOpen(port));
        }
        config.validate()?;

        let handle = self.backend.open(&config)?;
        info!("opened {} at {}", config.port, config);
        self.handle = Some(handle);
        self.config = Some(config);
        Ok(())
    }

    /// Release the device if one is held. Safe to call repeatedly.
    ///
    /// Errors reported by the OS while closing are logged and dropped; the
    /// port is unopened afterwards either way.
    pub fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let config = self.config.take();
        let name = config.as_ref().map_or("", |c| c.port.as_str());
        match self.backend.close(handle) {
            Ok(()) => info!("closed {}", name),
            Err(e) => warn!("error closing {}: {}", name, e),
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Configuration of the open device.
    pub fn config(&self) -> Option<&SerialConfig> {
        self.config.as_ref()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.port.as_str())
    }

    /// The OS handle, for platform-specific calls. Ownership stays here.
    pub fn native_handle(&self) -> Result<&B::Handle> {
        self.handle.as_ref().ok_or(SerialError::NotOpen)
    }

    /// Read up to `buf.len()` bytes.
    ///
    /// Returns fewer bytes, possibly zero, when the read timers expire
    /// first. That is not an error.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (backend, handle, config) = self.parts()?;
        let n = backend.read(handle, buf, &config.timeout)?;
        trace!("RX {}: {:02X?}", config.port, &buf[..n]);
        Ok(n)
    }

    /// Read up to `max_bytes` into a new buffer sized to what arrived.
    pub fn read_to_vec(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_bytes];
        let n = self.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write up to `buf.len()` bytes and return how many were accepted.
    ///
    /// A short count means the write budget ran out; retrying the rest is up
    /// to the caller.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let (backend, handle, config) = self.parts()?;
        let n = backend.write(handle, buf, &config.timeout)?;
        trace!("TX {}: {:02X?}", config.port, &buf[..n]);
        Ok(n)
    }

    /// Write the byte representation of `value`.
    pub fn write_value<T: RawBytes + ?Sized>(&mut self, value: &T) -> Result<usize> {
        self.write(&value.raw_bytes())
    }

    /// Write the UTF-8 bytes of `text`, without terminator.
    pub fn write_str(&mut self, text: &str) -> Result<usize> {
        self.write(text.as_bytes())
    }

    /// Block until everything written so far has left the transmitter.
    pub fn drain(&mut self) -> Result<()> {
        let (backend, handle, _) = self.parts()?;
        backend.drain(handle)?;
        Ok(())
    }

    fn parts(&mut self) -> Result<(&B, &mut B::Handle, &SerialConfig)> {
        match (self.handle.as_mut(), self.config.as_ref()) {
            (Some(handle), Some(config)) => Ok((&self.backend, handle, config)),
            _ => Err(SerialError::NotOpen),
        }
    }
}

impl<B: Backend + Default> Default for Serial<B> {
    fn default() -> Self {
        Self::with_backend(B::default())
    }
}

impl<B: Backend> Drop for Serial<B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: Backend> fmt::Debug for Serial<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serial")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .finish()
    }
}

impl<B: Backend> io::Read for Serial<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Serial::read(self, buf).map_err(io::Error::from)
    }
}

impl<B: Backend> io::Write for Serial<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Serial::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain().map_err(io::Error::from)
    }
}
