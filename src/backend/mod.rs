use std::io;

use crate::config::SerialConfig;
use crate::error::Result;
use crate::timeout::Timeout;

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "serialport")]
pub mod serialport_rs;
#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

/// Operating system facilities behind a [`Serial`](crate::Serial) handle.
///
/// A backend is stateless with respect to open devices: every device it
/// opens is represented by a `Handle` that the caller owns and eventually
/// passes back to [`close`](Backend::close).
///
/// All calls are synchronous and blocking. `read` and `write` must honor the
/// [`Timeout`] contract and report a timeout as a short count, never as an
/// error.
pub trait Backend {
    /// Native resource for one open device.
    type Handle;

    /// Open and configure the device named by `config.port`.
    fn open(&self, config: &SerialConfig) -> Result<Self::Handle>;

    /// Release the device. Called exactly once per successful `open`.
    fn close(&self, handle: Self::Handle) -> io::Result<()>;

    /// Read up to `buf.len()` bytes, returning how many arrived before the
    /// read timers expired.
    fn read(&self, handle: &mut Self::Handle, buf: &mut [u8], timeout: &Timeout)
        -> io::Result<usize>;

    /// Write up to `buf.len()` bytes, returning how many were accepted
    /// before the write budget expired.
    fn write(&self, handle: &mut Self::Handle, buf: &[u8], timeout: &Timeout)
        -> io::Result<usize>;

    /// Block until queued output has been transmitted.
    fn drain(&self, handle: &mut Self::Handle) -> io::Result<()>;

    /// Names of the serial devices currently present, in OS order.
    fn port_names(&self) -> Result<Vec<String>>;
}

#[cfg(unix)]
pub type NativeBackend = unix::TermiosBackend;

#[cfg(windows)]
pub type NativeBackend = windows::CommBackend;
