use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SerialError>;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("serial port {0} is already open")]
    AlreadyOpen(String),

    #[error("serial port is not open")]
    NotOpen,

    #[error("serial port not found: {0}")]
    DeviceNotFound(String),

    #[error("permission denied opening {0}")]
    PermissionDenied(String),

    #[error("serial port {0} is busy")]
    DeviceBusy(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("port enumeration failed: {0}")]
    Enumeration(#[source] io::Error),

    #[error("failed to open {port}: {source}")]
    Os {
        port: String,
        #[source]
        source: io::Error,
    },

    #[cfg(feature = "serialport")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl SerialError {
    /// Classify an OS error reported while opening `port`.
    pub fn from_open_error(port: &str, err: io::Error) -> Self {
        if is_busy(&err) {
            return Self::DeviceBusy(port.to_string());
        }
        match err.kind() {
            io::ErrorKind::NotFound => Self::DeviceNotFound(port.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(port.to_string()),
            _ => Self::Os {
                port: port.to_string(),
                source: err,
            },
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}

#[cfg(unix)]
fn is_busy(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ResourceBusy || err.raw_os_error() == Some(nix::libc::EBUSY)
}

// A COM port held by another process reports ERROR_ACCESS_DENIED, not a sharing violation.
#[cfg(windows)]
fn is_busy(err: &io::Error) -> bool {
    use windows_sys::Win32::Foundation::{ERROR_ACCESS_DENIED, ERROR_SHARING_VIOLATION};

    matches!(
        err.raw_os_error().map(|code| code as u32),
        Some(ERROR_ACCESS_DENIED | ERROR_SHARING_VIOLATION)
    )
}

#[cfg(not(any(unix, windows)))]
fn is_busy(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ResourceBusy
}

impl From<SerialError> for io::Error {
    fn from(err: SerialError) -> Self {
        match err {
            SerialError::Io(e) => e,
            SerialError::NotOpen => io::Error::new(io::ErrorKind::NotConnected, err),
            SerialError::DeviceNotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            SerialError::DeviceBusy(_) => io::Error::new(io::ErrorKind::ResourceBusy, err),
            SerialError::PermissionDenied(_) => {
                io::Error::new(io::ErrorKind::PermissionDenied, err)
            }
            SerialError::InvalidConfiguration(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_device_not_found() {
        let err = SerialError::from_open_error("COM9", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, SerialError::DeviceNotFound(ref p) if p == "COM9"));
    }

    #[test]
    fn test_permission_denied_maps() {
        let err = SerialError::from_open_error(
            "/dev/ttyS0",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, SerialError::PermissionDenied(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_ebusy_maps_to_device_busy() {
        let err = SerialError::from_open_error(
            "/dev/ttyUSB0",
            io::Error::from_raw_os_error(nix::libc::EBUSY),
        );
        assert!(matches!(err, SerialError::DeviceBusy(_)));
    }

    #[test]
    fn test_unknown_error_keeps_source() {
        let err = SerialError::from_open_error("COM1", io::Error::other("boom"));
        match err {
            SerialError::Os { port, source } => {
                assert_eq!(port, "COM1");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_into_io_error_keeps_kind() {
        let io_err: io::Error = SerialError::NotOpen.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotConnected);

        let io_err: io::Error = SerialError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).into();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);

        let io_err: io::Error = SerialError::DeviceBusy("COM4".into()).into();
        assert_eq!(io_err.kind(), io::ErrorKind::ResourceBusy);
        assert_eq!(io_err.to_string(), "serial port COM4 is busy");
    }
}
