//! Cross-platform serial port access.
//!
//! [`Serial`] owns one open device and moves raw bytes through it under a
//! configurable [`Timeout`]. [`list_ports`] reports the serial devices the
//! OS currently knows about.
//!
//! ```no_run
//! use serial_com::{Serial, SerialConfig, Parity};
//!
//! let config = SerialConfig::new("/dev/ttyUSB0", 115_200).with_parity(Parity::Even);
//! let mut port = Serial::new(config)?;
//! port.write_str("PING\r\n")?;
//! let reply = port.read_to_vec(64)?;
//! println!("{:02X?}", reply);
//! # Ok::<(), serial_com::SerialError>(())
//! ```

pub mod backend;
pub mod bytes;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod port;
pub mod timeout;

pub use backend::{Backend, NativeBackend};
pub use bytes::RawBytes;
pub use config::{ByteSize, FlowControl, Parity, SerialConfig, StopBits};
pub use enumerate::{list_ports, list_ports_with};
pub use error::{Result, SerialError};
pub use port::Serial;
pub use timeout::Timeout;
