use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SerialError};
use crate::timeout::Timeout;

/// Parity bit scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Data bits per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteSize {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Flow control type.
///
/// The effect of `Software` (XON/XOFF) and `Hardware` (RTS/CTS) is whatever
/// the host driver does with the corresponding line settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

impl ByteSize {
    pub fn bits(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl TryFrom<u8> for ByteSize {
    type Error = SerialError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            _ => Err(SerialError::invalid(format!("byte size must be 5-8, got {bits}"))),
        }
    }
}

impl StopBits {
    pub fn count(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = SerialError;

    fn try_from(count: u8) -> Result<Self> {
        match count {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(SerialError::invalid(format!("stop bits must be 1 or 2, got {count}"))),
        }
    }
}

impl FromStr for Parity {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            _ => Err(SerialError::invalid(format!("unknown parity: {s:?}"))),
        }
    }
}

impl FromStr for FlowControl {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "software" | "xonxoff" => Ok(Self::Software),
            "hardware" | "rtscts" => Ok(Self::Hardware),
            _ => Err(SerialError::invalid(format!("unknown flow control: {s:?}"))),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "N"),
            Self::Odd => write!(f, "O"),
            Self::Even => write!(f, "E"),
        }
    }
}

/// Line configuration captured when a port is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device identifier, e.g. `COM3` or `/dev/ttyUSB0`.
    pub port: String,
    /// Line rate in bits per second.
    pub baud_rate: u32,
    pub byte_size: ByteSize,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    pub timeout: Timeout,
}

impl SerialConfig {
    /// 8N1, no flow control, default timeouts.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            byte_size: ByteSize::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flow_control: FlowControl::default(),
            timeout: Timeout::default(),
        }
    }

    pub fn with_byte_size(mut self, byte_size: ByteSize) -> Self {
        self.byte_size = byte_size;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject values no backend can open.
    pub fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(SerialError::invalid("port name is empty"));
        }
        if self.baud_rate == 0 {
            return Err(SerialError::invalid("baud rate must be positive"));
        }
        Ok(())
    }
}

impl fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.byte_size.bits(),
            self.parity,
            self.stop_bits.count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults_to_8n1() {
        let config = SerialConfig::new("COM3", 9600);
        assert_eq!(config.byte_size, ByteSize::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.flow_control, FlowControl::None);
        assert_eq!(config.timeout, Timeout::default());
        assert_eq!(config.to_string(), "9600 8N1");
    }

    #[test]
    fn test_display_7e2() {
        let config = SerialConfig::new("/dev/ttyUSB0", 115200)
            .with_byte_size(ByteSize::Seven)
            .with_parity(Parity::Even)
            .with_stop_bits(StopBits::Two);
        assert_eq!(config.to_string(), "115200 7E2");
    }

    #[test]
    fn test_byte_size_rejects_out_of_domain() {
        assert_eq!(ByteSize::try_from(5u8).unwrap(), ByteSize::Five);
        assert_eq!(ByteSize::try_from(8u8).unwrap(), ByteSize::Eight);
        assert!(matches!(
            ByteSize::try_from(9u8),
            Err(SerialError::InvalidConfiguration(_))
        ));
        assert!(ByteSize::try_from(4u8).is_err());
    }

    #[test]
    fn test_stop_bits_rejects_out_of_domain() {
        assert_eq!(StopBits::try_from(2u8).unwrap(), StopBits::Two);
        assert!(matches!(
            StopBits::try_from(3u8),
            Err(SerialError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_parity_and_flow_from_str() {
        assert_eq!("Odd".parse::<Parity>().unwrap(), Parity::Odd);
        assert_eq!("e".parse::<Parity>().unwrap(), Parity::Even);
        assert!("mark".parse::<Parity>().is_err());
        assert_eq!("RTSCTS".parse::<FlowControl>().unwrap(), FlowControl::Hardware);
        assert_eq!("software".parse::<FlowControl>().unwrap(), FlowControl::Software);
        assert!("dtr".parse::<FlowControl>().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(SerialConfig::new("COM1", 9600).validate().is_ok());
        assert!(matches!(
            SerialConfig::new("", 9600).validate(),
            Err(SerialError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            SerialConfig::new("COM1", 0).validate(),
            Err(SerialError::InvalidConfiguration(_))
        ));
    }
}
