use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::mem;
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::{AsRawHandle, IntoRawHandle};
use std::ptr;

use log::debug;
use windows_sys::Win32::Devices::Communication::{
    COMMTIMEOUTS, DCB, EVENPARITY, GetCommState, NOPARITY, ODDPARITY, ONESTOPBIT,
    SetCommState, SetCommTimeouts, TWOSTOPBITS,
};
use windows_sys::Win32::Devices::DeviceAndDriverInstallation::{
    DICS_FLAG_GLOBAL, DIGCF_PRESENT, DIREG_DEV, GUID_DEVCLASS_PORTS, HDEVINFO, SP_DEVINFO_DATA,
    SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInfo, SetupDiGetClassDevsW,
    SetupDiOpenDevRegKey,
};
use windows_sys::Win32::Foundation::{CloseHandle, ERROR_SUCCESS, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::ReadFile;
use windows_sys::Win32::System::Registry::{HKEY, KEY_READ, REG_SZ, RegCloseKey, RegQueryValueExW};

use crate::config::{FlowControl, Parity, SerialConfig, StopBits};
use crate::error::{Result, SerialError};
use crate::timeout::Timeout;

use super::Backend;

const MAX_PATH: usize = 260;
const XON: i8 = 0x11;
const XOFF: i8 = 0x13;

// DCB bitfield layout, low bit first.
const F_BINARY: u32 = 1 << 0;
const F_PARITY: u32 = 1 << 1;
const F_OUTX_CTS_FLOW: u32 = 1 << 2;
const F_OUTX_DSR_FLOW: u32 = 1 << 3;
const F_DTR_CONTROL_SHIFT: u32 = 4;
const F_DSR_SENSITIVITY: u32 = 1 << 6;
const F_OUTX: u32 = 1 << 8;
const F_INX: u32 = 1 << 9;
const F_NULL: u32 = 1 << 11;
const F_RTS_CONTROL_SHIFT: u32 = 12;
const F_ABORT_ON_ERROR: u32 = 1 << 14;
const DTR_CONTROL_ENABLE: u32 = 1;
const RTS_CONTROL_ENABLE: u32 = 1;
const RTS_CONTROL_HANDSHAKE: u32 = 2;

/// Win32 communications device backend.
///
/// Timeouts are handed to the driver through `SetCommTimeouts` when the
/// port is opened; reads and writes are plain synchronous file calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommBackend;

impl Backend for CommBackend {
    type Handle = File;

    fn open(&self, config: &SerialConfig) -> Result<File> {
        let path = device_path(&config.port);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .share_mode(0)
            .open(&path)
            .map_err(|e| SerialError::from_open_error(&config.port, e))?;

        let handle = file.as_raw_handle() as HANDLE;
        let os_err = || SerialError::from_open_error(&config.port, io::Error::last_os_error());

        // SAFETY: `handle` is the open handle owned by `file`; the structs are plain data.
        unsafe {
            let mut dcb: DCB = mem::zeroed();
            dcb.DCBlength = mem::size_of::<DCB>() as u32;
            if GetCommState(handle, &mut dcb) == 0 {
                return Err(os_err());
            }
            apply_line_settings(&mut dcb, config);
            if SetCommState(handle, &dcb) == 0 {
                return Err(os_err());
            }

            let timeouts = comm_timeouts(&config.timeout);
            if SetCommTimeouts(handle, &timeouts) == 0 {
                return Err(os_err());
            }
        }

        debug!("configured {} via {}", config.port, path);
        Ok(file)
    }

    fn close(&self, handle: File) -> io::Result<()> {
        // SAFETY: ownership of the handle moves out of `handle` and is closed once.
        if unsafe { CloseHandle(handle.into_raw_handle() as HANDLE) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Calls `ReadFile` directly: `File::read` reports `ERROR_BROKEN_PIPE`
    /// as end of file, which would look like an expired timeout here.
    fn read(&self, handle: &mut File, buf: &mut [u8], _timeout: &Timeout) -> io::Result<usize> {
        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let mut read = 0u32;
        // SAFETY: `buf` is valid for `len` bytes and the handle is open and synchronous.
        let ok = unsafe {
            ReadFile(
                handle.as_raw_handle() as HANDLE,
                buf.as_mut_ptr(),
                len,
                &mut read,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(read as usize)
    }

    fn write(&self, handle: &mut File, buf: &[u8], _timeout: &Timeout) -> io::Result<usize> {
        handle.write(buf)
    }

    fn drain(&self, handle: &mut File) -> io::Result<()> {
        // FlushFileBuffers on a comm handle waits for the transmit queue to empty.
        handle.sync_all()
    }

    fn port_names(&self) -> Result<Vec<String>> {
        let set = DeviceInfoSet::ports().map_err(SerialError::Enumeration)?;
        let mut ports = Vec::new();

        for index in 0.. {
            // SAFETY: SP_DEVINFO_DATA is plain data; cbSize is set as the API requires.
            let mut data: SP_DEVINFO_DATA = unsafe { mem::zeroed() };
            data.cbSize = mem::size_of::<SP_DEVINFO_DATA>() as u32;
            if unsafe { SetupDiEnumDeviceInfo(set.0, index, &mut data) } == 0 {
                break;
            }

            match port_name(&set, &data) {
                Some(name) if name.starts_with("LPT") => {
                    debug!("skipping parallel port {}", name);
                }
                Some(name) => ports.push(name),
                None => debug!("skipping device {} without a readable port name", index),
            }
        }

        Ok(ports)
    }
}

/// `COM10` and above only open through the device namespace.
fn device_path(port: &str) -> String {
    if port.starts_with(r"\\.\") {
        port.to_string()
    } else {
        format!(r"\\.\{port}")
    }
}

fn apply_line_settings(dcb: &mut DCB, config: &SerialConfig) {
    dcb.BaudRate = config.baud_rate;
    dcb.ByteSize = config.byte_size.bits();
    dcb.Parity = match config.parity {
        Parity::None => NOPARITY,
        Parity::Odd => ODDPARITY,
        Parity::Even => EVENPARITY,
    };
    dcb.StopBits = match config.stop_bits {
        StopBits::One => ONESTOPBIT,
        StopBits::Two => TWOSTOPBITS,
    };

    let mut bits = dcb._bitfield;
    bits &= !(F_PARITY
        | F_OUTX_CTS_FLOW
        | F_OUTX_DSR_FLOW
        | (0b11 << F_DTR_CONTROL_SHIFT)
        | F_DSR_SENSITIVITY
        | F_OUTX
        | F_INX
        | F_NULL
        | (0b11 << F_RTS_CONTROL_SHIFT)
        | F_ABORT_ON_ERROR);
    bits |= F_BINARY | (DTR_CONTROL_ENABLE << F_DTR_CONTROL_SHIFT);
    if config.parity != Parity::None {
        bits |= F_PARITY;
    }
    match config.flow_control {
        FlowControl::None => bits |= RTS_CONTROL_ENABLE << F_RTS_CONTROL_SHIFT,
        FlowControl::Software => {
            bits |= F_OUTX | F_INX | (RTS_CONTROL_ENABLE << F_RTS_CONTROL_SHIFT);
            dcb.XonChar = XON;
            dcb.XoffChar = XOFF;
        }
        FlowControl::Hardware => {
            bits |= F_OUTX_CTS_FLOW | (RTS_CONTROL_HANDSHAKE << F_RTS_CONTROL_SHIFT);
        }
    }
    dcb._bitfield = bits;
}

fn comm_timeouts(timeout: &Timeout) -> COMMTIMEOUTS {
    let millis = |d: std::time::Duration| u32::try_from(d.as_millis()).unwrap_or(u32::MAX);
    COMMTIMEOUTS {
        ReadIntervalTimeout: millis(timeout.read_interval_timeout),
        ReadTotalTimeoutMultiplier: millis(timeout.read_total_timeout_multiplier),
        ReadTotalTimeoutConstant: millis(timeout.read_total_timeout_constant),
        WriteTotalTimeoutMultiplier: millis(timeout.write_total_timeout_multiplier),
        WriteTotalTimeoutConstant: millis(timeout.write_total_timeout_constant),
    }
}

/// Present members of the Ports device class, destroyed on drop.
struct DeviceInfoSet(HDEVINFO);

impl DeviceInfoSet {
    fn ports() -> io::Result<Self> {
        // SAFETY: the GUID is a static; null enumerator and parent window are allowed.
        let set = unsafe {
            SetupDiGetClassDevsW(
                &GUID_DEVCLASS_PORTS,
                ptr::null(),
                ptr::null_mut(),
                DIGCF_PRESENT,
            )
        };
        if set == INVALID_HANDLE_VALUE as HDEVINFO {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(set))
    }
}

impl Drop for DeviceInfoSet {
    fn drop(&mut self) {
        // SAFETY: the set was returned by SetupDiGetClassDevsW and is destroyed once.
        unsafe { SetupDiDestroyDeviceInfoList(self.0) };
    }
}

/// Read the `PortName` value from the device's hardware registry key.
fn port_name(set: &DeviceInfoSet, data: &SP_DEVINFO_DATA) -> Option<String> {
    // SAFETY: `set` and `data` come from a successful enumeration step.
    let key: HKEY =
        unsafe { SetupDiOpenDevRegKey(set.0, data, DICS_FLAG_GLOBAL, 0, DIREG_DEV, KEY_READ) };
    if key == INVALID_HANDLE_VALUE as HKEY {
        return None;
    }

    let value_name = wide("PortName");
    let mut buf = [0u16; MAX_PATH];
    let mut size = mem::size_of_val(&buf) as u32;
    let mut kind = 0u32;
    // SAFETY: `buf` is `size` bytes long and the key is open until RegCloseKey.
    let status = unsafe {
        let status = RegQueryValueExW(
            key,
            value_name.as_ptr(),
            ptr::null(),
            &mut kind,
            buf.as_mut_ptr().cast(),
            &mut size,
        );
        RegCloseKey(key);
        status
    };
    if status != ERROR_SUCCESS || kind != REG_SZ {
        return None;
    }

    let units = (size as usize / mem::size_of::<u16>()).min(buf.len());
    from_wide(&buf[..units])
}

/// UTF-16 with a terminating NUL, for Win32 string parameters.
fn wide(s: &str) -> Vec<u16> {
    OsString::from(s).encode_wide().chain(Some(0)).collect()
}

/// Decode a possibly NUL-terminated UTF-16 buffer; `None` when not valid Unicode.
fn from_wide(units: &[u16]) -> Option<String> {
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    OsString::from_wide(&units[..end]).into_string().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ByteSize;

    #[test]
    fn test_device_path_prefixes_namespace() {
        assert_eq!(device_path("COM3"), r"\\.\COM3");
        assert_eq!(device_path(r"\\.\COM12"), r"\\.\COM12");
    }

    #[test]
    fn test_wide_round_trip() {
        let encoded = wide("COM7");
        assert_eq!(encoded.last(), Some(&0));
        assert_eq!(from_wide(&encoded).as_deref(), Some("COM7"));
        assert_eq!(from_wide(&[0xD800]), None);
    }

    #[test]
    fn test_line_settings() {
        let config = SerialConfig::new("COM1", 57600)
            .with_byte_size(ByteSize::Seven)
            .with_parity(Parity::Odd)
            .with_stop_bits(StopBits::Two)
            .with_flow_control(FlowControl::Hardware);
        let mut dcb: DCB = unsafe { mem::zeroed() };
        apply_line_settings(&mut dcb, &config);

        assert_eq!(dcb.BaudRate, 57600);
        assert_eq!(dcb.ByteSize, 7);
        assert_eq!(dcb.Parity, ODDPARITY);
        assert_eq!(dcb.StopBits, TWOSTOPBITS);
        assert_ne!(dcb._bitfield & F_BINARY, 0);
        assert_ne!(dcb._bitfield & F_PARITY, 0);
        assert_ne!(dcb._bitfield & F_OUTX_CTS_FLOW, 0);
        assert_eq!((dcb._bitfield >> F_RTS_CONTROL_SHIFT) & 0b11, RTS_CONTROL_HANDSHAKE);
    }

    #[test]
    fn test_comm_timeouts_in_millis() {
        let t = comm_timeouts(&Timeout::default());
        assert_eq!(t.ReadIntervalTimeout, 50);
        assert_eq!(t.ReadTotalTimeoutConstant, 50);
        assert_eq!(t.ReadTotalTimeoutMultiplier, 50);
        assert_eq!(t.WriteTotalTimeoutConstant, 50);
        assert_eq!(t.WriteTotalTimeoutMultiplier, 10);
    }
}
