use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{Duration, Instant};

use log::debug;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, InputFlags, SetArg, SpecialCharacterIndices,
};

use crate::config::{ByteSize, FlowControl, Parity, SerialConfig, StopBits};
use crate::error::{Result, SerialError};
use crate::timeout::{ReadTimer, Timeout};

use super::Backend;

#[cfg(target_os = "linux")]
const SYSFS_TTY: &str = "/sys/class/tty";
const DEV_DIR: &str = "/dev";

/// Call-out device prefixes scanned on systems without sysfs.
#[cfg(target_vendor = "apple")]
const CALLOUT_PREFIXES: &[&str] = &["cu."];
#[cfg(not(any(target_os = "linux", target_vendor = "apple")))]
const CALLOUT_PREFIXES: &[&str] = &["cua"];

nix::ioctl_none_bad!(tiocexcl, nix::libc::TIOCEXCL);

/// termios device backend.
///
/// The descriptor is kept non-blocking and every wait goes through `poll`,
/// which is how the read and write budgets are enforced.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermiosBackend;

impl Backend for TermiosBackend {
    type Handle = File;

    fn open(&self, config: &SerialConfig) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
            .open(&config.port)
            .map_err(|e| SerialError::from_open_error(&config.port, e))?;

        // SAFETY: the descriptor belongs to `file`, which outlives the call.
        let claimed = unsafe { tiocexcl(file.as_raw_fd()) };
        claimed.map_err(|e| SerialError::from_open_error(&config.port, e.into()))?;

        configure(&file, config)?;
        debug!("configured {} ({:?} flow control)", config.port, config.flow_control);
        Ok(file)
    }

    fn close(&self, handle: File) -> io::Result<()> {
        nix::unistd::close(handle.into_raw_fd()).map_err(io::Error::from)
    }

    fn read(&self, handle: &mut File, buf: &mut [u8], timeout: &Timeout) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut timer = ReadTimer::start(timeout, buf.len(), Instant::now());
        let mut filled = 0;
        while filled < buf.len() {
            let wait = timer.remaining(Instant::now());
            if wait == Some(Duration::ZERO) {
                break;
            }
            let Some(revents) = wait_ready(handle.as_fd(), PollFlags::POLLIN, wait)? else {
                continue;
            };
            match handle.read(&mut buf[filled..]) {
                Ok(0) if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) => {
                    // Bytes received before the hang-up are still delivered.
                    if filled > 0 {
                        break;
                    }
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device hung up"));
                }
                // VMIN=0 lets a read come back empty; the timers decide when to stop.
                Ok(0) => {}
                Ok(n) => {
                    filled += n;
                    timer.received(Instant::now());
                }
                Err(e) if is_retry(&e) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn write(&self, handle: &mut File, buf: &[u8], timeout: &Timeout) -> io::Result<usize> {
        let deadline = timeout
            .write_budget(buf.len())
            .and_then(|d| Instant::now().checked_add(d));

        let mut written = 0;
        while written < buf.len() {
            match handle.write(&buf[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let wait = deadline.map(|d| d.saturating_duration_since(Instant::now()));
                    if wait == Some(Duration::ZERO) {
                        break;
                    }
                    wait_ready(handle.as_fd(), PollFlags::POLLOUT, wait)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    fn drain(&self, handle: &mut File) -> io::Result<()> {
        termios::tcdrain(&*handle).map_err(io::Error::from)
    }

    #[cfg(target_os = "linux")]
    fn port_names(&self) -> Result<Vec<String>> {
        scan_sysfs(Path::new(SYSFS_TTY), Path::new(DEV_DIR)).map_err(SerialError::Enumeration)
    }

    #[cfg(not(target_os = "linux"))]
    fn port_names(&self) -> Result<Vec<String>> {
        scan_dev(Path::new(DEV_DIR), CALLOUT_PREFIXES).map_err(SerialError::Enumeration)
    }
}

/// Put the line into raw mode with the requested framing.
fn configure(file: &File, config: &SerialConfig) -> Result<()> {
    let baud = baud_rate(config.baud_rate).ok_or_else(|| {
        SerialError::invalid(format!("unsupported baud rate {}", config.baud_rate))
    })?;
    let os_err = |e: Errno| SerialError::from_open_error(&config.port, e.into());

    let mut tio = termios::tcgetattr(file).map_err(os_err)?;
    termios::cfmakeraw(&mut tio);

    tio.control_flags.insert(ControlFlags::CREAD | ControlFlags::CLOCAL);
    tio.control_flags.remove(ControlFlags::CSIZE);
    tio.control_flags.insert(match config.byte_size {
        ByteSize::Five => ControlFlags::CS5,
        ByteSize::Six => ControlFlags::CS6,
        ByteSize::Seven => ControlFlags::CS7,
        ByteSize::Eight => ControlFlags::CS8,
    });

    tio.control_flags.remove(ControlFlags::PARENB | ControlFlags::PARODD);
    tio.input_flags.remove(InputFlags::INPCK | InputFlags::IGNPAR);
    match config.parity {
        Parity::None => {}
        Parity::Odd => {
            tio.control_flags.insert(ControlFlags::PARENB | ControlFlags::PARODD);
            tio.input_flags.insert(InputFlags::INPCK);
        }
        Parity::Even => {
            tio.control_flags.insert(ControlFlags::PARENB);
            tio.input_flags.insert(InputFlags::INPCK);
        }
    }

    tio.control_flags
        .set(ControlFlags::CSTOPB, config.stop_bits == StopBits::Two);

    tio.control_flags.set(
        ControlFlags::CRTSCTS,
        config.flow_control == FlowControl::Hardware,
    );
    tio.input_flags.remove(InputFlags::IXANY);
    tio.input_flags.set(
        InputFlags::IXON | InputFlags::IXOFF,
        config.flow_control == FlowControl::Software,
    );

    // Reads return whatever is buffered; poll does the waiting.
    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    termios::cfsetspeed(&mut tio, baud).map_err(os_err)?;
    termios::tcsetattr(file, SetArg::TCSANOW, &tio).map_err(os_err)?;
    termios::tcflush(file, FlushArg::TCIOFLUSH).map_err(os_err)?;
    Ok(())
}

fn baud_rate(rate: u32) -> Option<BaudRate> {
    let baud = match rate {
        50 => BaudRate::B50,
        75 => BaudRate::B75,
        110 => BaudRate::B110,
        134 => BaudRate::B134,
        150 => BaudRate::B150,
        200 => BaudRate::B200,
        300 => BaudRate::B300,
        600 => BaudRate::B600,
        1200 => BaudRate::B1200,
        1800 => BaudRate::B1800,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        #[cfg(target_os = "linux")]
        460800 => BaudRate::B460800,
        #[cfg(target_os = "linux")]
        500000 => BaudRate::B500000,
        #[cfg(target_os = "linux")]
        576000 => BaudRate::B576000,
        #[cfg(target_os = "linux")]
        921600 => BaudRate::B921600,
        #[cfg(target_os = "linux")]
        1000000 => BaudRate::B1000000,
        #[cfg(target_os = "linux")]
        1152000 => BaudRate::B1152000,
        #[cfg(target_os = "linux")]
        1500000 => BaudRate::B1500000,
        #[cfg(target_os = "linux")]
        2000000 => BaudRate::B2000000,
        _ => return None,
    };
    Some(baud)
}

/// Wait for `events` on `fd`. `None` waits without limit.
///
/// Returns the reported events, or `None` when the wait ended without the
/// descriptor becoming ready, which callers treat as "check the clock and
/// try again". A closed descriptor is an error.
fn wait_ready(
    fd: BorrowedFd<'_>,
    events: PollFlags,
    limit: Option<Duration>,
) -> io::Result<Option<PollFlags>> {
    let timeout = match limit {
        None => PollTimeout::NONE,
        Some(d) => {
            let millis = d.as_nanos().div_ceil(1_000_000);
            PollTimeout::from(u16::try_from(millis).unwrap_or(u16::MAX))
        }
    };
    let mut fds = [PollFd::new(fd, events)];
    match poll(&mut fds, timeout) {
        Ok(0) | Err(Errno::EINTR) => Ok(None),
        Ok(_) => {
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            if revents.contains(PollFlags::POLLNVAL) {
                return Err(Errno::EBADF.into());
            }
            Ok(Some(revents))
        }
        Err(e) => Err(e.into()),
    }
}

fn is_retry(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Collect `/dev` paths for the entries of the sysfs tty class that are
/// backed by hardware.
///
/// Virtual terminals have no `device` link. Legacy 8250 UARTs registered on
/// the platform bus exist whether or not a port is wired, so they are
/// dropped too.
#[cfg(any(target_os = "linux", test))]
fn scan_sysfs(class_dir: &Path, dev_dir: &Path) -> io::Result<Vec<String>> {
    let mut ports = Vec::new();
    for entry in fs::read_dir(class_dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("skipping unreadable tty entry: {}", e);
                continue;
            }
        };
        let Ok(name) = entry.file_name().into_string() else {
            debug!("skipping non UTF-8 tty name {:?}", entry.file_name());
            continue;
        };
        let subsystem = match fs::read_link(entry.path().join("device").join("subsystem")) {
            Ok(link) => link,
            Err(_) => continue,
        };
        if subsystem.file_name().is_some_and(|s| s == "platform") {
            debug!("skipping platform tty {}", name);
            continue;
        }
        ports.push(format!("{}/{}", dev_dir.display(), name));
    }
    Ok(ports)
}

/// Collect `/dev` entries whose name starts with one of `prefixes`.
#[cfg(any(not(target_os = "linux"), test))]
fn scan_dev(dev_dir: &Path, prefixes: &[&str]) -> io::Result<Vec<String>> {
    let mut ports = Vec::new();
    for entry in fs::read_dir(dev_dir)? {
        let Ok(entry) = entry else { continue };
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        // FreeBSD keeps .init/.lock companions next to each call-out device.
        if name.ends_with(".init") || name.ends_with(".lock") {
            continue;
        }
        if prefixes.iter().any(|p| name.starts_with(p)) {
            ports.push(format!("{}/{}", dev_dir.display(), name));
        }
    }
    Ok(ports)
}
