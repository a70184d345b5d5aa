use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::SerialConfig;
use crate::error::{Result, SerialError};
use crate::timeout::Timeout;

use super::Backend;

/// Observable state shared between a test and the handles it opens.
#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// Devices that can be opened.
    pub devices: Vec<String>,
    /// Names reported by `port_names`, in "OS" order.
    pub listed: Vec<String>,
    pub fail_listing: bool,
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    /// Per-call cap on accepted bytes, simulating a write timeout.
    pub write_limit: Option<usize>,
    pub fail_io: bool,
    pub opens: usize,
    pub closes: usize,
    pub drains: usize,
    pub last_config: Option<SerialConfig>,
    next_id: u32,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct MockHandle {
    pub id: u32,
}

impl MockBackend {
    pub fn with_devices(devices: &[&str]) -> Self {
        let backend = Self::default();
        backend.state().devices = devices.iter().map(|d| d.to_string()).collect();
        backend
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Backend for MockBackend {
    type Handle = MockHandle;

    fn open(&self, config: &SerialConfig) -> Result<MockHandle> {
        let mut state = self.state();
        if !state.devices.contains(&config.port) {
            return Err(SerialError::from_open_error(
                &config.port,
                io::Error::from(io::ErrorKind::NotFound),
            ));
        }
        state.opens += 1;
        state.next_id += 1;
        state.last_config = Some(config.clone());
        Ok(MockHandle { id: state.next_id })
    }

    fn close(&self, _handle: MockHandle) -> io::Result<()> {
        self.state().closes += 1;
        Ok(())
    }

    fn read(&self, _handle: &mut MockHandle, buf: &mut [u8], _timeout: &Timeout) -> io::Result<usize> {
        let mut state = self.state();
        if state.fail_io {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, _handle: &mut MockHandle, buf: &[u8], _timeout: &Timeout) -> io::Result<usize> {
        let mut state = self.state();
        if state.fail_io {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        let n = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.tx.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn drain(&self, _handle: &mut MockHandle) -> io::Result<()> {
        self.state().drains += 1;
        Ok(())
    }

    fn port_names(&self) -> Result<Vec<String>> {
        let state = self.state();
        if state.fail_listing {
            return Err(SerialError::Enumeration(io::Error::other("class query failed")));
        }
        Ok(state.listed.clone())
    }
}
