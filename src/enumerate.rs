use log::debug;

use crate::backend::{Backend, NativeBackend};
use crate::error::Result;

/// List the serial devices currently present, sorted by name.
///
/// Every call queries the OS afresh. An empty list is a normal result; an
/// error means the device registry itself could not be queried.
pub fn list_ports() -> Result<Vec<String>> {
    list_ports_with(&NativeBackend::default())
}

/// [`list_ports`] against an explicit backend.
///
/// Names are ordered by plain string comparison, so `COM10` sorts before
/// `COM2`.
pub fn list_ports_with<B: Backend>(backend: &B) -> Result<Vec<String>> {
    let mut ports = backend.port_names()?;
    ports.sort();
    debug!("found {} serial port(s): {:?}", ports.len(), ports);
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::error::SerialError;

    #[test]
    fn test_sorted_by_string_order() {
        let backend = MockBackend::default();
        backend.state().listed = vec!["COM10".into(), "COM2".into(), "COM1".into()];
        assert_eq!(list_ports_with(&backend).unwrap(), ["COM1", "COM10", "COM2"]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let backend = MockBackend::default();
        backend.state().listed = vec!["COM3".into(), "COM3".into()];
        assert_eq!(list_ports_with(&backend).unwrap(), ["COM3", "COM3"]);
    }

    #[test]
    fn test_no_devices_is_empty_not_error() {
        let backend = MockBackend::default();
        assert!(list_ports_with(&backend).unwrap().is_empty());
    }

    #[test]
    fn test_registry_failure_is_enumeration_error() {
        let backend = MockBackend::default();
        backend.state().fail_listing = true;
        assert!(matches!(
            list_ports_with(&backend),
            Err(SerialError::Enumeration(_))
        ));
    }
}
