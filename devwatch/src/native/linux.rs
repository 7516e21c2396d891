//! libudev backend.
//!
//! Monitors are netlink sockets created through `udev::MonitorBuilder`.
//! libudev opens them non-blocking, so `receive_device` returns `None`
//! instead of blocking when a wakeup carried nothing for us. libudev
//! reports "nothing queued" and real receive faults the same way, a null
//! device, and tells them apart only through errno.

use std::{
    collections::HashSet,
    ffi::OsStr,
    io,
    os::fd::{AsFd, AsRawFd, BorrowedFd},
    path::{Path, PathBuf},
};

use nix::errno::Errno;

use super::{NativeDevice, NativeMonitor, Subsystem};
use crate::monitor::Filter;
use crate::tracing::prelude::*;

/// The only source the `udev` crate can open: events after udev rules have
/// run.
const UDEV_SOURCE: &str = "udev";

/// libudev through the `udev` crate.
pub struct UdevSubsystem;

impl Subsystem for UdevSubsystem {
    fn name(&self) -> &'static str {
        "udev"
    }

    fn connect(&self) -> io::Result<()> {
        udev::Udev::new().map(drop)
    }

    fn new_monitor(&self, source: &str) -> io::Result<Box<dyn NativeMonitor>> {
        if source != UDEV_SOURCE {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported netlink source '{source}'"),
            ));
        }
        let builder = udev::MonitorBuilder::new()?;
        Ok(Box::new(UdevMonitor::Building(builder)))
    }

    fn enumerate(&self, filters: &[Filter]) -> io::Result<Vec<Box<dyn NativeDevice>>> {
        let mut found: Vec<Box<dyn NativeDevice>> = Vec::new();

        if filters.is_empty() {
            let mut enumerator = udev::Enumerator::new()?;
            for device in enumerator.scan_devices()? {
                found.push(Box::new(UdevRecord(device)));
            }
            return Ok(found);
        }

        // Filters are OR'ed; a device may match several of them.
        let mut seen: HashSet<PathBuf> = HashSet::new();
        for filter in filters {
            let mut enumerator = udev::Enumerator::new()?;
            enumerator.match_subsystem(&filter.subsystem)?;
            for device in enumerator.scan_devices()? {
                if !filter.matches(device.subsystem(), device.devtype()) {
                    continue;
                }
                if seen.insert(device.syspath().to_path_buf()) {
                    found.push(Box::new(UdevRecord(device)));
                }
            }
        }
        Ok(found)
    }
}

enum UdevMonitor {
    Building(udev::MonitorBuilder),
    Listening(udev::MonitorSocket),
    // A builder call failed and consumed the builder.
    Broken,
}

impl NativeMonitor for UdevMonitor {
    fn match_subsystem_devtype(
        &mut self,
        subsystem: &str,
        devtype: Option<&str>,
    ) -> io::Result<()> {
        let builder = match std::mem::replace(self, UdevMonitor::Broken) {
            UdevMonitor::Building(builder) => builder,
            other => {
                *self = other;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "monitor is no longer accepting filters",
                ));
            }
        };
        let builder = match devtype {
            Some(devtype) => builder.match_subsystem_devtype(subsystem, devtype)?,
            None => builder.match_subsystem(subsystem)?,
        };
        *self = UdevMonitor::Building(builder);
        Ok(())
    }

    fn enable_receiving(&mut self) -> io::Result<()> {
        match std::mem::replace(self, UdevMonitor::Broken) {
            UdevMonitor::Building(builder) => {
                let socket = builder.listen()?;
                trace!(fd = socket.as_raw_fd(), "udev monitor listening");
                *self = UdevMonitor::Listening(socket);
                Ok(())
            }
            UdevMonitor::Listening(socket) => {
                *self = UdevMonitor::Listening(socket);
                Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "monitor is already receiving",
                ))
            }
            UdevMonitor::Broken => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "monitor setup failed earlier",
            )),
        }
    }

    fn fd(&self) -> Option<BorrowedFd<'_>> {
        match self {
            UdevMonitor::Listening(socket) => Some(socket.as_fd()),
            _ => None,
        }
    }

    fn receive_device(&mut self) -> io::Result<Option<Box<dyn NativeDevice>>> {
        match self {
            UdevMonitor::Listening(socket) => {
                Errno::clear();
                match socket.iter().next() {
                    Some(event) => Ok(Some(
                        Box::new(UdevRecord(udev::Device::clone(&event))) as Box<dyn NativeDevice>
                    )),
                    None => empty_receive(io::Error::last_os_error()).map(|()| None),
                }
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "monitor is not receiving",
            )),
        }
    }
}

/// Classify the errno left behind by a receive that returned no device.
/// Errno 0 means libudev dropped a message without failing (filtered out
/// or from an untrusted sender).
fn empty_receive(err: io::Error) -> io::Result<()> {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(()),
        _ if err.raw_os_error() == Some(0) => Ok(()),
        _ => Err(err),
    }
}

/// One libudev device reference.
struct UdevRecord(udev::Device);

impl NativeDevice for UdevRecord {
    fn action(&self) -> Option<&OsStr> {
        self.0.action()
    }

    fn devnode(&self) -> Option<&Path> {
        self.0.devnode()
    }

    fn syspath(&self) -> &Path {
        self.0.syspath()
    }

    fn subsystem(&self) -> Option<&OsStr> {
        self.0.subsystem()
    }

    fn devtype(&self) -> Option<&OsStr> {
        self.0.devtype()
    }

    fn attribute_value(&self, name: &str) -> Option<&OsStr> {
        self.0.attribute_value(name)
    }

    fn property_value(&self, name: &str) -> Option<&OsStr> {
        self.0.property_value(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::monitor::DeviceContext;
    use std::sync::Arc;
    use test_case::test_case;

    fn listening_tty() -> Box<dyn NativeMonitor> {
        let mut monitor = UdevSubsystem.new_monitor("udev").unwrap();
        monitor.match_subsystem_devtype("tty", None).unwrap();
        monitor.enable_receiving().unwrap();
        monitor
    }

    #[test_case(0; "no errno")]
    #[test_case(Errno::EAGAIN as i32; "nothing queued")]
    #[test_case(Errno::EINTR as i32; "interrupted")]
    fn empty_receive_is_no_event(raw: i32) {
        assert!(empty_receive(io::Error::from_raw_os_error(raw)).is_ok());
    }

    #[test_case(Errno::ENOBUFS)]
    #[test_case(Errno::ENOMEM)]
    #[test_case(Errno::EINVAL)]
    fn receive_fault_is_an_error(errno: Errno) {
        let err = empty_receive(io::Error::from_raw_os_error(errno as i32)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(errno as i32));
    }

    #[test]
    fn kernel_source_is_rejected() {
        let err = UdevSubsystem.new_monitor("kernel").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        let context = DeviceContext::open_with(Arc::new(UdevSubsystem)).unwrap();
        assert!(matches!(
            context.subscribe("kernel"),
            Err(Error::SubscriptionCreateFailed { .. })
        ));
    }

    #[test]
    fn receive_before_listening_is_refused() {
        let mut monitor = UdevSubsystem.new_monitor("udev").unwrap();
        assert!(monitor.fd().is_none());
        let err = monitor.receive_device().err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn filters_rejected_once_listening() {
        let mut monitor = listening_tty();
        let err = monitor.match_subsystem_devtype("usb", None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(monitor.fd().is_some());
    }

    #[test]
    fn second_enable_keeps_listening() {
        let mut monitor = listening_tty();
        let err = monitor.enable_receiving().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert!(monitor.fd().is_some());
    }
}
