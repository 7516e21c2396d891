//! Native device-notification boundary.
//!
//! These traits model the calls the monitoring layer makes into the
//! platform's device-notification library: context creation, monitor
//! creation from a named source, subsystem/devtype filter registration,
//! activation, descriptor retrieval, receiving one device, and per-device
//! field and attribute queries. Releasing a native handle is `Drop`.
//!
//! Which backend is used is decided at runtime by [`detect`]. On Linux that
//! is libudev through the `udev` crate; everywhere else (or when libudev
//! cannot be initialized) it is [`UnavailableSubsystem`], which fails fast.
//! [`SyntheticSubsystem`] is an in-process loopback used by tests and dry
//! runs.

use std::{ffi::OsStr, io, os::fd::BorrowedFd, path::Path, sync::Arc};

use crate::monitor::Filter;

#[cfg(target_os = "linux")]
mod linux;
pub mod synthetic;
mod unavailable;

#[cfg(target_os = "linux")]
pub use linux::UdevSubsystem;
pub use synthetic::{SyntheticDevice, SyntheticSubsystem};
pub use unavailable::UnavailableSubsystem;

/// A device-notification subsystem (libudev or a stand-in).
pub trait Subsystem: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Check that the subsystem is usable. Must not block.
    fn connect(&self) -> io::Result<()>;

    /// Create a monitor on the named event source (e.g. "udev").
    fn new_monitor(&self, source: &str) -> io::Result<Box<dyn NativeMonitor>>;

    /// List present devices matching any filter; all devices when `filters`
    /// is empty.
    fn enumerate(&self, filters: &[Filter]) -> io::Result<Vec<Box<dyn NativeDevice>>>;
}

/// A native monitor, first configured and then listening.
pub trait NativeMonitor {
    /// Register a subsystem/devtype match. Only valid before
    /// `enable_receiving`.
    fn match_subsystem_devtype(&mut self, subsystem: &str, devtype: Option<&str>)
        -> io::Result<()>;

    /// Start receiving events.
    fn enable_receiving(&mut self) -> io::Result<()>;

    /// The pollable descriptor, present once receiving.
    fn fd(&self) -> Option<BorrowedFd<'_>>;

    /// Receive one device without blocking. `Ok(None)` when nothing is
    /// queued.
    fn receive_device(&mut self) -> io::Result<Option<Box<dyn NativeDevice>>>;
}

/// A native device record. Dropping it releases the native reference.
pub trait NativeDevice {
    fn action(&self) -> Option<&OsStr>;
    fn devnode(&self) -> Option<&Path>;
    fn syspath(&self) -> &Path;
    fn subsystem(&self) -> Option<&OsStr>;
    fn devtype(&self) -> Option<&OsStr>;

    /// Read a sysfs attribute of the device.
    fn attribute_value(&self, name: &str) -> Option<&OsStr>;

    /// Read a udev property of the device.
    fn property_value(&self, name: &str) -> Option<&OsStr>;
}

/// Pick the backend for this platform by probing it.
#[cfg(target_os = "linux")]
pub fn detect() -> Arc<dyn Subsystem> {
    let udev = UdevSubsystem;
    match udev.connect() {
        Ok(()) => Arc::new(udev),
        Err(e) => Arc::new(UnavailableSubsystem::new(format!(
            "libudev could not be initialized: {e}"
        ))),
    }
}

/// Pick the backend for this platform by probing it.
#[cfg(not(target_os = "linux"))]
pub fn detect() -> Arc<dyn Subsystem> {
    Arc::new(UnavailableSubsystem::new(
        "device notifications are only supported on Linux",
    ))
}
