//! Backend for platforms without a usable device-notification subsystem.
//!
//! Selected by [`super::detect`] when libudev is missing or the platform has
//! no equivalent. Every call fails, so opening a context on it reports
//! `ContextUnavailable` up front instead of handing out handles that never
//! deliver anything.

use std::io;

use super::{NativeDevice, NativeMonitor, Subsystem};
use crate::monitor::Filter;

/// Stand-in subsystem that refuses every request.
#[derive(Debug, Clone)]
pub struct UnavailableSubsystem {
    reason: String,
}

impl UnavailableSubsystem {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn refuse(&self) -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, self.reason.clone())
    }
}

impl Subsystem for UnavailableSubsystem {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn connect(&self) -> io::Result<()> {
        Err(self.refuse())
    }

    fn new_monitor(&self, _source: &str) -> io::Result<Box<dyn NativeMonitor>> {
        Err(self.refuse())
    }

    fn enumerate(&self, _filters: &[Filter]) -> io::Result<Vec<Box<dyn NativeDevice>>> {
        Err(self.refuse())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_call_is_refused() {
        let subsystem = UnavailableSubsystem::new("no udev here");
        assert_eq!(
            subsystem.connect().unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
        assert!(subsystem.new_monitor("udev").is_err());
        assert!(subsystem.enumerate(&[]).is_err());
        assert_eq!(subsystem.reason(), "no udev here");
    }
}
