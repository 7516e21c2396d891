//! In-process loopback backend.
//!
//! `SyntheticSubsystem` behaves like a netlink device monitor without
//! touching the kernel: each monitor owns one end of a Unix socket pair and
//! every injected record writes a wakeup byte to the other end, so the
//! descriptor really becomes readable and the dispatcher's poll path is
//! exercised exactly as with libudev.
//!
//! Records are delivered only to monitors that are receiving and whose
//! filters match, mirroring the kernel-side filtering of a real monitor.

use std::{
    collections::{HashMap, VecDeque},
    ffi::OsStr,
    io::{self, Read, Write},
    os::{
        fd::{AsFd, BorrowedFd},
        unix::net::UnixStream,
    },
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;

use super::{NativeDevice, NativeMonitor, Subsystem};
use crate::monitor::Filter;
use crate::tracing::prelude::*;

const SOURCES: &[&str] = &["udev", "kernel"];

static NEXT_SYSNUM: AtomicU64 = AtomicU64::new(0);

/// A fabricated device record.
#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    action: Option<String>,
    devnode: Option<PathBuf>,
    syspath: PathBuf,
    subsystem: Option<String>,
    devtype: Option<String>,
    attributes: HashMap<String, String>,
    properties: HashMap<String, String>,
}

impl SyntheticDevice {
    /// A record carrying `action` for a device of `subsystem`.
    pub fn new(action: &str, subsystem: &str) -> Self {
        let n = NEXT_SYSNUM.fetch_add(1, Ordering::Relaxed);
        Self {
            action: Some(action.to_string()),
            devnode: None,
            syspath: PathBuf::from(format!("/sys/devices/virtual/{subsystem}/synthetic{n}")),
            subsystem: Some(subsystem.to_string()),
            devtype: None,
            attributes: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    /// A record with no action, which the event reader rejects.
    pub fn malformed(subsystem: &str) -> Self {
        Self {
            action: None,
            ..Self::new("", subsystem)
        }
    }

    /// A present device as returned by enumeration.
    pub fn present(subsystem: &str) -> Self {
        Self {
            action: None,
            ..Self::new("", subsystem)
        }
    }

    pub fn devnode(mut self, devnode: impl Into<PathBuf>) -> Self {
        self.devnode = Some(devnode.into());
        self
    }

    pub fn syspath(mut self, syspath: impl Into<PathBuf>) -> Self {
        self.syspath = syspath.into();
        self
    }

    pub fn devtype(mut self, devtype: &str) -> Self {
        self.devtype = Some(devtype.to_string());
        self
    }

    pub fn attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn property(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_string(), value.to_string());
        self
    }

    fn matches_any(&self, filters: &[Filter]) -> bool {
        filters.is_empty()
            || filters.iter().any(|f| {
                f.matches(
                    self.subsystem.as_deref().map(OsStr::new),
                    self.devtype.as_deref().map(OsStr::new),
                )
            })
    }
}

impl NativeDevice for SyntheticDevice {
    fn action(&self) -> Option<&OsStr> {
        self.action.as_deref().map(OsStr::new)
    }

    fn devnode(&self) -> Option<&Path> {
        self.devnode.as_deref()
    }

    fn syspath(&self) -> &Path {
        &self.syspath
    }

    fn subsystem(&self) -> Option<&OsStr> {
        self.subsystem.as_deref().map(OsStr::new)
    }

    fn devtype(&self) -> Option<&OsStr> {
        self.devtype.as_deref().map(OsStr::new)
    }

    fn attribute_value(&self, name: &str) -> Option<&OsStr> {
        self.attributes.get(name).map(|v| OsStr::new(v.as_str()))
    }

    fn property_value(&self, name: &str) -> Option<&OsStr> {
        self.properties.get(name).map(|v| OsStr::new(v.as_str()))
    }
}

enum Delivery {
    Device(SyntheticDevice),
    Fault(String),
}

// State shared between a monitor and the subsystem that injects into it.
struct Channel {
    filters: Mutex<Vec<Filter>>,
    receiving: AtomicBool,
    queue: Mutex<VecDeque<Delivery>>,
    waker: Mutex<Option<UnixStream>>,
}

impl Channel {
    fn push(&self, delivery: Delivery) -> bool {
        let mut waker = self.waker.lock();
        let Some(stream) = waker.as_mut() else {
            return false;
        };
        self.queue.lock().push_back(delivery);
        if let Err(e) = stream.write_all(&[1]) {
            warn!(error = %e, "Failed to wake synthetic monitor");
            return false;
        }
        true
    }

    fn wake(&self) {
        if let Some(stream) = self.waker.lock().as_mut() {
            let _ = stream.write_all(&[1]);
        }
    }
}

#[derive(Default)]
struct Shared {
    channels: Vec<Weak<Channel>>,
    present: Vec<SyntheticDevice>,
}

/// Loopback device-notification subsystem.
#[derive(Clone, Default)]
pub struct SyntheticSubsystem {
    shared: Arc<Mutex<Shared>>,
    fail_activation: Arc<AtomicBool>,
}

impl SyntheticSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device to the set returned by enumeration.
    pub fn plug(&self, device: SyntheticDevice) {
        self.shared.lock().present.push(device);
    }

    /// Make the next activations fail.
    pub fn fail_activation(&self, fail: bool) {
        self.fail_activation.store(fail, Ordering::SeqCst);
    }

    /// Deliver a record to every receiving monitor whose filters match.
    /// Returns the number of monitors it reached.
    pub fn inject(&self, device: SyntheticDevice) -> usize {
        self.receiving_channels()
            .iter()
            .filter(|channel| device.matches_any(&channel.filters.lock()))
            .filter(|channel| channel.push(Delivery::Device(device.clone())))
            .count()
    }

    /// Make the next receive on every receiving monitor fail.
    pub fn inject_fault(&self, reason: &str) -> usize {
        self.receiving_channels()
            .iter()
            .filter(|channel| channel.push(Delivery::Fault(reason.to_string())))
            .count()
    }

    /// Make descriptors readable without queueing anything.
    pub fn spurious_wakeup(&self) {
        for channel in self.receiving_channels() {
            channel.wake();
        }
    }

    /// Close the write side of every monitor, so their descriptors report
    /// hang-up.
    pub fn hang_up(&self) {
        for channel in self.receiving_channels() {
            channel.waker.lock().take();
        }
    }

    fn receiving_channels(&self) -> Vec<Arc<Channel>> {
        let mut shared = self.shared.lock();
        shared.channels.retain(|weak| weak.strong_count() > 0);
        shared
            .channels
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|channel| channel.receiving.load(Ordering::SeqCst))
            .collect()
    }
}

impl Subsystem for SyntheticSubsystem {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn connect(&self) -> io::Result<()> {
        Ok(())
    }

    fn new_monitor(&self, source: &str) -> io::Result<Box<dyn NativeMonitor>> {
        if !SOURCES.contains(&source) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown event source '{source}'"),
            ));
        }

        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;

        let channel = Arc::new(Channel {
            filters: Mutex::new(Vec::new()),
            receiving: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            waker: Mutex::new(Some(writer)),
        });
        self.shared.lock().channels.push(Arc::downgrade(&channel));

        Ok(Box::new(SyntheticMonitor {
            channel,
            reader,
            fail_activation: self.fail_activation.clone(),
        }))
    }

    fn enumerate(&self, filters: &[Filter]) -> io::Result<Vec<Box<dyn NativeDevice>>> {
        Ok(self
            .shared
            .lock()
            .present
            .iter()
            .filter(|device| device.matches_any(filters))
            .map(|device| Box::new(device.clone()) as Box<dyn NativeDevice>)
            .collect())
    }
}

struct SyntheticMonitor {
    channel: Arc<Channel>,
    reader: UnixStream,
    fail_activation: Arc<AtomicBool>,
}

impl NativeMonitor for SyntheticMonitor {
    fn match_subsystem_devtype(
        &mut self,
        subsystem: &str,
        devtype: Option<&str>,
    ) -> io::Result<()> {
        if self.channel.receiving.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "monitor is already receiving",
            ));
        }
        let filter = Filter {
            subsystem: subsystem.to_string(),
            devtype: devtype.map(str::to_string),
        };
        self.channel.filters.lock().push(filter);
        Ok(())
    }

    fn enable_receiving(&mut self) -> io::Result<()> {
        if self.fail_activation.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "netlink bind refused",
            ));
        }
        if self.channel.receiving.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "monitor is already receiving",
            ));
        }
        Ok(())
    }

    fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.channel
            .receiving
            .load(Ordering::SeqCst)
            .then(|| self.reader.as_fd())
    }

    fn receive_device(&mut self) -> io::Result<Option<Box<dyn NativeDevice>>> {
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte) {
            // Peer hung up; the poll loop sees POLLHUP.
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        }

        match self.channel.queue.lock().pop_front() {
            Some(Delivery::Device(device)) => Ok(Some(Box::new(device))),
            Some(Delivery::Fault(reason)) => Err(io::Error::other(reason)),
            None => Ok(None),
        }
    }
}
