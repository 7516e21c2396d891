//! Monitor subscriptions and the event reader.
//!
//! A subscription moves through two phases: configuring, where filters may
//! be added, and active, where its descriptor can be polled and events
//! read. The transition happens exactly once, through `activate`.

use std::{
    os::fd::BorrowedFd,
    sync::{Arc, Weak},
};

use super::{context::ContextInner, DeviceEvent, Filter};
use crate::error::{Error, Result};
use crate::native::NativeMonitor;
use crate::tracing::prelude::*;

/// A filtered channel of device notifications bound to a
/// [`super::DeviceContext`].
///
/// Only one thread may read from a subscription at a time, which `&mut
/// self` on [`read_event`](Self::read_event) enforces.
pub struct MonitorSubscription {
    // Validation only: the context owns the session, not us.
    context: Weak<ContextInner>,
    source: String,
    filters: Vec<Filter>,
    active: bool,
    monitor: Box<dyn NativeMonitor>,
}

impl MonitorSubscription {
    pub(crate) fn create(context: &Arc<ContextInner>, source: &str) -> Result<Self> {
        let monitor = context.subsystem.new_monitor(source).map_err(|e| {
            Error::SubscriptionCreateFailed {
                source_name: source.to_string(),
                reason: e.to_string(),
            }
        })?;
        context.subscription_opened();
        debug!(source, "Subscription created");

        Ok(Self {
            context: Arc::downgrade(context),
            source: source.to_string(),
            filters: Vec::new(),
            active: false,
            monitor,
        })
    }

    fn context(&self) -> Result<Arc<ContextInner>> {
        self.context.upgrade().ok_or(Error::UseAfterClose)
    }

    /// Restrict delivery to devices of `subsystem` (and `devtype`, if
    /// given). Multiple filters are OR'ed. Only allowed before activation.
    pub fn add_filter(&mut self, subsystem: &str, devtype: Option<&str>) -> Result<()> {
        self.context()?;

        let filter = Filter {
            subsystem: subsystem.to_string(),
            devtype: devtype.map(str::to_string),
        };
        let invalid = |reason: String| Error::InvalidFilter {
            filter: filter.to_string(),
            reason,
        };

        if self.active {
            return Err(invalid("subscription already activated".into()));
        }
        if subsystem.is_empty() {
            return Err(invalid("empty subsystem".into()));
        }
        if devtype == Some("") {
            return Err(invalid("empty devtype".into()));
        }
        self.monitor
            .match_subsystem_devtype(subsystem, devtype)
            .map_err(|e| invalid(e.to_string()))?;

        debug!(source = %self.source, filter = %filter, "Filter added");
        self.filters.push(filter);
        Ok(())
    }

    /// Begin receiving events. May only succeed once.
    pub fn activate(&mut self) -> Result<()> {
        self.context()?;
        if self.active {
            return Err(Error::AlreadyActivated);
        }
        self.monitor
            .enable_receiving()
            .map_err(|e| Error::ActivationFailed(e.to_string()))?;
        self.active = true;

        info!(
            source = %self.source,
            filters = ?self.filters.iter().map(Filter::to_string).collect::<Vec<_>>(),
            "Subscription active"
        );
        Ok(())
    }

    /// The descriptor to poll for readability. Valid until the
    /// subscription is released.
    pub fn descriptor(&self) -> Result<BorrowedFd<'_>> {
        self.context()?;
        if !self.active {
            return Err(Error::NotActivated);
        }
        self.monitor
            .fd()
            .ok_or_else(|| Error::PollFailed("monitor has no descriptor".into()))
    }

    /// Read at most one event without blocking.
    ///
    /// `Ok(None)` means the wakeup carried nothing (re-poll). A subsystem
    /// error or malformed record is [`Error::ReadFailed`].
    pub fn read_event(&mut self) -> Result<Option<DeviceEvent>> {
        self.context()?;
        if !self.active {
            return Err(Error::NotActivated);
        }

        let record = match self.monitor.receive_device() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(e) => return Err(Error::ReadFailed(e.to_string())),
        };
        let event = DeviceEvent::decode(record)?;
        trace!(
            action = %event.action(),
            devnode = ?event.device_node(),
            syspath = %event.syspath().display(),
            "Device event"
        );
        Ok(Some(event))
    }

    /// Present devices matching this subscription's filters.
    pub fn enumerate_matching(&self) -> Result<Vec<DeviceEvent>> {
        self.context()?.enumerate(&self.filters)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Tear the subscription down. Dropping it does the same.
    pub fn release(self) {}
}

impl Drop for MonitorSubscription {
    fn drop(&mut self) {
        match self.context.upgrade() {
            Some(context) => {
                context.subscription_released();
                debug!(source = %self.source, "Subscription released");
            }
            None => warn!(source = %self.source, "Subscription released after its context"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{Action, DeviceContext};
    use crate::native::{SyntheticDevice, SyntheticSubsystem};
    use std::path::Path;

    fn setup() -> (SyntheticSubsystem, DeviceContext) {
        let synthetic = SyntheticSubsystem::new();
        let context = DeviceContext::open_with(Arc::new(synthetic.clone())).unwrap();
        (synthetic, context)
    }

    #[test]
    fn unknown_source_fails_creation() {
        let (_synthetic, context) = setup();
        assert!(matches!(
            context.subscribe("netlink-bogus"),
            Err(Error::SubscriptionCreateFailed { source_name, .. }) if source_name == "netlink-bogus"
        ));
        assert_eq!(context.live_subscriptions(), 0);
    }

    #[test]
    fn filters_rejected_after_activation() {
        let (_synthetic, context) = setup();
        let mut subscription = context.subscribe("udev").unwrap();
        subscription.add_filter("tty", None).unwrap();
        subscription.add_filter("usb", Some("usb_device")).unwrap();
        subscription.activate().unwrap();

        for (subsystem, devtype) in [("tty", None), ("block", Some("disk"))] {
            assert!(matches!(
                subscription.add_filter(subsystem, devtype),
                Err(Error::InvalidFilter { .. })
            ));
        }
        assert_eq!(subscription.filters().len(), 2);
    }

    #[test]
    fn empty_filter_names_are_invalid() {
        let (_synthetic, context) = setup();
        let mut subscription = context.subscribe("udev").unwrap();
        assert!(matches!(
            subscription.add_filter("", None),
            Err(Error::InvalidFilter { .. })
        ));
        assert!(matches!(
            subscription.add_filter("usb", Some("")),
            Err(Error::InvalidFilter { .. })
        ));
        assert!(subscription.filters().is_empty());
    }

    #[test]
    fn second_activation_fails_and_does_not_rearm() {
        let (synthetic, context) = setup();
        let mut subscription = context.subscribe("udev").unwrap();
        subscription.activate().unwrap();
        assert!(matches!(subscription.activate(), Err(Error::AlreadyActivated)));
        assert!(subscription.is_active());

        // Still a single registration: one injection reaches one reader.
        assert_eq!(synthetic.inject(SyntheticDevice::new("add", "tty")), 1);
        assert!(subscription.read_event().unwrap().is_some());
        assert!(subscription.read_event().unwrap().is_none());
    }

    #[test]
    fn activation_failure_is_reported() {
        let (synthetic, context) = setup();
        synthetic.fail_activation(true);
        let mut subscription = context.subscribe("udev").unwrap();
        assert!(matches!(
            subscription.activate(),
            Err(Error::ActivationFailed(_))
        ));
        assert!(!subscription.is_active());
    }

    #[test]
    fn descriptor_and_reads_need_activation() {
        let (_synthetic, context) = setup();
        let mut subscription = context.subscribe("udev").unwrap();
        assert!(matches!(subscription.descriptor(), Err(Error::NotActivated)));
        assert!(matches!(subscription.read_event(), Err(Error::NotActivated)));

        subscription.activate().unwrap();
        assert!(subscription.descriptor().is_ok());
    }

    #[test]
    fn reads_added_tty() {
        let (synthetic, context) = setup();
        let mut subscription = context.subscribe("udev").unwrap();
        subscription.add_filter("tty", None).unwrap();
        subscription.activate().unwrap();

        synthetic.inject(SyntheticDevice::new("add", "tty").devnode("/dev/ttyUSB0"));

        let event = subscription.read_event().unwrap().expect("event");
        assert_eq!(event.action(), Action::Added);
        assert_eq!(event.device_node(), Some(Path::new("/dev/ttyUSB0")));
    }

    #[test]
    fn filters_are_ored() {
        let (synthetic, context) = setup();
        let mut subscription = context.subscribe("udev").unwrap();
        subscription.add_filter("tty", None).unwrap();
        subscription.add_filter("usb", Some("usb_device")).unwrap();
        subscription.activate().unwrap();

        assert_eq!(synthetic.inject(SyntheticDevice::new("add", "tty")), 1);
        assert_eq!(
            synthetic.inject(SyntheticDevice::new("add", "usb").devtype("usb_device")),
            1
        );
        assert_eq!(synthetic.inject(SyntheticDevice::new("add", "block")), 0);

        let first = subscription.read_event().unwrap().unwrap();
        let second = subscription.read_event().unwrap().unwrap();
        assert_eq!(first.subsystem(), Some(std::ffi::OsStr::new("tty")));
        assert_eq!(second.subsystem(), Some(std::ffi::OsStr::new("usb")));
        assert!(subscription.read_event().unwrap().is_none());
    }

    #[test]
    fn malformed_record_is_read_failure() {
        let (synthetic, context) = setup();
        let mut subscription = context.subscribe("udev").unwrap();
        subscription.add_filter("tty", None).unwrap();
        subscription.activate().unwrap();

        synthetic.inject(SyntheticDevice::malformed("tty"));
        synthetic.inject(SyntheticDevice::new("remove", "tty"));

        assert!(matches!(subscription.read_event(), Err(Error::ReadFailed(_))));
        let next = subscription.read_event().unwrap().unwrap();
        assert_eq!(next.action(), Action::Removed);
    }

    #[test]
    fn subsystem_fault_is_read_failure() {
        let (synthetic, context) = setup();
        let mut subscription = context.subscribe("udev").unwrap();
        subscription.activate().unwrap();

        synthetic.inject_fault("No buffer space available");
        assert!(matches!(subscription.read_event(), Err(Error::ReadFailed(_))));
    }

    #[test]
    fn spurious_wakeup_is_no_event() {
        let (synthetic, context) = setup();
        let mut subscription = context.subscribe("udev").unwrap();
        subscription.activate().unwrap();

        synthetic.spurious_wakeup();
        assert!(subscription.read_event().unwrap().is_none());
    }

    #[test]
    fn independent_subscriptions_each_receive() {
        let (synthetic, context) = setup();
        let mut a = context.subscribe("udev").unwrap();
        let mut b = context.subscribe("kernel").unwrap();
        a.activate().unwrap();
        b.activate().unwrap();

        assert_eq!(synthetic.inject(SyntheticDevice::new("change", "power_supply")), 2);
        assert_eq!(a.read_event().unwrap().unwrap().action(), Action::Changed);
        assert_eq!(b.read_event().unwrap().unwrap().action(), Action::Changed);
    }
}
