//! Device context: the session handle to the notification subsystem.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use super::{DeviceEvent, Filter, MonitorSubscription};
use crate::error::{Error, Result};
use crate::native::{self, Subsystem};
use crate::tracing::prelude::*;

pub(crate) struct ContextInner {
    pub(crate) subsystem: Arc<dyn Subsystem>,
    live_subscriptions: AtomicUsize,
}

impl ContextInner {
    pub(crate) fn subscription_opened(&self) {
        self.live_subscriptions.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn subscription_released(&self) {
        self.live_subscriptions.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn enumerate(&self, filters: &[Filter]) -> Result<Vec<DeviceEvent>> {
        let records = self.subsystem.enumerate(filters)?;
        Ok(records.into_iter().map(DeviceEvent::present).collect())
    }
}

/// Owned connection to the device-notification subsystem.
///
/// Subscriptions created from a context only hold a weak reference to it.
/// Release every subscription before the context; a subscription that
/// outlives its context fails every operation with
/// [`Error::UseAfterClose`].
pub struct DeviceContext {
    inner: Arc<ContextInner>,
}

impl DeviceContext {
    /// Open a context on the platform's backend.
    ///
    /// Fails with [`Error::ContextUnavailable`] when the platform has no
    /// usable notification subsystem.
    pub fn open() -> Result<Self> {
        Self::open_with(native::detect())
    }

    /// Open a context on an explicit backend.
    pub fn open_with(subsystem: Arc<dyn Subsystem>) -> Result<Self> {
        if let Err(e) = subsystem.connect() {
            warn!(backend = subsystem.name(), error = %e, "Device notifications unavailable");
            return Err(Error::ContextUnavailable(e.to_string()));
        }
        debug!(backend = subsystem.name(), "Device context opened");

        Ok(Self {
            inner: Arc::new(ContextInner {
                subsystem,
                live_subscriptions: AtomicUsize::new(0),
            }),
        })
    }

    /// Name of the backend this context is connected to.
    pub fn backend(&self) -> &'static str {
        self.inner.subsystem.name()
    }

    /// Create a subscription on the named event source.
    pub fn subscribe(&self, source: &str) -> Result<MonitorSubscription> {
        MonitorSubscription::create(&self.inner, source)
    }

    /// Devices already present that match any of `filters` (every device
    /// when empty), reported as [`super::Action::Added`].
    pub fn enumerate(&self, filters: &[Filter]) -> Result<Vec<DeviceEvent>> {
        self.inner.enumerate(filters)
    }

    /// Number of subscriptions created from this context and not yet
    /// released.
    pub fn live_subscriptions(&self) -> usize {
        self.inner.live_subscriptions.load(Ordering::SeqCst)
    }

    /// Release the context.
    ///
    /// All subscriptions must have been released first. Debug builds assert
    /// this; release builds log it and the orphaned subscriptions fail with
    /// [`Error::UseAfterClose`] from then on.
    pub fn close(self) {
        let live = self.live_subscriptions();
        if live > 0 {
            error!(live, "Device context closed with subscriptions still bound");
        }
        debug_assert_eq!(live, 0, "device context closed before its subscriptions");
        debug!(backend = self.backend(), "Device context closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Action;
    use crate::native::{SyntheticDevice, SyntheticSubsystem, UnavailableSubsystem};
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn unavailable_backend_fails_fast() {
        let result = DeviceContext::open_with(Arc::new(UnavailableSubsystem::new("no udev")));
        assert!(matches!(result, Err(Error::ContextUnavailable(reason)) if reason == "no udev"));
    }

    #[test]
    fn counts_live_subscriptions() {
        let context = DeviceContext::open_with(Arc::new(SyntheticSubsystem::new())).unwrap();
        assert_eq!(context.backend(), "synthetic");

        let first = context.subscribe("udev").unwrap();
        let second = context.subscribe("udev").unwrap();
        assert_eq!(context.live_subscriptions(), 2);

        first.release();
        drop(second);
        assert_eq!(context.live_subscriptions(), 0);
        context.close();
    }

    #[test]
    fn enumeration_reports_present_devices_as_added() {
        let synthetic = SyntheticSubsystem::new();
        synthetic.plug(SyntheticDevice::present("tty").devnode("/dev/ttyACM0"));
        let context = DeviceContext::open_with(Arc::new(synthetic)).unwrap();

        let events = context.enumerate(&[Filter::new("tty")]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action(), Action::Added);
        assert_eq!(
            events[0].device_node(),
            Some(std::path::Path::new("/dev/ttyACM0"))
        );
        assert!(events[0].raw_action().is_none());
    }

    #[test]
    fn closing_with_bound_subscription_is_flagged() {
        let context = DeviceContext::open_with(Arc::new(SyntheticSubsystem::new())).unwrap();
        let mut subscription = context.subscribe("udev").unwrap();

        let closed = panic::catch_unwind(AssertUnwindSafe(|| context.close()));
        assert_eq!(closed.is_err(), cfg!(debug_assertions));

        assert!(matches!(
            subscription.add_filter("tty", None),
            Err(Error::UseAfterClose)
        ));
        assert!(matches!(subscription.activate(), Err(Error::UseAfterClose)));
        assert!(matches!(subscription.read_event(), Err(Error::UseAfterClose)));
    }
}
