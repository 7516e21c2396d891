//! Blocking dispatch loop.
//!
//! The dispatcher polls the subscription's descriptor, reads one event per
//! wakeup and hands it to an [`EventSink`]. It is meant to own a thread
//! (typically via `tokio::task::spawn_blocking`) for as long as monitoring
//! runs.
//!
//! Cancellation is cooperative. The token is checked before every poll and
//! again after every wakeup, before the next read, so the loop exits within
//! one wakeup of being cancelled. `wakeup_interval` bounds how long a single
//! poll may block while waiting for that.

use std::time::Duration;

use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags, PollTimeout},
};
use tokio_util::sync::CancellationToken;

use super::{EventSink, MonitorSubscription};
use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

const DEFAULT_WAKEUP_INTERVAL: Duration = Duration::from_millis(500);

enum Wakeup {
    Readable,
    Idle,
}

/// Drives a subscription until cancelled or until its descriptor fails.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    wakeup_interval: Option<Duration>,
    announce_existing: bool,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            wakeup_interval: Some(DEFAULT_WAKEUP_INTERVAL),
            announce_existing: false,
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            wakeup_interval: config.wakeup_interval(),
            announce_existing: config.announce_existing,
        }
    }

    /// Upper bound on a single poll; `None` blocks until the descriptor is
    /// ready, so cancellation is only seen with the next event. Intervals
    /// are capped at 65535 ms.
    pub fn wakeup_interval(mut self, interval: Option<Duration>) -> Self {
        self.wakeup_interval = interval.filter(|d| !d.is_zero());
        self
    }

    /// Deliver devices already present before waiting for new ones.
    pub fn announce_existing(mut self, announce: bool) -> Self {
        self.announce_existing = announce;
        self
    }

    /// Run until `cancel` fires (returns `Ok`) or polling fails (reports to
    /// `sink.on_terminated` once and returns the error).
    ///
    /// Read failures go to `sink.on_error` and the loop carries on.
    pub fn run(
        &self,
        subscription: &mut MonitorSubscription,
        sink: &mut dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(source = subscription.source(), "Dispatcher started");

        if self.announce_existing {
            self.announce(subscription, sink);
        }

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            match self.wait(subscription) {
                Ok(Wakeup::Readable) => {}
                Ok(Wakeup::Idle) => continue,
                Err(e) => break Err(e),
            }

            if cancel.is_cancelled() {
                break Ok(());
            }

            match subscription.read_event() {
                Ok(Some(event)) => sink.on_event(event),
                Ok(None) => trace!("Wakeup without event"),
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "Dropping unreadable device record");
                    sink.on_error(e);
                }
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(()) => debug!(source = subscription.source(), "Dispatcher cancelled"),
            Err(e) => {
                error!(source = subscription.source(), error = %e, "Dispatcher terminated");
                sink.on_terminated(e);
            }
        }
        result
    }

    fn announce(&self, subscription: &MonitorSubscription, sink: &mut dyn EventSink) {
        match subscription.enumerate_matching() {
            Ok(events) => {
                debug!(count = events.len(), "Announcing present devices");
                for event in events {
                    sink.on_event(event);
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to enumerate present devices");
                sink.on_error(e);
            }
        }
    }

    fn wait(&self, subscription: &MonitorSubscription) -> Result<Wakeup> {
        let fd = subscription.descriptor()?;
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

        match poll(&mut fds, self.poll_timeout()) {
            Ok(0) => Ok(Wakeup::Idle),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLNVAL) {
                    return Err(Error::PollFailed(format!(
                        "descriptor no longer valid ({revents:?})"
                    )));
                }
                // POLLERR alone is a pending socket error (ENOBUFS after an
                // overrun); the next read returns and clears it.
                Ok(Wakeup::Readable)
            }
            Err(Errno::EINTR) => Ok(Wakeup::Idle),
            Err(e) => Err(Error::PollFailed(e.to_string())),
        }
    }

    fn poll_timeout(&self) -> PollTimeout {
        match self.wakeup_interval {
            Some(interval) => {
                PollTimeout::from(u16::try_from(interval.as_millis()).unwrap_or(u16::MAX))
            }
            None => PollTimeout::NONE,
        }
    }
}
