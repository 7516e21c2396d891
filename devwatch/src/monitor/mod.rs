//! Device hotplug monitoring.
//!
//! A [`DeviceContext`] connects to the device-notification subsystem. From
//! it, [`MonitorSubscription`]s are created, filtered, and activated; each
//! yields [`DeviceEvent`]s through `read_event`. A [`Dispatcher`] wraps that
//! in a poll loop and pushes events to an application [`EventSink`].
//!
//! ```no_run
//! use devwatch::monitor::{ChannelSink, DeviceContext, Dispatcher};
//! use tokio_util::sync::CancellationToken;
//!
//! # fn main() -> devwatch::error::Result<()> {
//! let (tx, _rx) = tokio::sync::mpsc::channel(16);
//! let context = DeviceContext::open()?;
//! let mut subscription = context.subscribe("udev")?;
//! subscription.add_filter("tty", None)?;
//! subscription.activate()?;
//! Dispatcher::new().run(&mut subscription, &mut ChannelSink::new(tx), &CancellationToken::new())?;
//! # Ok(())
//! # }
//! ```

mod context;
mod dispatcher;
mod event;
mod filter;
mod sink;
mod subscription;

pub use context::DeviceContext;
pub use dispatcher::Dispatcher;
pub use event::{Action, DeviceEvent, DeviceSnapshot};
pub use filter::Filter;
pub use sink::{ChannelSink, EventSink, MonitorEvent};
pub use subscription::MonitorSubscription;
