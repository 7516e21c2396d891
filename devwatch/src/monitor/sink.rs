//! Application-facing side of the dispatcher.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{DeviceEvent, DeviceSnapshot};
use crate::error::Error;
use crate::tracing::prelude::*;

/// Receiver of everything a [`super::Dispatcher`] produces. Delivery is
/// fire-and-forget.
pub trait EventSink {
    /// A decoded device event. The event, and the native record behind it,
    /// is released when the sink drops it.
    fn on_event(&mut self, event: DeviceEvent);

    /// A recoverable read failure; the dispatcher keeps running.
    fn on_error(&mut self, error: Error);

    /// The dispatcher is stopping because of `error`. Called at most once.
    fn on_terminated(&mut self, error: &Error);
}

/// Item of the owned event stream produced by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorEvent {
    Device(DeviceSnapshot),
    Error { message: String },
    Terminated { message: String },
}

/// Forwards snapshots of dispatched events to an async consumer.
///
/// Meant to run on the dispatcher's blocking thread; `blocking_send` must
/// not be called from inside the runtime.
pub struct ChannelSink {
    tx: mpsc::Sender<MonitorEvent>,
    attributes: Vec<String>,
    properties: Vec<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<MonitorEvent>) -> Self {
        Self {
            tx,
            attributes: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Attributes and properties to resolve into each snapshot.
    pub fn capture(mut self, attributes: Vec<String>, properties: Vec<String>) -> Self {
        self.attributes = attributes;
        self.properties = properties;
        self
    }

    fn send(&self, event: MonitorEvent) {
        if self.tx.blocking_send(event).is_err() {
            debug!("Event receiver dropped, discarding");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_event(&mut self, event: DeviceEvent) {
        let snapshot = event.snapshot(&self.attributes, &self.properties);
        self.send(MonitorEvent::Device(snapshot));
    }

    fn on_error(&mut self, error: Error) {
        self.send(MonitorEvent::Error {
            message: error.to_string(),
        });
    }

    fn on_terminated(&mut self, error: &Error) {
        self.send(MonitorEvent::Terminated {
            message: error.to_string(),
        });
    }
}
