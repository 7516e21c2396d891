//! Decoded device events.

use std::{
    collections::BTreeMap,
    ffi::OsStr,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::native::NativeDevice;

/// What happened to a device.
///
/// Raw kernel action strings outside the known set (`bind`, `unbind`,
/// `online`, ...) decode to `Unknown`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[strum(serialize = "add")]
    Added,
    #[strum(serialize = "remove")]
    Removed,
    #[strum(serialize = "change")]
    Changed,
    #[strum(serialize = "unknown", disabled)]
    Unknown,
}

impl Action {
    /// Decode a raw action string. Never fails.
    pub fn decode(raw: &str) -> Self {
        Action::from_str(raw).unwrap_or(Action::Unknown)
    }
}

/// One device notification.
///
/// Action and device node are decoded when the event is read. Attributes
/// and properties are read through to the native record on demand; the
/// record is held by the event and released when the event is dropped.
/// Use [`DeviceEvent::snapshot`] to keep data beyond that.
pub struct DeviceEvent {
    action: Action,
    raw_action: Option<String>,
    device_node: Option<PathBuf>,
    record: Box<dyn NativeDevice>,
}

impl DeviceEvent {
    /// Decode a record received from a monitor. A record without an action
    /// is malformed.
    pub(crate) fn decode(record: Box<dyn NativeDevice>) -> Result<Self> {
        let raw_action = record
            .action()
            .map(|raw| raw.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::ReadFailed(format!(
                    "record for {} carries no action",
                    record.syspath().display()
                ))
            })?;
        let action = Action::decode(&raw_action);
        Ok(Self {
            action,
            raw_action: Some(raw_action),
            device_node: device_node(record.as_ref()),
            record,
        })
    }

    /// Wrap an enumerated, already present device.
    pub(crate) fn present(record: Box<dyn NativeDevice>) -> Self {
        Self {
            action: Action::Added,
            raw_action: None,
            device_node: device_node(record.as_ref()),
            record,
        }
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// The action string as reported, `None` for enumerated devices.
    pub fn raw_action(&self) -> Option<&str> {
        self.raw_action.as_deref()
    }

    /// Device file path, e.g. `/dev/ttyUSB0`. `None` when the kernel
    /// reports none.
    pub fn device_node(&self) -> Option<&Path> {
        self.device_node.as_deref()
    }

    pub fn syspath(&self) -> &Path {
        self.record.syspath()
    }

    pub fn subsystem(&self) -> Option<&OsStr> {
        self.record.subsystem()
    }

    pub fn devtype(&self) -> Option<&OsStr> {
        self.record.devtype()
    }

    /// Query a sysfs attribute of the device.
    pub fn attribute(&self, name: &str) -> Option<&OsStr> {
        self.record.attribute_value(name)
    }

    /// Query a udev property (`ID_VENDOR_ID`, `ID_SERIAL_SHORT`, ...).
    pub fn property(&self, name: &str) -> Option<&OsStr> {
        self.record.property_value(name)
    }

    /// Capture the event into an owned value, resolving the named
    /// attributes and properties. Names the device lacks are left out.
    pub fn snapshot<A, P>(&self, attributes: &[A], properties: &[P]) -> DeviceSnapshot
    where
        A: AsRef<str>,
        P: AsRef<str>,
    {
        DeviceSnapshot {
            action: self.action,
            device_node: self.device_node.clone(),
            syspath: self.syspath().to_path_buf(),
            subsystem: lossy(self.subsystem()),
            devtype: lossy(self.devtype()),
            attributes: resolve(attributes, |n| self.attribute(n)),
            properties: resolve(properties, |n| self.property(n)),
        }
    }
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEvent")
            .field("action", &self.action)
            .field("raw_action", &self.raw_action)
            .field("device_node", &self.device_node)
            .field("syspath", &self.syspath())
            .finish()
    }
}

fn device_node(record: &dyn NativeDevice) -> Option<PathBuf> {
    record
        .devnode()
        .filter(|path| !path.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

fn resolve<'a, N: AsRef<str>>(
    names: &[N],
    get: impl Fn(&str) -> Option<&'a OsStr>,
) -> BTreeMap<String, String> {
    names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            get(name).map(|value| (name.to_string(), value.to_string_lossy().into_owned()))
        })
        .collect()
}

fn lossy(value: Option<&OsStr>) -> Option<String> {
    value.map(|v| v.to_string_lossy().into_owned())
}

/// Owned copy of a [`DeviceEvent`], safe to send across threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub action: Action,
    pub device_node: Option<PathBuf>,
    pub syspath: PathBuf,
    pub subsystem: Option<String>,
    pub devtype: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}
