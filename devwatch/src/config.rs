//! Configuration management for devwatch.
//!
//! Configuration comes from an optional JSON file (named by
//! `DEVWATCH_CONFIG`) and is then overridden by individual environment
//! variables. Every field has a default, so an empty environment yields a
//! monitor of tty devices on the udev source.

use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{Error, Result};
use crate::monitor::Filter;

pub const ENV_CONFIG: &str = "DEVWATCH_CONFIG";
pub const ENV_SOURCE: &str = "DEVWATCH_SOURCE";
pub const ENV_FILTERS: &str = "DEVWATCH_FILTERS";
pub const ENV_WAKEUP_MS: &str = "DEVWATCH_WAKEUP_MS";
pub const ENV_ATTRIBUTES: &str = "DEVWATCH_ATTRIBUTES";
pub const ENV_PROPERTIES: &str = "DEVWATCH_PROPERTIES";

/// Longest poll bound `poll(2)` can express through a `u16` timeout.
pub const MAX_WAKEUP_INTERVAL_MS: u64 = u16::MAX as u64;

/// Monitoring configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Netlink event source
    pub source: String,

    /// Subsystem/devtype filters, OR'ed
    pub filters: Vec<Filter>,

    /// Longest a single poll may block, in milliseconds (at most 65535); 0
    /// blocks until an event arrives
    pub wakeup_interval_ms: u64,

    /// Report devices already present at startup
    pub announce_existing: bool,

    /// Sysfs attributes captured with each event
    pub attributes: Vec<String>,

    /// udev properties captured with each event
    pub properties: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            source: "udev".to_string(),
            filters: vec![Filter::new("tty")],
            wakeup_interval_ms: 500,
            announce_existing: true,
            attributes: Vec::new(),
            properties: vec![
                "ID_VENDOR_ID".to_string(),
                "ID_MODEL_ID".to_string(),
                "ID_SERIAL_SHORT".to_string(),
            ],
        }
    }
}

impl MonitorConfig {
    /// Load the file named by `DEVWATCH_CONFIG`, if any, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match env::var_os(ENV_CONFIG) {
            Some(path) => Self::load_from(&PathBuf::from(path))?,
            None => Self::default(),
        };
        config.apply_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific JSON file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(source) = lookup(ENV_SOURCE) {
            self.source = source.trim().to_string();
        }
        if let Some(filters) = lookup(ENV_FILTERS) {
            self.filters = split_list(&filters)
                .map(|f| f.parse::<Filter>())
                .collect::<Result<_>>()
                .map_err(|e| Error::Config(format!("{ENV_FILTERS}: {e}")))?;
        }
        if let Some(ms) = lookup(ENV_WAKEUP_MS) {
            self.wakeup_interval_ms = ms
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{ENV_WAKEUP_MS}: {e}")))?;
        }
        if let Some(attributes) = lookup(ENV_ATTRIBUTES) {
            self.attributes = split_list(&attributes).map(str::to_string).collect();
        }
        if let Some(properties) = lookup(ENV_PROPERTIES) {
            self.properties = split_list(&properties).map(str::to_string).collect();
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            return Err(Error::Config("source must not be empty".into()));
        }
        if let Some(bad) = self.filters.iter().find(|f| f.subsystem.is_empty()) {
            return Err(Error::Config(format!("filter '{bad}' has no subsystem")));
        }
        if self.wakeup_interval_ms > MAX_WAKEUP_INTERVAL_MS {
            return Err(Error::Config(format!(
                "wakeup_interval_ms {} exceeds {MAX_WAKEUP_INTERVAL_MS}",
                self.wakeup_interval_ms
            )));
        }
        Ok(())
    }

    /// The poll bound as a duration, `None` when polls block indefinitely.
    pub fn wakeup_interval(&self) -> Option<Duration> {
        match self.wakeup_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}
